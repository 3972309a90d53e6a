use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

use super::{Matches, Provider, SuggestionItem};
use crate::data::{CommandService, LookupRequest};
use crate::executor::SharedExecutor;
use crate::model::{
    AppBinding, AppField, AppForm, CommandSuggestion, CommandTrigger, FieldType, SelectOption,
};

/// Appended to a suggestion's `complete` text to mark "run the command as
/// typed" instead of inserting text.
pub const EXECUTE_CURRENT_COMMAND_ITEM_ID: &str = "_execute_current_command";

/// An app binding together with the command words that reach it, without the
/// leading slash (`tracker issue create`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatBinding {
    pub full_pretext: String,
    pub binding: AppBinding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Flag(String),
    Value(String),
}

/// The argument words after a binding. `editing` is the word under the caret,
/// empty when the pretext ends in whitespace. `editing_start` is the byte
/// offset of that word in the tokenized text, opening quote included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
    pub done: Vec<Token>,
    pub editing: Token,
    pub editing_start: usize,
}

/// A fully parsed app command, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSubmission {
    pub app_id: String,
    pub location: String,
    pub call: Option<String>,
    pub values: HashMap<String, String>,
}

enum ArgumentSuggestions {
    Ready(Vec<CommandSuggestion>),
    Lookup { field: AppField, input: String },
}

enum Reply {
    Autocomplete {
        pretext: String,
        result: Result<Vec<CommandSuggestion>>,
    },
    Form {
        pretext: String,
        location: String,
        result: Result<AppForm>,
    },
    Lookup {
        pretext: String,
        input: String,
        start: usize,
        execute: bool,
        result: Result<Vec<SelectOption>>,
    },
}

/// Suggestions for `/` commands: the trigger list, structured app commands,
/// and server autocomplete for everything else.
pub struct CommandProvider {
    channel_id: String,
    service: Arc<dyn CommandService>,
    executor: SharedExecutor,
    triggers: Vec<CommandTrigger>,
    bindings: Vec<AppBinding>,
    forms: HashMap<String, AppForm>,
    latest_pretext: String,
    tx: Sender<Reply>,
    rx: Receiver<Reply>,
}

impl CommandProvider {
    pub fn new(
        channel_id: impl Into<String>,
        triggers: Vec<CommandTrigger>,
        bindings: Vec<AppBinding>,
        service: Arc<dyn CommandService>,
        executor: SharedExecutor,
    ) -> Self {
        let (tx, rx) = unbounded();
        Self {
            channel_id: channel_id.into(),
            service,
            executor,
            triggers,
            bindings,
            forms: HashMap::new(),
            latest_pretext: String::new(),
            tx,
            rx,
        }
    }

    pub fn set_channel(&mut self, channel_id: impl Into<String>) {
        self.channel_id = channel_id.into();
    }

    pub fn is_app_command(&self, pretext: &str) -> bool {
        self.bindings
            .iter()
            .any(|binding| pretext.starts_with(&format!("/{} ", binding.name)))
    }

    /// Resolves a complete command line into the binding it calls and the
    /// values it carries. Only bindings with a known form can be submitted.
    pub fn parse_submission(&self, text: &str) -> Option<AppSubmission> {
        let matched = match_binding(&self.bindings, text)?;
        if !matched.binding.bindings.is_empty() {
            return None;
        }
        let form = self.form_for(&matched)?;
        let mut tokens = tokenize(argument_text(text, &matched.full_pretext));
        tokens.done.push(tokens.editing);
        Some(AppSubmission {
            app_id: matched.binding.app_id.clone(),
            location: format!("/{}", matched.full_pretext),
            call: matched.binding.call.clone(),
            values: form_values(&form, &tokens.done),
        })
    }

    fn form_for(&self, matched: &FlatBinding) -> Option<AppForm> {
        matched
            .binding
            .form
            .clone()
            .or_else(|| self.forms.get(&matched.full_pretext).cloned())
    }

    fn base_suggestions(&self, pretext: &str) -> Vec<CommandSuggestion> {
        let typed = pretext.to_lowercase();
        let mut suggestions: Vec<CommandSuggestion> = self
            .triggers
            .iter()
            .filter(|trigger| trigger.trigger.starts_with(&typed))
            .map(|trigger| CommandSuggestion {
                complete: trigger.trigger.clone(),
                suggestion: trigger.trigger.clone(),
                hint: trigger.hint.clone(),
                description: trigger.description.clone(),
            })
            .collect();
        suggestions.extend(
            self.bindings
                .iter()
                .map(|binding| (format!("/{}", binding.name), binding))
                .filter(|(trigger, _)| trigger.starts_with(&typed))
                .map(|(trigger, binding)| CommandSuggestion {
                    complete: trigger.clone(),
                    suggestion: trigger,
                    hint: binding.hint.clone(),
                    description: binding.description.clone(),
                }),
        );
        suggestions.sort_by(|a, b| a.suggestion.cmp(&b.suggestion));
        suggestions
    }

    fn app_suggestions(
        &mut self,
        pretext: &str,
        matched: FlatBinding,
        emit: &mut dyn FnMut(Matches),
    ) {
        if !matched.binding.bindings.is_empty() {
            let start = word_start(pretext);
            let items = sub_binding_suggestions(pretext, &matched)
                .into_iter()
                .map(|choice| decorate(pretext, start, choice))
                .collect();
            emit(command_matches(pretext, items));
            return;
        }

        match self.form_for(&matched) {
            Some(form) => self.form_suggestions(pretext, &matched, &form, emit),
            None if matched.binding.call.is_some() => {
                debug!(location = %matched.full_pretext, "command: fetching form");
                let service = self.service.clone();
                let tx = self.tx.clone();
                let pretext = pretext.to_string();
                self.executor.spawn(Box::new(move || {
                    let result = service.fetch_form(&matched.binding);
                    let _ = tx.send(Reply::Form {
                        pretext,
                        location: matched.full_pretext,
                        result,
                    });
                }));
            }
            None => emit(command_matches(pretext, Vec::new())),
        }
    }

    fn form_suggestions(
        &mut self,
        pretext: &str,
        matched: &FlatBinding,
        form: &AppForm,
        emit: &mut dyn FnMut(Matches),
    ) {
        let args = argument_text(pretext, &matched.full_pretext);
        let tokens = tokenize(args);
        let start = pretext.len() - args.len() + tokens.editing_start;
        let execute = required_fields_satisfied(form, &tokens);
        match argument_suggestions(form, &tokens) {
            ArgumentSuggestions::Ready(choices) => {
                emit(command_matches(pretext, finish(pretext, start, choices, execute)));
            }
            ArgumentSuggestions::Lookup { field, input } => {
                let mut all = tokens.done.clone();
                all.push(tokens.editing.clone());
                let request = LookupRequest {
                    app_id: matched.binding.app_id.clone(),
                    field: field.name.clone(),
                    values: form_values(form, &all),
                    raw_command: pretext.to_string(),
                };
                let service = self.service.clone();
                let tx = self.tx.clone();
                let pretext = pretext.to_string();
                self.executor.spawn(Box::new(move || {
                    let result = service.lookup_options(&request);
                    let _ = tx.send(Reply::Lookup {
                        pretext,
                        input,
                        start,
                        execute,
                        result,
                    });
                }));
            }
        }
    }

    fn apply_reply(&mut self, reply: Reply, emit: &mut dyn FnMut(Matches)) {
        match reply {
            Reply::Autocomplete { pretext, result } => {
                if pretext != self.latest_pretext {
                    return;
                }
                let items = match result {
                    Ok(items) => items,
                    Err(err) => {
                        warn!("command: autocomplete failed: {err:#}");
                        Vec::new()
                    }
                };
                emit(command_matches(&pretext, items));
            }
            Reply::Form {
                pretext,
                location,
                result,
            } => match result {
                Ok(form) => {
                    self.forms.insert(location, form);
                    if pretext == self.latest_pretext {
                        if let Some(matched) = match_binding(&self.bindings, &pretext) {
                            self.app_suggestions(&pretext, matched, emit);
                        }
                    }
                }
                Err(err) => {
                    warn!(location = %location, "command: form fetch failed: {err:#}");
                    if pretext == self.latest_pretext {
                        emit(command_matches(&pretext, vec![notice(format!("Error: {err}"))]));
                    }
                }
            },
            Reply::Lookup {
                pretext,
                input,
                start,
                execute,
                result,
            } => {
                if pretext != self.latest_pretext {
                    return;
                }
                let choices = match result {
                    Err(err) => vec![notice(format!("Error: {err}"))],
                    Ok(options) => {
                        let options = filter_options(&options, &input);
                        if options.is_empty() {
                            vec![notice("Received no data for dynamic suggestions".into())]
                        } else {
                            options
                                .into_iter()
                                .map(|option| CommandSuggestion {
                                    complete: option.value.clone(),
                                    suggestion: option.value.clone(),
                                    hint: String::new(),
                                    description: option.label.clone(),
                                })
                                .collect()
                        }
                    }
                };
                emit(command_matches(&pretext, finish(&pretext, start, choices, execute)));
            }
        }
    }
}

impl Provider for CommandProvider {
    fn handle_pretext_changed(&mut self, pretext: &str, emit: &mut dyn FnMut(Matches)) -> bool {
        if !pretext.starts_with('/') {
            return false;
        }
        self.latest_pretext = pretext.to_string();

        if !pretext.contains(' ') {
            let items = self.base_suggestions(pretext);
            emit(command_matches(pretext, items));
            return true;
        }

        if self.is_app_command(pretext) {
            match match_binding(&self.bindings, pretext) {
                Some(matched) => self.app_suggestions(pretext, matched, emit),
                None => emit(command_matches(pretext, Vec::new())),
            }
            return true;
        }

        let service = self.service.clone();
        let tx = self.tx.clone();
        let channel_id = self.channel_id.clone();
        let pretext = pretext.to_string();
        self.executor.spawn(Box::new(move || {
            let result = service.autocomplete_commands(&channel_id, &pretext);
            let _ = tx.send(Reply::Autocomplete { pretext, result });
        }));
        true
    }

    fn poll(&mut self, _now: std::time::Instant, emit: &mut dyn FnMut(Matches)) {
        let replies: Vec<Reply> = self.rx.try_iter().collect();
        for reply in replies {
            self.apply_reply(reply, emit);
        }
    }

    fn set_channel(&mut self, channel_id: &str) {
        CommandProvider::set_channel(self, channel_id);
    }

    fn submission(&self, text: &str) -> Option<AppSubmission> {
        self.parse_submission(text)
    }
}

fn command_matches(pretext: &str, suggestions: Vec<CommandSuggestion>) -> Matches {
    Matches::new(
        pretext,
        suggestions.into_iter().map(SuggestionItem::Command).collect(),
    )
}

/// A row that explains something and inserts nothing.
fn notice(text: String) -> CommandSuggestion {
    CommandSuggestion {
        complete: String::new(),
        suggestion: text,
        hint: String::new(),
        description: String::new(),
    }
}

fn finish(
    pretext: &str,
    start: usize,
    choices: Vec<CommandSuggestion>,
    execute: bool,
) -> Vec<CommandSuggestion> {
    let mut items = Vec::with_capacity(choices.len() + 1);
    if execute {
        items.push(execute_suggestion(pretext));
    }
    items.extend(
        choices
            .into_iter()
            .map(|choice| decorate(pretext, start, choice)),
    );
    items
}

fn execute_suggestion(pretext: &str) -> CommandSuggestion {
    CommandSuggestion {
        complete: format!("{pretext}{EXECUTE_CURRENT_COMMAND_ITEM_ID}"),
        suggestion: "/Execute Current Command".into(),
        hint: String::new(),
        description: "Select this option to run the command as typed.".into(),
    }
}

/// Turns a choice for the word starting at byte `start` of `pretext` into a
/// completion of the whole line. Values with whitespace come back quoted.
pub fn decorate(pretext: &str, start: usize, choice: CommandSuggestion) -> CommandSuggestion {
    if choice.complete.ends_with(EXECUTE_CURRENT_COMMAND_ITEM_ID) || choice.complete.is_empty() {
        return choice;
    }
    let Some(before) = pretext.get(..start) else {
        return choice;
    };
    let value = if choice.complete.contains(char::is_whitespace) {
        format!("\"{}\"", choice.complete)
    } else {
        choice.complete.clone()
    };
    CommandSuggestion {
        complete: format!("{before}{value}"),
        suggestion: format!("/{}", choice.suggestion),
        ..choice
    }
}

/// Byte offset just past the last whitespace, where an unquoted word starts.
fn word_start(pretext: &str) -> usize {
    pretext
        .char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .last()
        .map(|(at, c)| at + c.len_utf8())
        .unwrap_or(0)
}

/// Lists every binding with the words that reach it, parents first.
pub fn flatten(bindings: &[AppBinding], parent: &str) -> Vec<FlatBinding> {
    let mut flat = Vec::new();
    for binding in bindings {
        let full_pretext = format!("{parent}{}", binding.name);
        flat.push(FlatBinding {
            full_pretext: full_pretext.clone(),
            binding: binding.clone(),
        });
        if !binding.bindings.is_empty() {
            flat.extend(flatten(&binding.bindings, &format!("{full_pretext} ")));
        }
    }
    flat
}

/// The deepest binding whose words, followed by a space, prefix the command.
pub fn match_binding(bindings: &[AppBinding], pretext: &str) -> Option<FlatBinding> {
    let ends_in_space = pretext.ends_with(char::is_whitespace);
    let mut normalized = pretext.split_whitespace().collect::<Vec<_>>().join(" ");
    if ends_in_space {
        normalized.push(' ');
    }
    let command = normalized.strip_prefix('/')?;

    flatten(bindings, "")
        .into_iter()
        .filter(|flat| command.starts_with(&format!("{} ", flat.full_pretext)))
        .max_by_key(|flat| flat.full_pretext.len())
}

fn sub_binding_suggestions(pretext: &str, matched: &FlatBinding) -> Vec<CommandSuggestion> {
    let typed = argument_text(pretext, &matched.full_pretext)
        .trim()
        .to_lowercase();
    matched
        .binding
        .bindings
        .iter()
        .filter(|sub| sub.name.to_lowercase().starts_with(&typed))
        .map(|sub| CommandSuggestion {
            complete: sub.name.clone(),
            suggestion: sub.name.clone(),
            hint: sub.hint.clone(),
            description: sub.description.clone(),
        })
        .collect()
}

/// The text after the binding's words.
fn argument_text<'a>(pretext: &'a str, full_pretext: &str) -> &'a str {
    let mut rest = pretext.trim_start().strip_prefix('/').unwrap_or(pretext);
    for word in full_pretext.split(' ') {
        rest = rest.trim_start();
        rest = rest.strip_prefix(word).unwrap_or(rest);
    }
    rest
}

/// Splits arguments on whitespace. A double-quoted span is one value, and an
/// unterminated quote yields what has been typed so far.
pub fn tokenize(args: &str) -> Tokens {
    let mut done = Vec::new();
    let mut current = String::new();
    let mut current_start = 0;
    let mut started = false;
    let mut quoted = false;
    let mut in_quotes = false;

    let finish = |current: &mut String, quoted: bool| -> Token {
        let word = std::mem::take(current);
        match word.strip_prefix("--") {
            Some(name) if !quoted => Token::Flag(name.to_string()),
            _ => Token::Value(word),
        }
    };

    for (at, c) in args.char_indices() {
        if in_quotes {
            if c == '"' {
                in_quotes = false;
            } else {
                current.push(c);
            }
        } else if c.is_whitespace() {
            if started {
                done.push(finish(&mut current, quoted));
                started = false;
                quoted = false;
            }
        } else if c == '"' && !started {
            in_quotes = true;
            quoted = true;
            started = true;
            current_start = at;
        } else {
            if !started {
                current_start = at;
            }
            current.push(c);
            started = true;
        }
    }

    let (editing, editing_start) = if started {
        (finish(&mut current, quoted), current_start)
    } else {
        (Token::Value(String::new()), args.len())
    };
    Tokens {
        done,
        editing,
        editing_start,
    }
}

/// Pairs each `--flag` with the value after it. Values without a flag are
/// positional (`None`). A flag followed by another flag is dropped.
pub fn resolve_named_arguments(tokens: &[Token]) -> Vec<(Option<String>, String)> {
    let mut resolved = Vec::new();
    let mut flag: Option<&str> = None;
    for token in tokens {
        match token {
            Token::Flag(name) => flag = Some(name),
            Token::Value(value) => {
                resolved.push((flag.take().map(str::to_string), value.clone()));
            }
        }
    }
    resolved
}

pub fn form_values(form: &AppForm, tokens: &[Token]) -> HashMap<String, String> {
    let positional: Vec<&AppField> = form.fields.iter().filter(|f| f.positional).collect();
    let mut values = HashMap::new();
    let mut position = 0;
    for (name, value) in resolve_named_arguments(tokens) {
        let field = match name {
            Some(name) => form.fields.iter().find(|field| field.name == name),
            None => {
                position += 1;
                positional.get(position - 1).copied()
            }
        };
        if let Some(field) = field {
            if !value.is_empty() {
                values.insert(field.name.clone(), value);
            }
        }
    }
    values
}

fn required_fields_satisfied(form: &AppForm, tokens: &Tokens) -> bool {
    let mut all = tokens.done.clone();
    all.push(tokens.editing.clone());
    let values = form_values(form, &all);
    form.fields
        .iter()
        .filter(|field| field.is_required)
        .all(|field| values.contains_key(&field.name))
}

fn argument_suggestions(form: &AppForm, tokens: &Tokens) -> ArgumentSuggestions {
    let used_flag = |name: &str| {
        tokens
            .done
            .iter()
            .any(|token| matches!(token, Token::Flag(flag) if flag == name))
    };
    let flag_suggestions = |partial: &str| {
        ArgumentSuggestions::Ready(
            form.fields
                .iter()
                .filter(|field| !field.positional)
                .filter(|field| !used_flag(&field.name))
                .filter(|field| field.name.starts_with(partial))
                .map(|field| CommandSuggestion {
                    complete: format!("--{}", field.name),
                    suggestion: format!("--{}", field.name),
                    hint: field.hint.clone(),
                    description: field.description.clone(),
                })
                .collect(),
        )
    };

    let input = match &tokens.editing {
        Token::Flag(partial) => return flag_suggestions(partial),
        Token::Value(input) => input.as_str(),
    };

    if let Some(Token::Flag(name)) = tokens.done.last() {
        return match form.fields.iter().find(|field| field.name == *name) {
            Some(field) => field_suggestions(field, input),
            None => ArgumentSuggestions::Ready(Vec::new()),
        };
    }

    if input.starts_with('-') {
        return flag_suggestions(input.trim_start_matches('-'));
    }

    let position = resolve_named_arguments(&tokens.done)
        .iter()
        .filter(|(name, _)| name.is_none())
        .count();
    let positional: Vec<&AppField> = form.fields.iter().filter(|f| f.positional).collect();
    match positional.get(position) {
        Some(field) => field_suggestions(field, input),
        None if input.is_empty() => flag_suggestions(""),
        None => ArgumentSuggestions::Ready(Vec::new()),
    }
}

fn field_suggestions(field: &AppField, input: &str) -> ArgumentSuggestions {
    let lower = input.to_lowercase();
    let choices = match field.field_type {
        FieldType::Bool => ["true", "false"]
            .into_iter()
            .filter(|value| value.starts_with(&lower))
            .map(|value| CommandSuggestion {
                complete: value.into(),
                suggestion: value.into(),
                hint: String::new(),
                description: String::new(),
            })
            .collect(),
        FieldType::StaticSelect => filter_options(&field.options, input)
            .into_iter()
            .map(|option| CommandSuggestion {
                complete: option.value.clone(),
                suggestion: option.value.clone(),
                hint: String::new(),
                description: option.label.clone(),
            })
            .collect(),
        FieldType::DynamicSelect => {
            return ArgumentSuggestions::Lookup {
                field: field.clone(),
                input: input.to_string(),
            }
        }
        FieldType::Text => vec![CommandSuggestion {
            complete: input.to_string(),
            suggestion: input.to_string(),
            hint: if field.hint.is_empty() {
                field.name.clone()
            } else {
                field.hint.clone()
            },
            description: field.description.clone(),
        }],
    };
    ArgumentSuggestions::Ready(choices)
}

fn filter_options(options: &[SelectOption], input: &str) -> Vec<SelectOption> {
    let lower = input.to_lowercase();
    options
        .iter()
        .filter(|option| {
            option.label.to_lowercase().starts_with(&lower)
                || option.value.to_lowercase().starts_with(&lower)
        })
        .cloned()
        .collect()
}
