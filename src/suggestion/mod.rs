//! Autocomplete for the message input.
//!
//! Every keystroke hands the text before the caret (the "pretext") to each
//! provider in turn. The first one that recognises it owns the suggestion
//! list until the next keystroke; results it produces later, from remote
//! lookups, arrive through [`Provider::poll`].

use std::time::Instant;

use crate::model::{CommandSuggestion, Group, UserProfile};
use command::AppSubmission;

pub mod at_mention;
pub mod command;

pub use at_mention::AtMentionProvider;
pub use command::{CommandProvider, EXECUTE_CURRENT_COMMAND_ITEM_ID};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionProfile {
    pub profile: UserProfile,
    pub is_current_user: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuggestionItem {
    Member(MentionProfile),
    NonMember(MentionProfile),
    Group(Group),
    Special(String),
    Command(CommandSuggestion),
    Loading,
}

impl SuggestionItem {
    /// Text inserted when the item is chosen. Empty for rows that cannot be
    /// chosen.
    pub fn term(&self) -> String {
        match self {
            SuggestionItem::Member(member) | SuggestionItem::NonMember(member) => {
                format!("@{}", member.profile.username)
            }
            SuggestionItem::Group(group) => format!("@{}", group.name),
            SuggestionItem::Special(name) => format!("@{name}"),
            SuggestionItem::Command(command) => command.complete.clone(),
            SuggestionItem::Loading => String::new(),
        }
    }
}

/// One result set. `matched_pretext` is the tail of the pretext that a chosen
/// term replaces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Matches {
    pub matched_pretext: String,
    pub terms: Vec<String>,
    pub items: Vec<SuggestionItem>,
}

impl Matches {
    pub fn new(matched_pretext: impl Into<String>, items: Vec<SuggestionItem>) -> Self {
        Self {
            matched_pretext: matched_pretext.into(),
            terms: items.iter().map(SuggestionItem::term).collect(),
            items,
        }
    }
}

pub trait Provider {
    /// Returns true when this provider takes the pretext. Synchronous results
    /// go to `emit` before returning.
    fn handle_pretext_changed(&mut self, pretext: &str, emit: &mut dyn FnMut(Matches)) -> bool;

    fn handle_complete_word(&mut self, _term: &str) {}

    /// Delivers results that became ready since the last call.
    fn poll(&mut self, _now: Instant, _emit: &mut dyn FnMut(Matches)) {}

    fn set_channel(&mut self, _channel_id: &str) {}

    /// A structured submission for a complete input line, if this provider
    /// understands it.
    fn submission(&self, _text: &str) -> Option<AppSubmission> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// The chosen item asks for the command to run as typed.
    pub execute: bool,
}

#[derive(Default)]
pub struct SuggestionBox {
    providers: Vec<Box<dyn Provider>>,
    active: Option<usize>,
    pretext: String,
    matches: Option<Matches>,
    selected: usize,
}

impl SuggestionBox {
    pub fn new(providers: Vec<Box<dyn Provider>>) -> Self {
        Self {
            providers,
            ..Self::default()
        }
    }

    pub fn pretext_changed(&mut self, pretext: &str) {
        self.pretext = pretext.to_string();
        self.active = None;
        self.matches = None;
        self.selected = 0;

        for (index, provider) in self.providers.iter_mut().enumerate() {
            let mut latest = None;
            let claimed = provider.handle_pretext_changed(pretext, &mut |matches: Matches| {
                latest = Some(matches);
            });
            if claimed {
                self.active = Some(index);
                self.matches = latest;
                break;
            }
        }
    }

    /// Collects late results. Only the provider that owns the current
    /// pretext may change the list. Returns true when it changed.
    pub fn poll(&mut self, now: Instant) -> bool {
        let mut changed = false;
        for (index, provider) in self.providers.iter_mut().enumerate() {
            let mut latest = None;
            provider.poll(now, &mut |matches: Matches| latest = Some(matches));
            if let (Some(matches), true) = (latest, self.active == Some(index)) {
                self.matches = Some(matches);
                changed = true;
            }
        }
        if changed {
            let len = self.items().len();
            self.selected = self.selected.min(len.saturating_sub(1));
        }
        changed
    }

    pub fn set_channel(&mut self, channel_id: &str) {
        self.close();
        for provider in &mut self.providers {
            provider.set_channel(channel_id);
        }
    }

    pub fn submission(&self, text: &str) -> Option<AppSubmission> {
        self.providers
            .iter()
            .find_map(|provider| provider.submission(text))
    }

    pub fn is_open(&self) -> bool {
        !self.items().is_empty()
    }

    pub fn items(&self) -> &[SuggestionItem] {
        self.matches
            .as_ref()
            .map(|matches| matches.items.as_slice())
            .unwrap_or_default()
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn select_next(&mut self) {
        let len = self.items().len();
        if len > 0 {
            self.selected = (self.selected + 1) % len;
        }
    }

    pub fn select_previous(&mut self) {
        let len = self.items().len();
        if len > 0 {
            self.selected = (self.selected + len - 1) % len;
        }
    }

    pub fn close(&mut self) {
        self.active = None;
        self.matches = None;
        self.selected = 0;
    }

    /// Applies the selected term to the pretext. Returns `None` when nothing
    /// selectable is highlighted.
    pub fn complete_selected(&mut self) -> Option<Completion> {
        let matches = self.matches.as_ref()?;
        let term = matches.terms.get(self.selected)?.clone();
        if term.is_empty() {
            return None;
        }
        let matched = matches.matched_pretext.clone();
        if let Some(provider) = self.active.and_then(|index| self.providers.get_mut(index)) {
            provider.handle_complete_word(&term);
        }
        let completion = apply_completion(&self.pretext, &matched, &term);
        self.close();
        Some(completion)
    }
}

/// Replaces the matched tail of `pretext` with `term` and a trailing space.
pub fn apply_completion(pretext: &str, matched_pretext: &str, term: &str) -> Completion {
    if let Some(command) = term.strip_suffix(EXECUTE_CURRENT_COMMAND_ITEM_ID) {
        return Completion {
            text: command.to_string(),
            execute: true,
        };
    }
    let keep = pretext
        .chars()
        .count()
        .saturating_sub(matched_pretext.chars().count());
    let mut text: String = pretext.chars().take(keep).collect();
    text.push_str(term);
    text.push(' ');
    Completion {
        text,
        execute: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        trigger: char,
        terms: Vec<&'static str>,
        late: Option<Matches>,
    }

    impl Provider for Fixed {
        fn handle_pretext_changed(&mut self, pretext: &str, emit: &mut dyn FnMut(Matches)) -> bool {
            if !pretext.starts_with(self.trigger) {
                return false;
            }
            let items = self
                .terms
                .iter()
                .map(|term| SuggestionItem::Special(term.to_string()))
                .collect();
            emit(Matches::new(pretext, items));
            true
        }

        fn poll(&mut self, _now: Instant, emit: &mut dyn FnMut(Matches)) {
            if let Some(matches) = self.late.take() {
                emit(matches);
            }
        }
    }

    fn boxed(trigger: char, terms: Vec<&'static str>, late: Option<Matches>) -> Box<dyn Provider> {
        Box::new(Fixed {
            trigger,
            terms,
            late,
        })
    }

    #[test]
    fn first_claiming_provider_wins() {
        let mut suggestions = SuggestionBox::new(vec![
            boxed('@', vec!["here"], None),
            boxed('@', vec!["all"], None),
        ]);
        suggestions.pretext_changed("@h");
        assert_eq!(suggestions.items(), [SuggestionItem::Special("here".into())]);
    }

    #[test]
    fn late_results_from_inactive_provider_are_ignored() {
        let late = Matches::new("~", vec![SuggestionItem::Loading]);
        let mut suggestions = SuggestionBox::new(vec![
            boxed('~', vec![], Some(late)),
            boxed('@', vec!["here"], None),
        ]);
        suggestions.pretext_changed("@");
        assert!(!suggestions.poll(Instant::now()));
        assert_eq!(suggestions.items().len(), 1);
    }

    #[test]
    fn completion_replaces_matched_tail() {
        let mut suggestions = SuggestionBox::new(vec![boxed('@', vec!["here", "all"], None)]);
        suggestions.pretext_changed("@");
        suggestions.select_next();
        let completion = suggestions.complete_selected().unwrap();
        assert_eq!(completion.text, "@all ");
        assert!(!suggestions.is_open());
    }

    #[test]
    fn apply_completion_keeps_leading_text() {
        let completion = apply_completion("hello @AD", "@ad", "@ada.lovelace");
        assert_eq!(completion.text, "hello @ada.lovelace ");
    }

    #[test]
    fn execute_item_requests_submit() {
        let term = format!("/tracker issue view KEY-1 {EXECUTE_CURRENT_COMMAND_ITEM_ID}");
        let completion = apply_completion("/tracker issue view KEY-1 ", "", &term);
        assert!(completion.execute);
        assert_eq!(completion.text, "/tracker issue view KEY-1 ");
    }

    #[test]
    fn selection_wraps() {
        let mut suggestions = SuggestionBox::new(vec![boxed('@', vec!["a", "b"], None)]);
        suggestions.pretext_changed("@");
        suggestions.select_previous();
        assert_eq!(suggestions.selected(), 1);
        suggestions.select_next();
        assert_eq!(suggestions.selected(), 0);
    }
}
