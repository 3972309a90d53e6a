use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use regex::Regex;
use tracing::{debug, warn};

use super::{Matches, MentionProfile, Provider, SuggestionItem};
use crate::data::{UserAutocomplete, UserService};
use crate::executor::SharedExecutor;
use crate::model::{Group, UserProfile};
use crate::store::Store;

const SPLIT_CHARACTERS: [char; 3] = ['.', '-', '_'];
const SPECIAL_MENTIONS: [&str; 3] = ["here", "channel", "all"];
const MENTION_PATTERN: &str = r"(?:^|\W)@([\pL\d\-_. ]*)$";

#[derive(Debug, Clone)]
pub struct AtMentionOptions {
    pub use_channel_mentions: bool,
    pub loading_delay: Duration,
    pub max_local_results: usize,
}

impl Default for AtMentionOptions {
    fn default() -> Self {
        Self {
            use_channel_mentions: true,
            loading_delay: Duration::from_millis(500),
            max_local_results: 25,
        }
    }
}

enum Remote {
    Users {
        prefix: String,
        result: Result<UserAutocomplete>,
    },
    Groups {
        prefix: String,
        result: Result<Vec<Group>>,
    },
}

/// Suggests channel members, groups and `@here`-style mentions for `@`.
///
/// Local members are offered at once. The server lookup for the same prefix
/// replaces them when it lands; if it is slow a loading row is shown first.
pub struct AtMentionProvider {
    channel_id: String,
    current_user_id: String,
    store: Arc<Store>,
    users: Arc<dyn UserService>,
    executor: SharedExecutor,
    options: AtMentionOptions,
    pattern: Regex,
    priority_profiles: Vec<UserProfile>,
    latest_prefix: String,
    latest_pretext: String,
    last_completed_word: String,
    last_prefix_with_no_results: String,
    remote: Option<UserAutocomplete>,
    remote_groups: Vec<Group>,
    loading_deadline: Option<Instant>,
    tx: Sender<Remote>,
    rx: Receiver<Remote>,
}

impl AtMentionProvider {
    pub fn new(
        channel_id: impl Into<String>,
        store: Arc<Store>,
        users: Arc<dyn UserService>,
        executor: SharedExecutor,
        options: AtMentionOptions,
    ) -> Result<Self> {
        let (tx, rx) = unbounded();
        Ok(Self {
            channel_id: channel_id.into(),
            current_user_id: store.current_user_id(),
            store,
            users,
            executor,
            options,
            pattern: Regex::new(MENTION_PATTERN)?,
            priority_profiles: Vec::new(),
            latest_prefix: String::new(),
            latest_pretext: String::new(),
            last_completed_word: String::new(),
            last_prefix_with_no_results: String::new(),
            remote: None,
            remote_groups: Vec::new(),
            loading_deadline: None,
            tx,
            rx,
        })
    }

    pub fn set_channel(&mut self, channel_id: impl Into<String>) {
        self.channel_id = channel_id.into();
        self.remote = None;
        self.remote_groups.clear();
        self.loading_deadline = None;
        self.last_prefix_with_no_results.clear();
    }

    /// Profiles always listed first when they match, such as recent direct
    /// message partners.
    pub fn set_priority_profiles(&mut self, profiles: Vec<UserProfile>) {
        self.priority_profiles = profiles;
    }

    fn mention_profile(&self, profile: &UserProfile) -> MentionProfile {
        MentionProfile {
            profile: profile.clone(),
            is_current_user: profile.id == self.current_user_id,
        }
    }

    fn matching_profiles<'a>(
        &self,
        profiles: impl IntoIterator<Item = &'a UserProfile>,
    ) -> Vec<MentionProfile> {
        profiles
            .into_iter()
            .filter(|profile| profile_matches(profile, &self.latest_prefix))
            .map(|profile| self.mention_profile(profile))
            .collect()
    }

    fn special_mentions(&self) -> Vec<SuggestionItem> {
        if self.latest_pretext.starts_with("/msg") || !self.options.use_channel_mentions {
            return Vec::new();
        }
        SPECIAL_MENTIONS
            .iter()
            .filter(|name| name.starts_with(&self.latest_prefix))
            .map(|name| SuggestionItem::Special(name.to_string()))
            .collect()
    }

    fn items(&self) -> Vec<SuggestionItem> {
        let prefix = self.latest_prefix.as_str();

        let priority = self.matching_profiles(&self.priority_profiles);
        let priority_ids: HashSet<&str> =
            priority.iter().map(|member| member.profile.id.as_str()).collect();

        let mut local = self.matching_profiles(&self.store.channel_members(&self.channel_id));
        local.retain(|member| !priority_ids.contains(member.profile.id.as_str()));
        local.sort_by(|a, b| a.profile.username.cmp(&b.profile.username));
        local.truncate(self.options.max_local_results);
        let local_ids: HashSet<String> =
            local.iter().map(|member| member.profile.id.clone()).collect();

        let remote_users = self
            .remote
            .as_ref()
            .map(|remote| self.matching_profiles(&remote.users))
            .unwrap_or_default();
        let mut members: Vec<MentionProfile> = local;
        members.extend(remote_users.into_iter().filter(|member| {
            !local_ids.contains(&member.profile.id)
                && !priority_ids.contains(member.profile.id.as_str())
        }));
        members.sort_by(|a, b| order_users(prefix, &a.profile, &b.profile));

        let mut local_groups: Vec<Group> = self
            .store
            .groups()
            .into_iter()
            .filter(|group| group_matches(group, prefix))
            .collect();
        local_groups.sort_by(|a, b| a.name.cmp(&b.name));
        local_groups.truncate(self.options.max_local_results);
        let local_group_ids: HashSet<String> =
            local_groups.iter().map(|group| group.id.clone()).collect();
        let mut groups = local_groups;
        groups.extend(
            self.remote_groups
                .iter()
                .filter(|group| group_matches(group, prefix))
                .filter(|group| !local_group_ids.contains(&group.id))
                .cloned(),
        );
        groups.sort_by(|a, b| order_groups(prefix, a, b));

        let mut non_members = self
            .remote
            .as_ref()
            .map(|remote| self.matching_profiles(&remote.out_of_channel))
            .unwrap_or_default();
        non_members.retain(|member| {
            !local_ids.contains(&member.profile.id)
                && !priority_ids.contains(member.profile.id.as_str())
        });
        non_members.sort_by(|a, b| order_users(prefix, &a.profile, &b.profile));

        let mut items: Vec<SuggestionItem> = priority.into_iter().map(SuggestionItem::Member).collect();
        items.extend(members.into_iter().map(SuggestionItem::Member));
        items.extend(groups.into_iter().map(SuggestionItem::Group));
        items.extend(self.special_mentions());
        items.extend(non_members.into_iter().map(SuggestionItem::NonMember));
        items
    }

    fn update_matches(&mut self, items: Vec<SuggestionItem>, emit: &mut dyn FnMut(Matches)) {
        if items.is_empty() {
            self.last_prefix_with_no_results = self.latest_prefix.clone();
        } else if self.last_prefix_with_no_results == self.latest_prefix {
            self.last_prefix_with_no_results.clear();
        }
        emit(Matches::new(format!("@{}", self.latest_prefix), items));
    }

    fn request_remote(&self, prefix: String) {
        let users = self.users.clone();
        let tx = self.tx.clone();
        let channel_id = self.channel_id.clone();
        self.executor.spawn(Box::new(move || {
            let result = users.autocomplete_users_in_channel(&channel_id, &prefix);
            let failed = result.is_err();
            let _ = tx.send(Remote::Users {
                prefix: prefix.clone(),
                result,
            });
            if failed {
                return;
            }
            let result = users.search_associated_groups_for_reference(&channel_id, &prefix);
            let _ = tx.send(Remote::Groups { prefix, result });
        }));
    }

    fn apply_remote(&mut self, message: Remote, emit: &mut dyn FnMut(Matches)) {
        match message {
            Remote::Users { prefix, result } => {
                if prefix != self.latest_prefix {
                    debug!(prefix = %prefix, "at_mention: dropped stale user results");
                    return;
                }
                self.loading_deadline = None;
                match result {
                    Ok(data) => {
                        self.remote = Some(data);
                        self.remote_groups.clear();
                    }
                    Err(err) => {
                        warn!("at_mention: user lookup failed: {err:#}");
                        self.remote = None;
                        let items = self.items();
                        self.update_matches(items, emit);
                    }
                }
            }
            Remote::Groups { prefix, result } => {
                if prefix != self.latest_prefix || self.remote.is_none() {
                    return;
                }
                match result {
                    Ok(groups) => self.remote_groups = groups,
                    Err(err) => warn!("at_mention: group lookup failed: {err:#}"),
                }
                let items = self.items();
                self.update_matches(items, emit);
            }
        }
    }
}

impl Provider for AtMentionProvider {
    fn handle_pretext_changed(&mut self, pretext: &str, emit: &mut dyn FnMut(Matches)) -> bool {
        let lower = pretext.to_lowercase();
        let Some(captures) = self.pattern.captures(&lower) else {
            return false;
        };
        let whole = captures.get(0).map(|m| m.as_str().trim()).unwrap_or_default();
        if !self.last_completed_word.is_empty()
            && whole.starts_with(self.last_completed_word.trim())
        {
            return false;
        }

        let prefix = captures
            .get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        if !self.last_prefix_with_no_results.is_empty()
            && prefix.starts_with(&self.last_prefix_with_no_results)
        {
            return false;
        }

        self.latest_prefix = prefix.clone();
        self.latest_pretext = lower.clone();
        let items = self.items();
        self.update_matches(items, emit);

        self.loading_deadline = Some(Instant::now() + self.options.loading_delay);
        self.request_remote(prefix);
        true
    }

    fn handle_complete_word(&mut self, term: &str) {
        self.last_completed_word = term.to_string();
        self.last_prefix_with_no_results.clear();
    }

    fn poll(&mut self, now: Instant, emit: &mut dyn FnMut(Matches)) {
        let messages: Vec<Remote> = self.rx.try_iter().collect();
        for message in messages {
            self.apply_remote(message, emit);
        }

        if let Some(deadline) = self.loading_deadline {
            if deadline <= now {
                self.loading_deadline = None;
                let mut items = self.items();
                items.push(SuggestionItem::Loading);
                self.update_matches(items, emit);
            }
        }
    }

    fn set_channel(&mut self, channel_id: &str) {
        AtMentionProvider::set_channel(self, channel_id);
    }
}

/// Every suffix of `term` that starts at a `splitter` boundary, with and
/// without the splitter itself.
fn split_by(term: &str, splitter: char) -> Vec<String> {
    let parts: Vec<&str> = term.split(splitter).collect();
    let mut suggestions = Vec::with_capacity(parts.len() * 2);
    for index in 0..parts.len() {
        let rest = parts[index..].join(&splitter.to_string());
        if index > 0 {
            suggestions.push(format!("{splitter}{rest}"));
        }
        suggestions.push(rest);
    }
    suggestions
}

fn split_by_multiple(term: &str, splitters: &[char]) -> Vec<String> {
    let mut seen = HashSet::new();
    splitters
        .iter()
        .flat_map(|splitter| split_by(term, *splitter))
        .filter(|suggestion| seen.insert(suggestion.clone()))
        .collect()
}

fn profile_suggestions(profile: &UserProfile) -> Vec<String> {
    let mut suggestions = Vec::new();
    if !profile.username.is_empty() {
        suggestions.extend(split_by_multiple(
            &profile.username.to_lowercase(),
            &SPLIT_CHARACTERS,
        ));
    }
    for field in [&profile.first_name, &profile.last_name, &profile.nickname] {
        suggestions.extend(split_by(&field.to_lowercase(), ' '));
    }
    suggestions.push(format!(
        "{} {}",
        profile.first_name.to_lowercase(),
        profile.last_name.to_lowercase()
    ));
    suggestions
}

fn group_suggestions(group: &Group) -> Vec<String> {
    let mut suggestions = Vec::new();
    if !group.name.is_empty() {
        suggestions.extend(split_by_multiple(&group.name.to_lowercase(), &SPLIT_CHARACTERS));
    }
    let display = group.display_name.to_lowercase();
    suggestions.extend(split_by(&display, ' '));
    suggestions.push(display);
    suggestions
}

fn profile_matches(profile: &UserProfile, prefix: &str) -> bool {
    let prefix = prefix.to_lowercase();
    profile_suggestions(profile)
        .iter()
        .any(|suggestion| suggestion.starts_with(&prefix))
}

fn group_matches(group: &Group, prefix: &str) -> bool {
    let prefix = prefix.to_lowercase();
    group_suggestions(group)
        .iter()
        .any(|suggestion| suggestion.starts_with(&prefix))
}

/// Username prefix matches first, then the most recently viewed, then by
/// username.
fn order_users(prefix: &str, a: &UserProfile, b: &UserProfile) -> Ordering {
    let a_starts = a.username.starts_with(prefix);
    let b_starts = b.username.starts_with(prefix);
    b_starts
        .cmp(&a_starts)
        .then_with(|| match (a.last_viewed_at, b.last_viewed_at) {
            (Some(a_at), Some(b_at)) => b_at.cmp(&a_at),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.username.cmp(&b.username))
}

fn order_groups(prefix: &str, a: &Group, b: &Group) -> Ordering {
    let a_starts = a.name.starts_with(prefix);
    let b_starts = b.name.starts_with(prefix);
    b_starts.cmp(&a_starts).then_with(|| a.name.cmp(&b.name))
}
