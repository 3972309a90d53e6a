use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::model::{
    AppBinding, AppField, AppForm, Channel, ChannelKind, ChannelPostsStatus, CommandSuggestion,
    CommandTrigger, FieldType, Group, Post, PostPage, PostType, SelectOption, UserProfile,
    POSTS_PER_PAGE,
};
use crate::store::Store;

/// Failures a controller can tell apart. Anything else reaches callers as a
/// plain `anyhow::Error`.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("server unavailable")]
    Unavailable,
    #[error("request rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPostsRequest {
    pub channel_id: String,
    pub post_id: String,
    pub kind: PageKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageResult {
    pub more_to_load: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub channel_id: String,
    pub status: Option<ChannelPostsStatus>,
    pub posts: Vec<Post>,
    pub last_disconnect_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserAutocomplete {
    pub users: Vec<UserProfile>,
    pub out_of_channel: Vec<UserProfile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookupRequest {
    pub app_id: String,
    pub field: String,
    pub values: HashMap<String, String>,
    pub raw_command: String,
}

/// Page fetches. Implementations write what they fetch into the store and
/// return only what the caller needs to update its cursors.
pub trait PostService: Send + Sync {
    fn load_unreads(&self, channel_id: &str) -> Result<PostPage>;
    fn load_posts(&self, request: &LoadPostsRequest) -> Result<PageResult>;
    fn get_post_thread(&self, post_id: &str) -> Result<PostPage>;
    fn sync_channel_posts(&self, request: &SyncRequest) -> Result<()>;
    fn create_post(&self, channel_id: &str, message: &str) -> Result<Post>;
}

pub trait UserService: Send + Sync {
    fn autocomplete_users_in_channel(&self, channel_id: &str, prefix: &str)
        -> Result<UserAutocomplete>;
    fn search_associated_groups_for_reference(
        &self,
        channel_id: &str,
        prefix: &str,
    ) -> Result<Vec<Group>>;
}

pub trait CommandService: Send + Sync {
    fn list_triggers(&self) -> Result<Vec<CommandTrigger>>;
    fn list_bindings(&self) -> Result<Vec<AppBinding>>;
    /// Server-side autocomplete for commands that are not app bindings.
    fn autocomplete_commands(&self, channel_id: &str, pretext: &str)
        -> Result<Vec<CommandSuggestion>>;
    fn fetch_form(&self, binding: &AppBinding) -> Result<AppForm>;
    fn lookup_options(&self, request: &LookupRequest) -> Result<Vec<SelectOption>>;
}

#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub current_user_id: String,
    pub history_per_channel: usize,
    pub failure_rate: f64,
    pub latency: Duration,
    pub seed: u64,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            current_user_id: "me".into(),
            history_per_channel: 240,
            failure_rate: 0.0,
            latency: Duration::ZERO,
            seed: 7,
        }
    }
}

/// In-process backend with generated history. It serves every data-layer
/// trait so the client runs without a server.
pub struct DemoServer {
    store: Arc<Store>,
    options: DemoOptions,
    history: RwLock<HashMap<String, Vec<Post>>>,
    users: Vec<UserProfile>,
    members: RwLock<HashMap<String, Vec<String>>>,
    groups: Vec<Group>,
    rng: Mutex<StdRng>,
    next_id: Mutex<u64>,
}

const FIRST_NAMES: &[&str] = &[
    "Ada", "Grace", "Linus", "Ken", "Barbara", "Dennis", "Margaret", "Alan", "Radia", "Edsger",
    "Frances", "John",
];
const LAST_NAMES: &[&str] = &[
    "Lovelace", "Hopper", "Torvalds", "Thompson", "Liskov", "Ritchie", "Hamilton", "Turing",
    "Perlman", "Dijkstra", "Allen", "Backus",
];
const LINES: &[&str] = &[
    "Pushed the fix, can someone take a look?",
    "Standup in five minutes.",
    "The build is green again.",
    "Who owns the deploy today?",
    "I left a few comments on the review.",
    "Lunch?",
    "Rolling back, the migration is stuck.",
    "Can we move the sync to Thursday?",
    "Docs are updated.",
    "Looks good to me.",
];

impl DemoServer {
    pub fn new(store: Arc<Store>, options: DemoOptions) -> Self {
        let mut rng = StdRng::seed_from_u64(options.seed);
        let now = chrono::Utc::now().timestamp_millis();

        let mut users = vec![UserProfile {
            id: options.current_user_id.clone(),
            username: "you".into(),
            first_name: "Current".into(),
            last_name: "User".into(),
            nickname: String::new(),
            last_viewed_at: None,
        }];
        for (i, (first, last)) in FIRST_NAMES.iter().zip(LAST_NAMES.iter()).enumerate() {
            users.push(UserProfile {
                id: format!("user-{i}"),
                username: format!("{}.{}", first.to_lowercase(), last.to_lowercase()),
                first_name: (*first).into(),
                last_name: (*last).into(),
                nickname: if i % 3 == 0 {
                    format!("{}y", first.to_lowercase())
                } else {
                    String::new()
                },
                last_viewed_at: (i % 2 == 0).then(|| now - (i as i64) * 60_000),
            });
        }

        let channels = vec![
            demo_channel("town-square", "Town Square", ChannelKind::Open),
            demo_channel("off-topic", "Off-Topic", ChannelKind::Open),
            demo_channel("engineering", "Engineering", ChannelKind::Open),
            demo_channel("releases", "Releases", ChannelKind::Private),
            demo_channel("design", "Design Crit", ChannelKind::Private),
            demo_channel("dm-ada", "ada.lovelace", ChannelKind::Direct),
            demo_channel("gm-core", "grace, linus, ken", ChannelKind::Group),
        ];

        let mut members = HashMap::new();
        let mut history = HashMap::new();
        for (index, channel) in channels.iter().enumerate() {
            let ids: Vec<String> = match channel.kind {
                ChannelKind::Direct => vec![options.current_user_id.clone(), "user-0".into()],
                ChannelKind::Group => vec![
                    options.current_user_id.clone(),
                    "user-1".into(),
                    "user-2".into(),
                    "user-3".into(),
                ],
                _ => users
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| (i + index) % 3 != 0 || *i == 0)
                    .map(|(_, user)| user.id.clone())
                    .collect(),
            };

            let others: Vec<String> = ids
                .iter()
                .filter(|id| **id != options.current_user_id)
                .cloned()
                .collect();
            let count = if index == 4 { 8 } else { options.history_per_channel };
            let mut posts = Vec::with_capacity(count);
            for n in 0..count {
                // The recent stretch is written by others so unread tails are exact.
                let authors = if n < 2 * POSTS_PER_PAGE { &others } else { &ids };
                let author = authors.choose(&mut rng).cloned().unwrap_or_default();
                let line = LINES.choose(&mut rng).copied().unwrap_or("...");
                let create_at = now - (n as i64 + 1) * 7 * 60_000 - rng.gen_range(0..60_000);
                posts.push(Post {
                    id: format!("{}-{:05}", channel.id, count - n),
                    create_at,
                    user_id: author,
                    channel_id: channel.id.clone(),
                    post_type: if n % 47 == 46 {
                        PostType::System
                    } else {
                        PostType::Ordinary
                    },
                    message: line.into(),
                    ..Post::default()
                });
            }

            // Leave some channels with unread tails of different lengths.
            let unread = match index {
                0 => 3,
                2 => 45,
                5 => 1,
                _ => 0,
            };
            let last_viewed = posts
                .get(unread)
                .map(|post| post.create_at)
                .unwrap_or_default();
            store.mark_channel_viewed(&channel.id, last_viewed);
            if unread > 0 {
                store.mark_unread(&channel.id);
            }

            let local: Vec<UserProfile> = users
                .iter()
                .filter(|user| ids.contains(&user.id))
                .take(6)
                .cloned()
                .collect();
            store.set_channel_members(&channel.id, local);

            members.insert(channel.id.clone(), ids);
            history.insert(channel.id.clone(), posts);
        }
        store.set_favorite("engineering", true);
        store.add_profiles(&users);
        store.set_channels(channels);

        let groups = vec![
            demo_group("g-dev", "developers", "Developers"),
            demo_group("g-ops", "oncall-ops", "On-call Ops"),
            demo_group("g-design", "design-team", "Design Team"),
            demo_group("g-leads", "tech.leads", "Tech Leads"),
        ];
        store.set_groups(groups.iter().take(2).cloned().collect());

        Self {
            store,
            options,
            history: RwLock::new(history),
            users,
            members: RwLock::new(members),
            groups,
            rng: Mutex::new(rng),
            next_id: Mutex::new(0),
        }
    }

    fn simulate_network(&self) -> Result<()> {
        if !self.options.latency.is_zero() {
            thread::sleep(self.options.latency);
        }
        if self.options.failure_rate > 0.0 {
            let failed = self
                .rng
                .lock()
                .gen_bool(self.options.failure_rate.clamp(0.0, 1.0));
            if failed {
                return Err(LoadError::Unavailable.into());
            }
        }
        Ok(())
    }

    fn history(&self, channel_id: &str) -> Result<Vec<Post>> {
        self.history
            .read()
            .get(channel_id)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(format!("channel {channel_id}")).into())
    }

    fn new_id(&self, prefix: &str) -> String {
        let mut next = self.next_id.lock();
        *next += 1;
        format!("{prefix}-new-{:05}", *next)
    }

    /// Occasionally produces a message from another member, as a websocket
    /// event would.
    pub fn random_incoming(&self, channel_id: &str, probability: f64) -> Option<Post> {
        let mut rng = self.rng.lock();
        if !rng.gen_bool(probability.clamp(0.0, 1.0)) {
            return None;
        }
        let members = self.members.read();
        let author = members
            .get(channel_id)?
            .iter()
            .filter(|id| **id != self.options.current_user_id)
            .collect::<Vec<_>>()
            .choose(&mut *rng)
            .map(|id| (*id).clone())?;
        let line = LINES.choose(&mut *rng).copied().unwrap_or("...");
        drop(members);
        drop(rng);

        let post = Post {
            id: self.new_id(channel_id),
            create_at: chrono::Utc::now().timestamp_millis(),
            user_id: author,
            channel_id: channel_id.to_string(),
            message: line.into(),
            ..Post::default()
        };
        self.history
            .write()
            .entry(channel_id.to_string())
            .or_default()
            .insert(0, post.clone());
        self.store.receive_post(post.clone());
        Some(post)
    }

    /// Creates an empty channel with the current user as its only member.
    pub fn create_channel(&self, display_name: &str, kind: ChannelKind) -> Result<Channel> {
        let display_name = display_name.trim();
        anyhow::ensure!(
            !display_name.is_empty(),
            LoadError::Rejected("channel name is empty".into())
        );
        let name: String = display_name
            .to_lowercase()
            .chars()
            .map(|ch| if ch.is_alphanumeric() { ch } else { '-' })
            .collect();
        let mut history = self.history.write();
        anyhow::ensure!(
            !history.contains_key(&name),
            LoadError::Rejected(format!("channel {name} already exists"))
        );
        history.insert(name.clone(), Vec::new());
        drop(history);

        self.members
            .write()
            .insert(name.clone(), vec![self.options.current_user_id.clone()]);
        let channel = demo_channel(&name, display_name, kind);
        let mut channels = self.store.channels();
        channels.push(channel.clone());
        self.store.set_channels(channels);
        if let Some(me) = self.store.profile(&self.options.current_user_id) {
            self.store.set_channel_members(&name, vec![me]);
        }
        Ok(channel)
    }
}

fn page_of(posts: &[Post]) -> PostPage {
    let mut page = PostPage::default();
    for post in posts {
        page.order.push(post.id.clone());
        page.posts.insert(post.id.clone(), post.clone());
    }
    page
}

impl PostService for DemoServer {
    fn load_unreads(&self, channel_id: &str) -> Result<PostPage> {
        self.simulate_network().context("load unread posts")?;
        let history = self.history(channel_id)?;
        let last_viewed = self.store.last_viewed_at(channel_id);
        let unread = history
            .iter()
            .take_while(|post| post.create_at > last_viewed)
            .count();
        let start = unread.saturating_sub(POSTS_PER_PAGE);
        let end = (unread + POSTS_PER_PAGE).min(history.len());
        let page = page_of(&history[start..end]);
        self.store.receive_posts(channel_id, &page);
        Ok(page)
    }

    fn load_posts(&self, request: &LoadPostsRequest) -> Result<PageResult> {
        self.simulate_network()
            .with_context(|| format!("load posts {:?} {}", request.kind, request.post_id))?;
        let history = self.history(&request.channel_id)?;
        let index = history
            .iter()
            .position(|post| post.id == request.post_id)
            .ok_or_else(|| LoadError::NotFound(format!("post {}", request.post_id)))?;

        let (slice, more_to_load) = match request.kind {
            PageKind::Before => {
                let start = index + 1;
                let end = (start + POSTS_PER_PAGE).min(history.len());
                (&history[start.min(end)..end], end < history.len())
            }
            PageKind::After => {
                let start = index.saturating_sub(POSTS_PER_PAGE);
                (&history[start..index], start > 0)
            }
        };
        self.store
            .receive_posts(&request.channel_id, &page_of(slice));
        Ok(PageResult { more_to_load })
    }

    fn get_post_thread(&self, post_id: &str) -> Result<PostPage> {
        self.simulate_network().context("load post thread")?;
        let history = self.history.read();
        for (channel_id, posts) in history.iter() {
            let Some(root) = posts.iter().find(|post| post.id == post_id) else {
                continue;
            };
            let root_id = root.root_id.clone().unwrap_or_else(|| root.id.clone());
            let thread: Vec<Post> = posts
                .iter()
                .filter(|post| post.id == root_id || post.root_id.as_deref() == Some(&root_id))
                .cloned()
                .collect();
            let page = page_of(&thread);
            self.store.receive_posts(channel_id, &page);
            return Ok(page);
        }
        Err(LoadError::NotFound(format!("post {post_id}")).into())
    }

    fn sync_channel_posts(&self, request: &SyncRequest) -> Result<()> {
        self.simulate_network().context("sync channel posts")?;
        let history = self.history(&request.channel_id)?;
        let at_end = request.status.map(|status| status.at_end).unwrap_or(false);
        let missing: Vec<Post> = if at_end {
            history
                .into_iter()
                .filter(|post| post.create_at > request.last_disconnect_at)
                .collect()
        } else {
            let oldest = request.posts.iter().map(|post| post.create_at).min();
            let newest = request.posts.iter().map(|post| post.create_at).max();
            match (oldest, newest) {
                (Some(oldest), Some(newest)) => history
                    .into_iter()
                    .filter(|post| post.create_at >= oldest && post.create_at <= newest)
                    .collect(),
                _ => Vec::new(),
            }
        };
        self.store
            .receive_posts(&request.channel_id, &page_of(&missing));
        Ok(())
    }

    fn create_post(&self, channel_id: &str, message: &str) -> Result<Post> {
        anyhow::ensure!(!message.trim().is_empty(), LoadError::Rejected("empty message".into()));
        let post = Post {
            id: self.new_id(channel_id),
            create_at: chrono::Utc::now().timestamp_millis(),
            user_id: self.options.current_user_id.clone(),
            channel_id: channel_id.to_string(),
            message: message.to_string(),
            ..Post::default()
        };
        self.history
            .write()
            .get_mut(channel_id)
            .ok_or_else(|| LoadError::NotFound(format!("channel {channel_id}")))?
            .insert(0, post.clone());
        self.store.receive_posts(channel_id, &page_of(std::slice::from_ref(&post)));
        Ok(post)
    }
}

fn matches_prefix(user: &UserProfile, prefix: &str) -> bool {
    let prefix = prefix.to_lowercase();
    [&user.username, &user.first_name, &user.last_name, &user.nickname]
        .iter()
        .any(|value| value.to_lowercase().starts_with(&prefix))
}

impl UserService for DemoServer {
    fn autocomplete_users_in_channel(
        &self,
        channel_id: &str,
        prefix: &str,
    ) -> Result<UserAutocomplete> {
        self.simulate_network().context("autocomplete users")?;
        let all_members = self.members.read();
        let members = all_members
            .get(channel_id)
            .ok_or_else(|| LoadError::NotFound(format!("channel {channel_id}")))?;
        let (users, out_of_channel): (Vec<UserProfile>, Vec<UserProfile>) = self
            .users
            .iter()
            .filter(|user| matches_prefix(user, prefix))
            .cloned()
            .partition(|user| members.contains(&user.id));
        Ok(UserAutocomplete {
            users,
            out_of_channel,
        })
    }

    fn search_associated_groups_for_reference(
        &self,
        _channel_id: &str,
        prefix: &str,
    ) -> Result<Vec<Group>> {
        self.simulate_network().context("search groups")?;
        let prefix = prefix.to_lowercase();
        Ok(self
            .groups
            .iter()
            .filter(|group| {
                group.name.starts_with(&prefix)
                    || group.display_name.to_lowercase().starts_with(&prefix)
            })
            .cloned()
            .collect())
    }
}

impl CommandService for DemoServer {
    fn list_triggers(&self) -> Result<Vec<CommandTrigger>> {
        Ok(demo_triggers())
    }

    fn list_bindings(&self) -> Result<Vec<AppBinding>> {
        Ok(demo_bindings())
    }

    fn autocomplete_commands(
        &self,
        _channel_id: &str,
        pretext: &str,
    ) -> Result<Vec<CommandSuggestion>> {
        self.simulate_network().context("autocomplete commands")?;
        let Some((trigger, rest)) = pretext.split_once(' ') else {
            return Ok(Vec::new());
        };
        let suggestions = match trigger {
            "/away" | "/online" | "/dnd" => Vec::new(),
            "/join" | "/leave" => self
                .store
                .channels()
                .into_iter()
                .filter(|channel| matches!(channel.kind, ChannelKind::Open | ChannelKind::Private))
                .filter(|channel| channel.name.starts_with(rest.trim()))
                .map(|channel| CommandSuggestion {
                    complete: format!("{trigger} {}", channel.name),
                    suggestion: channel.name.clone(),
                    hint: String::new(),
                    description: channel.display_name,
                })
                .collect(),
            "/msg" => self
                .users
                .iter()
                .filter(|user| user.username.starts_with(rest.trim().trim_start_matches('@')))
                .map(|user| CommandSuggestion {
                    complete: format!("{trigger} @{}", user.username),
                    suggestion: format!("@{}", user.username),
                    hint: String::new(),
                    description: user.display_name(),
                })
                .collect(),
            _ => Vec::new(),
        };
        Ok(suggestions)
    }

    fn fetch_form(&self, binding: &AppBinding) -> Result<AppForm> {
        self.simulate_network().context("fetch command form")?;
        match binding.call.as_deref() {
            Some("/forms/issue-create") => Ok(issue_create_form()),
            Some(call) => Err(LoadError::NotFound(format!("form {call}")).into()),
            None => Err(LoadError::Rejected(format!("{} has no call", binding.name)).into()),
        }
    }

    fn lookup_options(&self, request: &LookupRequest) -> Result<Vec<SelectOption>> {
        self.simulate_network().context("lookup command options")?;
        match request.field.as_str() {
            "assignee" => Ok(self
                .users
                .iter()
                .map(|user| SelectOption {
                    label: user.display_name(),
                    value: user.username.clone(),
                })
                .collect()),
            "channel" => Ok(self
                .store
                .channels()
                .into_iter()
                .map(|channel| SelectOption {
                    label: channel.display_name,
                    value: channel.name,
                })
                .collect()),
            other => Err(LoadError::NotFound(format!("lookup field {other}")).into()),
        }
    }
}

fn demo_channel(id: &str, display_name: &str, kind: ChannelKind) -> Channel {
    Channel {
        id: id.into(),
        name: id.into(),
        display_name: display_name.into(),
        kind,
        last_post_at: 0,
    }
}

fn demo_group(id: &str, name: &str, display_name: &str) -> Group {
    Group {
        id: id.into(),
        name: name.into(),
        display_name: display_name.into(),
    }
}

fn demo_triggers() -> Vec<CommandTrigger> {
    [
        ("/away", "", "Set your status to away"),
        ("/dnd", "", "Do not disturb"),
        ("/online", "", "Set your status to online"),
        ("/join", "[channel]", "Join an open channel"),
        ("/leave", "", "Leave the current channel"),
        ("/msg", "@[username] [message]", "Send a direct message"),
        ("/help", "", "Open the help page"),
    ]
    .into_iter()
    .map(|(trigger, hint, description)| CommandTrigger {
        trigger: trigger.into(),
        hint: hint.into(),
        description: description.into(),
    })
    .collect()
}

fn issue_create_form() -> AppForm {
    AppForm {
        fields: vec![
            AppField {
                name: "project".into(),
                field_type: FieldType::StaticSelect,
                positional: true,
                is_required: true,
                description: "Project key".into(),
                options: ["CORE", "WEB", "MOBILE"]
                    .into_iter()
                    .map(|key| SelectOption {
                        label: key.into(),
                        value: key.to_lowercase(),
                    })
                    .collect(),
                ..AppField::default()
            },
            AppField {
                name: "summary".into(),
                field_type: FieldType::Text,
                positional: true,
                is_required: true,
                hint: "\"short summary\"".into(),
                description: "One line summary".into(),
                ..AppField::default()
            },
            AppField {
                name: "assignee".into(),
                field_type: FieldType::DynamicSelect,
                description: "Who works on it".into(),
                ..AppField::default()
            },
            AppField {
                name: "urgent".into(),
                field_type: FieldType::Bool,
                description: "Page the on-call".into(),
                ..AppField::default()
            },
        ],
    }
}

fn demo_bindings() -> Vec<AppBinding> {
    vec![AppBinding {
        app_id: "tracker".into(),
        name: "tracker".into(),
        description: "Issue tracker".into(),
        bindings: vec![
            AppBinding {
                app_id: "tracker".into(),
                name: "issue".into(),
                description: "Work with issues".into(),
                bindings: vec![
                    AppBinding {
                        app_id: "tracker".into(),
                        name: "create".into(),
                        description: "Create an issue".into(),
                        call: Some("/forms/issue-create".into()),
                        ..AppBinding::default()
                    },
                    AppBinding {
                        app_id: "tracker".into(),
                        name: "view".into(),
                        description: "Show an issue".into(),
                        form: Some(AppForm {
                            fields: vec![AppField {
                                name: "key".into(),
                                positional: true,
                                is_required: true,
                                hint: "ISSUE-123".into(),
                                ..AppField::default()
                            }],
                        }),
                        ..AppBinding::default()
                    },
                ],
                ..AppBinding::default()
            },
            AppBinding {
                app_id: "tracker".into(),
                name: "subscribe".into(),
                description: "Post tracker events to a channel".into(),
                form: Some(AppForm {
                    fields: vec![AppField {
                        name: "channel".into(),
                        field_type: FieldType::DynamicSelect,
                        is_required: true,
                        ..AppField::default()
                    }],
                }),
                ..AppBinding::default()
            },
        ],
        ..AppBinding::default()
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> (Arc<Store>, DemoServer) {
        let store = Arc::new(Store::new("me"));
        let server = DemoServer::new(store.clone(), DemoOptions::default());
        (store, server)
    }

    #[test]
    fn created_channel_is_empty_and_listed() {
        let (store, server) = server();
        let channel = server.create_channel("Launch Plan", ChannelKind::Open).unwrap();
        assert_eq!(channel.id, "launch-plan");
        assert!(store.channel("launch-plan").is_some());
        assert!(server.load_unreads("launch-plan").unwrap().is_empty());
        assert!(server.create_channel("launch plan", ChannelKind::Open).is_err());
    }

    #[test]
    fn unread_load_centres_on_last_viewed() {
        let (store, server) = server();
        let page = server.load_unreads("engineering").unwrap();
        assert_eq!(page.len(), 2 * POSTS_PER_PAGE);
        assert_eq!(store.posts_in_channel("engineering").len(), page.len());
    }

    #[test]
    fn before_page_reports_more_to_load() {
        let (store, server) = server();
        server.load_unreads("town-square").unwrap();
        let oldest = store
            .posts_in_channel("town-square")
            .last()
            .map(|post| post.id.clone())
            .unwrap();
        let result = server
            .load_posts(&LoadPostsRequest {
                channel_id: "town-square".into(),
                post_id: oldest,
                kind: PageKind::Before,
            })
            .unwrap();
        assert!(result.more_to_load);
        assert!(store.posts_in_channel("town-square").len() > POSTS_PER_PAGE);
    }

    #[test]
    fn unknown_post_is_not_found() {
        let (_, server) = server();
        let err = server
            .load_posts(&LoadPostsRequest {
                channel_id: "town-square".into(),
                post_id: "missing".into(),
                kind: PageKind::After,
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LoadError>(),
            Some(LoadError::NotFound(_))
        ));
    }

    #[test]
    fn failure_rate_one_always_fails() {
        let store = Arc::new(Store::new("me"));
        let server = DemoServer::new(
            store,
            DemoOptions {
                failure_rate: 1.0,
                ..DemoOptions::default()
            },
        );
        assert!(server.load_unreads("town-square").is_err());
    }

    #[test]
    fn autocomplete_splits_members_and_non_members() {
        let (_, server) = server();
        let result = server.autocomplete_users_in_channel("dm-ada", "").unwrap();
        assert_eq!(result.users.len(), 2);
        assert!(!result.out_of_channel.is_empty());
    }
}
