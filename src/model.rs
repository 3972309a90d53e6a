use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const POST_CHUNK_SIZE: usize = 60;
pub const POSTS_PER_PAGE: usize = POST_CHUNK_SIZE / 2;
pub const MAX_POST_VISIBILITY: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PostType {
    #[default]
    Ordinary,
    System,
    Ephemeral,
    EphemeralAddToChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PostState {
    #[default]
    Normal,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Post {
    pub id: String,
    pub create_at: i64,
    pub user_id: String,
    pub channel_id: String,
    #[serde(rename = "type", default)]
    pub post_type: PostType,
    #[serde(default)]
    pub state: PostState,
    #[serde(default)]
    pub pending_post_id: Option<String>,
    #[serde(default)]
    pub root_id: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub from_webhook: bool,
}

impl Post {
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self.post_type,
            PostType::Ephemeral | PostType::EphemeralAddToChannel
        )
    }

    pub fn is_system(&self) -> bool {
        matches!(self.post_type, PostType::System)
    }

    pub fn is_deleted(&self) -> bool {
        self.state == PostState::Deleted
    }
}

/// Posts keyed by id plus the newest-first order of a fetched page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostPage {
    pub order: Vec<String>,
    pub posts: HashMap<String, Post>,
}

impl PostPage {
    pub fn ordered(&self) -> Vec<Post> {
        self.order
            .iter()
            .filter_map(|id| self.posts.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelPostsStatus {
    pub at_start: bool,
    pub at_end: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Open,
    Private,
    Direct,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub kind: ChannelKind,
    #[serde(default)]
    pub last_post_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub last_viewed_at: Option<i64>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Older,
    Newer,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::Older => "older",
            Direction::Newer => "newer",
        }
    }
}

/// Pagination cursor for one direction of the post window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageCursor {
    pub loading: bool,
    pub all_loaded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PostVisibility {
    pub older_posts: PageCursor,
    pub newer_posts: PageCursor,
}

impl PostVisibility {
    pub fn cursor(&self, direction: Direction) -> PageCursor {
        match direction {
            Direction::Older => self.older_posts,
            Direction::Newer => self.newer_posts,
        }
    }

    pub fn cursor_mut(&mut self, direction: Direction) -> &mut PageCursor {
        match direction {
            Direction::Older => &mut self.older_posts,
            Direction::Newer => &mut self.newer_posts,
        }
    }
}

/// One completion offered for a slash command line. `complete` is the text
/// that replaces the pretext when the item is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandSuggestion {
    pub complete: String,
    pub suggestion: String,
    #[serde(default)]
    pub hint: String,
    #[serde(default)]
    pub description: String,
}

/// A registered slash trigger such as `/away`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTrigger {
    pub trigger: String,
    #[serde(default)]
    pub hint: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Text,
    Bool,
    StaticSelect,
    DynamicSelect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppField {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub positional: bool,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hint: String,
    #[serde(default)]
    pub options: Vec<SelectOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppForm {
    #[serde(default)]
    pub fields: Vec<AppField>,
}

/// Node of an app command tree. Leaves carry a form (or a call that
/// fetches one); inner nodes carry sub-bindings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppBinding {
    pub app_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hint: String,
    #[serde(default)]
    pub call: Option<String>,
    #[serde(default)]
    pub form: Option<AppForm>,
    #[serde(default)]
    pub bindings: Vec<AppBinding>,
}

/// Counts posts the current user has not seen yet. System messages count the
/// same as ordinary ones here, unlike the sidebar badge.
pub fn count_unread(posts: &[Post], last_viewed_at: i64, current_user_id: &str) -> usize {
    posts
        .iter()
        .filter(|post| {
            post.create_at > last_viewed_at
                && post.user_id != current_user_id
                && !post.is_deleted()
        })
        .count()
}
