use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::model::{Channel, ChannelPostsStatus, Group, Post, PostPage, UserProfile};

/// Client-side state shared between the data layer and the controllers.
/// Controllers read snapshots; only the data layer and explicit status
/// updates write.
#[derive(Default)]
pub struct Store {
    current_user_id: RwLock<String>,
    channels: RwLock<Vec<Channel>>,
    favorites: RwLock<HashSet<String>>,
    unread_channels: RwLock<HashSet<String>>,
    last_viewed_at: RwLock<HashMap<String, i64>>,
    posts: RwLock<HashMap<String, Vec<Post>>>,
    backups: RwLock<HashMap<String, Vec<Post>>>,
    posts_status: RwLock<HashMap<String, ChannelPostsStatus>>,
    synced_channels: RwLock<HashSet<String>>,
    channel_members: RwLock<HashMap<String, Vec<UserProfile>>>,
    profiles: RwLock<HashMap<String, UserProfile>>,
    groups: RwLock<Vec<Group>>,
    connection: RwLock<Connection>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Connection {
    pub connected: bool,
    pub last_disconnect_at: i64,
}

impl Store {
    pub fn new(current_user_id: impl Into<String>) -> Self {
        let store = Self::default();
        *store.current_user_id.write() = current_user_id.into();
        store.connection.write().connected = true;
        store
    }

    pub fn current_user_id(&self) -> String {
        self.current_user_id.read().clone()
    }

    pub fn set_channels(&self, channels: Vec<Channel>) {
        *self.channels.write() = channels;
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.channels.read().clone()
    }

    pub fn channel(&self, channel_id: &str) -> Option<Channel> {
        self.channels
            .read()
            .iter()
            .find(|channel| channel.id == channel_id)
            .cloned()
    }

    pub fn set_favorite(&self, channel_id: &str, favorite: bool) {
        let mut favorites = self.favorites.write();
        if favorite {
            favorites.insert(channel_id.to_string());
        } else {
            favorites.remove(channel_id);
        }
    }

    pub fn favorites(&self) -> HashSet<String> {
        self.favorites.read().clone()
    }

    pub fn mark_unread(&self, channel_id: &str) {
        self.unread_channels.write().insert(channel_id.to_string());
    }

    pub fn unread_channels(&self) -> HashSet<String> {
        self.unread_channels.read().clone()
    }

    pub fn last_viewed_at(&self, channel_id: &str) -> i64 {
        self.last_viewed_at
            .read()
            .get(channel_id)
            .copied()
            .unwrap_or_default()
    }

    /// Records that the user has seen the channel up to `at`.
    pub fn mark_channel_viewed(&self, channel_id: &str, at: i64) {
        self.last_viewed_at.write().insert(channel_id.to_string(), at);
        self.unread_channels.write().remove(channel_id);
    }

    /// Newest-first window of posts currently held for the channel.
    pub fn posts_in_channel(&self, channel_id: &str) -> Vec<Post> {
        self.posts
            .read()
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Merges fetched posts into the channel window, keeping it newest-first
    /// and de-duplicated by id. A pending post is replaced by its server copy.
    pub fn receive_posts(&self, channel_id: &str, page: &PostPage) {
        if page.is_empty() {
            return;
        }
        let mut all = self.posts.write();
        let window = all.entry(channel_id.to_string()).or_default();
        for post in page.posts.values() {
            if let Some(pending) = post.pending_post_id.as_deref() {
                window.retain(|existing| existing.id != pending || pending == post.id);
            }
            match window.iter_mut().find(|existing| existing.id == post.id) {
                Some(existing) => *existing = post.clone(),
                None => window.push(post.clone()),
            }
        }
        window.sort_by(|a, b| b.create_at.cmp(&a.create_at).then_with(|| b.id.cmp(&a.id)));
    }

    pub fn receive_post(&self, post: Post) {
        let channel_id = post.channel_id.clone();
        let mut page = PostPage::default();
        page.order.push(post.id.clone());
        page.posts.insert(post.id.clone(), post);
        self.receive_posts(&channel_id, &page);
        self.mark_unread(&channel_id);
    }

    /// Moves the channel window aside so a failed reload can restore it.
    pub fn clear_channel_posts_with_backup(&self, channel_id: &str) {
        let removed = self.posts.write().remove(channel_id).unwrap_or_default();
        self.backups.write().insert(channel_id.to_string(), removed);
        self.posts_status.write().remove(channel_id);
    }

    /// Puts the backed-up window back. Returns false when there was none.
    pub fn restore_channel_posts_from_backup(&self, channel_id: &str) -> bool {
        let Some(backup) = self.backups.write().remove(channel_id) else {
            return false;
        };
        let mut page = PostPage::default();
        for post in backup {
            page.order.push(post.id.clone());
            page.posts.insert(post.id.clone(), post);
        }
        self.receive_posts(channel_id, &page);
        true
    }

    pub fn discard_backup(&self, channel_id: &str) {
        self.backups.write().remove(channel_id);
    }

    pub fn channel_posts_status(&self, channel_id: &str) -> Option<ChannelPostsStatus> {
        self.posts_status.read().get(channel_id).copied()
    }

    /// Updates only the flags that are given.
    pub fn change_channel_posts_status(
        &self,
        channel_id: &str,
        at_start: Option<bool>,
        at_end: Option<bool>,
    ) {
        let mut statuses = self.posts_status.write();
        let status = statuses.entry(channel_id.to_string()).or_default();
        if let Some(at_start) = at_start {
            status.at_start = at_start;
        }
        if let Some(at_end) = at_end {
            status.at_end = at_end;
        }
    }

    pub fn channel_sync_completed(&self, channel_id: &str) {
        self.synced_channels.write().insert(channel_id.to_string());
    }

    pub fn is_channel_synced(&self, channel_id: &str) -> bool {
        self.synced_channels.read().contains(channel_id)
    }

    pub fn add_profiles(&self, profiles: &[UserProfile]) {
        let mut all = self.profiles.write();
        for profile in profiles {
            all.insert(profile.id.clone(), profile.clone());
        }
    }

    pub fn profile(&self, user_id: &str) -> Option<UserProfile> {
        self.profiles.read().get(user_id).cloned()
    }

    pub fn set_channel_members(&self, channel_id: &str, members: Vec<UserProfile>) {
        self.add_profiles(&members);
        self.channel_members
            .write()
            .insert(channel_id.to_string(), members);
    }

    pub fn channel_members(&self, channel_id: &str) -> Vec<UserProfile> {
        self.channel_members
            .read()
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_groups(&self, groups: Vec<Group>) {
        *self.groups.write() = groups;
    }

    pub fn groups(&self) -> Vec<Group> {
        self.groups.read().clone()
    }

    pub fn connection(&self) -> Connection {
        *self.connection.read()
    }

    pub fn set_connected(&self, connected: bool, now: i64) {
        let mut connection = self.connection.write();
        if connection.connected && !connected {
            connection.last_disconnect_at = now;
            self.synced_channels.write().clear();
        }
        connection.connected = connected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(posts: &[(&str, i64)]) -> PostPage {
        let mut page = PostPage::default();
        for (id, at) in posts {
            page.order.push(id.to_string());
            page.posts.insert(
                id.to_string(),
                Post {
                    id: id.to_string(),
                    create_at: *at,
                    channel_id: "c1".into(),
                    user_id: "u1".into(),
                    ..Post::default()
                },
            );
        }
        page
    }

    #[test]
    fn receive_posts_keeps_newest_first_without_duplicates() {
        let store = Store::new("me");
        store.receive_posts("c1", &page(&[("a", 100), ("b", 300)]));
        store.receive_posts("c1", &page(&[("b", 300), ("c", 200)]));
        let ids: Vec<_> = store
            .posts_in_channel("c1")
            .into_iter()
            .map(|post| post.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn pending_post_is_replaced_by_server_copy() {
        let store = Store::new("me");
        store.receive_posts("c1", &page(&[("pending-1", 100)]));
        let mut confirmed = page(&[("p1", 101)]);
        if let Some(post) = confirmed.posts.get_mut("p1") {
            post.pending_post_id = Some("pending-1".into());
        }
        store.receive_posts("c1", &confirmed);
        let posts = store.posts_in_channel("c1");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "p1");
    }

    #[test]
    fn backup_round_trip() {
        let store = Store::new("me");
        store.receive_posts("c1", &page(&[("a", 1)]));
        store.change_channel_posts_status("c1", Some(true), Some(true));
        store.clear_channel_posts_with_backup("c1");
        assert!(store.posts_in_channel("c1").is_empty());
        assert_eq!(store.channel_posts_status("c1"), None);
        assert!(store.restore_channel_posts_from_backup("c1"));
        assert_eq!(store.posts_in_channel("c1").len(), 1);
        assert!(!store.restore_channel_posts_from_backup("c1"));
    }

    #[test]
    fn status_update_touches_only_given_flags() {
        let store = Store::new("me");
        store.change_channel_posts_status("c1", Some(true), None);
        store.change_channel_posts_status("c1", None, Some(true));
        store.change_channel_posts_status("c1", Some(false), None);
        assert_eq!(
            store.channel_posts_status("c1"),
            Some(ChannelPostsStatus {
                at_start: false,
                at_end: true
            })
        );
    }

    #[test]
    fn disconnect_records_timestamp() {
        let store = Store::new("me");
        store.set_connected(false, 42);
        store.set_connected(false, 99);
        assert_eq!(store.connection().last_disconnect_at, 42);
        store.set_connected(true, 100);
        assert!(store.connection().connected);
    }

    #[test]
    fn disconnect_marks_channels_unsynced() {
        let store = Store::new("me");
        store.channel_sync_completed("c1");
        assert!(store.is_channel_synced("c1"));
        store.set_connected(false, 1);
        assert!(!store.is_channel_synced("c1"));
    }
}
