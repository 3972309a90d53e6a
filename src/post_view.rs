use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::data::{LoadPostsRequest, PageKind, PageResult, PostService, SyncRequest};
use crate::executor::SharedExecutor;
use crate::model::{
    count_unread, ChannelPostsStatus, Direction, Post, PostPage, PostVisibility, POSTS_PER_PAGE,
};
use crate::post_list::{PageLoader, PageOutcome};
use crate::store::Store;

/// What the view reports back to its owner after applying responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostViewEvent {
    PageSettled {
        direction: Direction,
        outcome: PageOutcome,
    },
    InitialLoadFinished {
        ok: bool,
    },
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermalinkBranch {
    Thread,
    Page(Direction),
}

enum Response {
    Unreads {
        generation: u64,
        previous_status: Option<ChannelPostsStatus>,
        result: Result<PostPage>,
    },
    Permalink {
        generation: u64,
        branch: PermalinkBranch,
        result: Result<Option<PageResult>>,
    },
    Page {
        generation: u64,
        direction: Direction,
        result: Result<PageResult>,
    },
    Sync {
        generation: u64,
        result: Result<()>,
    },
}

/// Decides which pages a channel needs and keeps the older/newer cursors the
/// post list reads. Requests run on the executor; their results come back
/// through [`PostView::poll`].
pub struct PostView {
    channel_id: String,
    focused_post_id: Option<String>,
    store: Arc<Store>,
    posts: Arc<dyn PostService>,
    executor: SharedExecutor,
    visibility: PostVisibility,
    loading_initial: bool,
    permalink_pending: usize,
    permalink_ok: bool,
    generation: u64,
    was_connected: bool,
    tx: Sender<Response>,
    rx: Receiver<Response>,
}

impl PostView {
    pub fn new(
        channel_id: impl Into<String>,
        focused_post_id: Option<String>,
        store: Arc<Store>,
        posts: Arc<dyn PostService>,
        executor: SharedExecutor,
    ) -> Self {
        let (tx, rx) = unbounded();
        let was_connected = store.connection().connected;
        Self {
            channel_id: channel_id.into(),
            focused_post_id,
            store,
            posts,
            executor,
            visibility: PostVisibility::default(),
            loading_initial: false,
            permalink_pending: 0,
            permalink_ok: false,
            generation: 0,
            was_connected,
            tx,
            rx,
        }
    }

    /// Starts whatever load the channel needs on entry.
    pub fn mount(&mut self) {
        let status = self.store.channel_posts_status(&self.channel_id);
        if let Some(status) = status {
            self.visibility.older_posts.all_loaded = status.at_start;
            self.visibility.newer_posts.all_loaded = status.at_end;
        }

        if let Some(focused) = self.focused_post_id.clone() {
            self.load_permalink(&focused);
            return;
        }

        let should_load = status.map(|status| !status.at_end).unwrap_or(true);
        if should_load {
            self.load_unreads();
        } else if !self.store.is_channel_synced(&self.channel_id) {
            self.sync();
        } else {
            debug!(channel = %self.channel_id, "post_view: window is current, no load");
        }
    }

    /// Moves the view to another channel. Responses still in flight for the
    /// previous one are dropped when they arrive.
    pub fn switch_channel(&mut self, channel_id: impl Into<String>, focused_post_id: Option<String>) {
        self.channel_id = channel_id.into();
        self.focused_post_id = focused_post_id;
        self.reset();
        self.mount();
    }

    /// Discards the current window and loads the newest unread chunk again.
    pub fn jump_to_latest(&mut self) {
        self.focused_post_id = None;
        self.reset();
        self.load_unreads();
    }

    fn reset(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.visibility = PostVisibility::default();
        self.loading_initial = false;
        self.permalink_pending = 0;
        self.permalink_ok = false;
    }

    fn load_unreads(&mut self) {
        self.loading_initial = true;
        let channel_id = self.channel_id.clone();
        let previous_status = self.store.channel_posts_status(&channel_id);
        self.store.clear_channel_posts_with_backup(&channel_id);

        let generation = self.generation;
        let posts = self.posts.clone();
        let tx = self.tx.clone();
        info!(channel = %channel_id, "post_view: loading unread chunk");
        self.executor.spawn(Box::new(move || {
            let result = posts.load_unreads(&channel_id);
            let _ = tx.send(Response::Unreads {
                generation,
                previous_status,
                result,
            });
        }));
    }

    fn load_permalink(&mut self, focused: &str) {
        self.loading_initial = true;
        self.permalink_pending = 3;
        self.permalink_ok = false;
        info!(channel = %self.channel_id, post = focused, "post_view: loading permalink");

        let branches = [
            PermalinkBranch::Thread,
            PermalinkBranch::Page(Direction::Older),
            PermalinkBranch::Page(Direction::Newer),
        ];
        for branch in branches {
            let generation = self.generation;
            let posts = self.posts.clone();
            let tx = self.tx.clone();
            let channel_id = self.channel_id.clone();
            let post_id = focused.to_string();
            self.executor.spawn(Box::new(move || {
                let result = match branch {
                    PermalinkBranch::Thread => posts.get_post_thread(&post_id).map(|_| None),
                    PermalinkBranch::Page(direction) => posts
                        .load_posts(&LoadPostsRequest {
                            channel_id,
                            post_id,
                            kind: page_kind(direction),
                        })
                        .map(Some),
                };
                let _ = tx.send(Response::Permalink {
                    generation,
                    branch,
                    result,
                });
            }));
        }
    }

    fn load_page(&mut self, direction: Direction) -> bool {
        let cursor = self.visibility.cursor(direction);
        if cursor.loading || cursor.all_loaded || self.loading_initial {
            return false;
        }
        let window = self.store.posts_in_channel(&self.channel_id);
        let anchor = match direction {
            Direction::Older => window.iter().rev().find(|post| !post.is_ephemeral()),
            Direction::Newer => window.iter().find(|post| !post.is_ephemeral()),
        };
        let Some(anchor) = anchor else {
            return false;
        };

        self.visibility.cursor_mut(direction).loading = true;
        let request = LoadPostsRequest {
            channel_id: self.channel_id.clone(),
            post_id: anchor.id.clone(),
            kind: page_kind(direction),
        };
        let generation = self.generation;
        let posts = self.posts.clone();
        let tx = self.tx.clone();
        self.executor.spawn(Box::new(move || {
            let result = posts.load_posts(&request);
            let _ = tx.send(Response::Page {
                generation,
                direction,
                result,
            });
        }));
        true
    }

    fn sync(&mut self) {
        let request = SyncRequest {
            channel_id: self.channel_id.clone(),
            status: self.store.channel_posts_status(&self.channel_id),
            posts: self.store.posts_in_channel(&self.channel_id),
            last_disconnect_at: self.store.connection().last_disconnect_at,
        };
        debug!(channel = %request.channel_id, posts = request.posts.len(), "post_view: syncing");
        let generation = self.generation;
        let posts = self.posts.clone();
        let tx = self.tx.clone();
        self.executor.spawn(Box::new(move || {
            let result = posts.sync_channel_posts(&request);
            let _ = tx.send(Response::Sync { generation, result });
        }));
    }

    /// Feeds the websocket connection state. A reconnect re-syncs the channel.
    pub fn on_socket_status(&mut self, connected: bool) {
        let reconnected = connected && !self.was_connected;
        self.was_connected = connected;
        if reconnected {
            info!(channel = %self.channel_id, "post_view: reconnected, resyncing");
            self.sync();
        }
    }

    /// Applies every response received so far.
    pub fn poll(&mut self) -> Vec<PostViewEvent> {
        let responses: Vec<Response> = self.rx.try_iter().collect();
        let mut events = Vec::new();
        for response in responses {
            if let Some(event) = self.apply(response) {
                events.push(event);
            }
        }
        events
    }

    fn apply(&mut self, response: Response) -> Option<PostViewEvent> {
        match response {
            Response::Unreads {
                generation,
                previous_status,
                result,
            } if generation == self.generation => {
                self.apply_unreads(previous_status, result)
            }
            Response::Permalink {
                generation,
                branch,
                result,
            } if generation == self.generation => self.apply_permalink(branch, result),
            Response::Page {
                generation,
                direction,
                result,
            } if generation == self.generation => {
                self.visibility.cursor_mut(direction).loading = false;
                let outcome = match result {
                    Ok(page) => {
                        self.mark_loaded(direction, !page.more_to_load);
                        self.publish_status();
                        PageOutcome::Loaded {
                            more_to_load: page.more_to_load,
                        }
                    }
                    Err(err) => {
                        warn!(
                            channel = %self.channel_id,
                            direction = direction.label(),
                            "post_view: page load failed: {err:#}"
                        );
                        PageOutcome::Failed
                    }
                };
                Some(PostViewEvent::PageSettled { direction, outcome })
            }
            Response::Sync { generation, result } if generation == self.generation => {
                match result {
                    Ok(()) => {
                        self.store.channel_sync_completed(&self.channel_id);
                        Some(PostViewEvent::Synced)
                    }
                    Err(err) => {
                        warn!(channel = %self.channel_id, "post_view: sync failed: {err:#}");
                        None
                    }
                }
            }
            _ => {
                debug!("post_view: dropped stale response");
                None
            }
        }
    }

    fn apply_unreads(
        &mut self,
        previous_status: Option<ChannelPostsStatus>,
        result: Result<PostPage>,
    ) -> Option<PostViewEvent> {
        self.loading_initial = false;
        let page = match result {
            Ok(page) => page,
            Err(err) => {
                warn!(channel = %self.channel_id, "post_view: unread load failed: {err:#}");
                self.store.restore_channel_posts_from_backup(&self.channel_id);
                if let Some(status) = previous_status {
                    self.store.change_channel_posts_status(
                        &self.channel_id,
                        Some(status.at_start),
                        Some(status.at_end),
                    );
                }
                return Some(PostViewEvent::InitialLoadFinished { ok: false });
            }
        };
        self.store.discard_backup(&self.channel_id);

        if page.len() < POSTS_PER_PAGE {
            self.mark_loaded(Direction::Older, true);
            self.mark_loaded(Direction::Newer, true);
        } else {
            let unread = count_unread(
                &page.ordered(),
                self.store.last_viewed_at(&self.channel_id),
                &self.store.current_user_id(),
            );
            self.mark_loaded(Direction::Newer, unread < POSTS_PER_PAGE);
        }
        self.publish_status();
        self.store.channel_sync_completed(&self.channel_id);
        debug!(
            channel = %self.channel_id,
            posts = page.len(),
            older_done = self.visibility.older_posts.all_loaded,
            newer_done = self.visibility.newer_posts.all_loaded,
            "post_view: unread chunk applied"
        );
        Some(PostViewEvent::InitialLoadFinished { ok: true })
    }

    fn apply_permalink(
        &mut self,
        branch: PermalinkBranch,
        result: Result<Option<PageResult>>,
    ) -> Option<PostViewEvent> {
        self.permalink_pending = self.permalink_pending.saturating_sub(1);
        match result {
            Ok(page) => {
                self.permalink_ok = true;
                if let (PermalinkBranch::Page(direction), Some(page)) = (branch, page) {
                    self.mark_loaded(direction, !page.more_to_load);
                }
            }
            Err(err) => {
                warn!(channel = %self.channel_id, ?branch, "post_view: permalink branch failed: {err:#}");
            }
        }
        if self.permalink_pending > 0 {
            return None;
        }
        self.loading_initial = false;
        self.publish_status();
        Some(PostViewEvent::InitialLoadFinished {
            ok: self.permalink_ok,
        })
    }

    /// Cursors only move towards "all loaded" until the view is reset.
    fn mark_loaded(&mut self, direction: Direction, all_loaded: bool) {
        let cursor = self.visibility.cursor_mut(direction);
        cursor.all_loaded |= all_loaded;
    }

    fn publish_status(&self) {
        self.store.change_channel_posts_status(
            &self.channel_id,
            Some(self.visibility.older_posts.all_loaded),
            Some(self.visibility.newer_posts.all_loaded),
        );
    }

    pub fn posts(&self) -> Vec<Post> {
        self.store.posts_in_channel(&self.channel_id)
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn focused_post_id(&self) -> Option<&str> {
        self.focused_post_id.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading_initial
    }
}

impl PageLoader for PostView {
    fn load_older_posts(&mut self) -> bool {
        self.load_page(Direction::Older)
    }

    fn load_newer_posts(&mut self) -> bool {
        self.load_page(Direction::Newer)
    }

    fn visibility(&self) -> PostVisibility {
        self.visibility
    }

    fn initial_load_pending(&self) -> bool {
        self.loading_initial
    }
}

fn page_kind(direction: Direction) -> PageKind {
    match direction {
        Direction::Older => PageKind::Before,
        Direction::Newer => PageKind::After,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DemoOptions, DemoServer, LoadError};
    use crate::executor::{Executor, ManualExecutor};

    struct Harness {
        store: Arc<Store>,
        server: Arc<DemoServer>,
        executor: Arc<ManualExecutor>,
    }

    impl Harness {
        fn new(options: DemoOptions) -> Self {
            let store = Arc::new(Store::new(options.current_user_id.clone()));
            let server = Arc::new(DemoServer::new(store.clone(), options));
            Self {
                store,
                server,
                executor: ManualExecutor::new(),
            }
        }

        fn view(&self, channel: &str, focused: Option<&str>) -> PostView {
            self.view_with(channel, focused, self.server.clone())
        }

        fn view_with(
            &self,
            channel: &str,
            focused: Option<&str>,
            posts: Arc<dyn PostService>,
        ) -> PostView {
            let executor: Arc<dyn Executor> = self.executor.clone();
            PostView::new(
                channel,
                focused.map(str::to_string),
                self.store.clone(),
                posts,
                executor,
            )
        }
    }

    /// Serves everything from the demo backend except post threads.
    struct NoThreads(Arc<DemoServer>);

    impl PostService for NoThreads {
        fn load_unreads(&self, channel_id: &str) -> Result<PostPage> {
            self.0.load_unreads(channel_id)
        }
        fn load_posts(&self, request: &LoadPostsRequest) -> Result<PageResult> {
            self.0.load_posts(request)
        }
        fn get_post_thread(&self, _post_id: &str) -> Result<PostPage> {
            Err(LoadError::Unavailable.into())
        }
        fn sync_channel_posts(&self, request: &SyncRequest) -> Result<()> {
            self.0.sync_channel_posts(request)
        }
        fn create_post(&self, channel_id: &str, message: &str) -> Result<Post> {
            self.0.create_post(channel_id, message)
        }
    }

    #[test]
    fn long_unread_tail_leaves_newer_pages_open() {
        let h = Harness::new(DemoOptions::default());
        let mut view = h.view("engineering", None);
        view.mount();
        assert!(view.is_loading());
        assert_eq!(h.executor.run_all(), 1);

        assert_eq!(
            view.poll(),
            vec![PostViewEvent::InitialLoadFinished { ok: true }]
        );
        assert!(!view.is_loading());
        assert_eq!(view.posts().len(), 2 * POSTS_PER_PAGE);
        assert!(!view.visibility().newer_posts.all_loaded);
        assert!(!view.visibility().older_posts.all_loaded);
    }

    #[test]
    fn short_unread_tail_marks_newer_loaded() {
        let h = Harness::new(DemoOptions::default());
        let mut view = h.view("town-square", None);
        view.mount();
        h.executor.run_all();
        view.poll();
        assert!(view.visibility().newer_posts.all_loaded);
        assert_eq!(
            h.store.channel_posts_status("town-square"),
            Some(ChannelPostsStatus {
                at_start: false,
                at_end: true
            })
        );
    }

    #[test]
    fn small_channel_is_loaded_both_ways() {
        let h = Harness::new(DemoOptions::default());
        let mut view = h.view("design", None);
        view.mount();
        h.executor.run_all();
        view.poll();
        let visibility = view.visibility();
        assert!(visibility.older_posts.all_loaded);
        assert!(visibility.newer_posts.all_loaded);
    }

    #[test]
    fn revisit_at_end_skips_initial_load() {
        let h = Harness::new(DemoOptions::default());
        let mut first = h.view("town-square", None);
        first.mount();
        h.executor.run_all();
        first.poll();

        let mut again = h.view("town-square", None);
        again.mount();
        assert_eq!(h.executor.pending(), 0);
        assert!(again.visibility().newer_posts.all_loaded);
    }

    #[test]
    fn failed_reload_restores_previous_window() {
        let h = Harness::new(DemoOptions::default());
        let mut first = h.view("engineering", None);
        first.mount();
        h.executor.run_all();
        first.poll();
        let before = h.store.posts_in_channel("engineering").len();
        let status = h.store.channel_posts_status("engineering");

        let failing = Arc::new(DemoServer::new(
            Arc::new(Store::new("me")),
            DemoOptions {
                failure_rate: 1.0,
                ..DemoOptions::default()
            },
        ));
        let mut view = h.view_with("engineering", None, failing);
        view.mount();
        assert!(h.store.posts_in_channel("engineering").is_empty());
        h.executor.run_all();
        assert_eq!(
            view.poll(),
            vec![PostViewEvent::InitialLoadFinished { ok: false }]
        );
        assert_eq!(h.store.posts_in_channel("engineering").len(), before);
        assert_eq!(h.store.channel_posts_status("engineering"), status);
    }

    #[test]
    fn permalink_waits_for_all_three_requests() {
        let h = Harness::new(DemoOptions::default());
        let mut view = h.view("off-topic", Some("off-topic-00100"));
        view.mount();
        assert_eq!(h.executor.pending(), 3);

        h.executor.run_next();
        h.executor.run_next();
        assert!(view.poll().is_empty());
        assert!(view.is_loading());

        h.executor.run_next();
        assert_eq!(
            view.poll(),
            vec![PostViewEvent::InitialLoadFinished { ok: true }]
        );
        assert!(!view.is_loading());
        assert!(view
            .posts()
            .iter()
            .any(|post| post.id == "off-topic-00100"));
    }

    #[test]
    fn permalink_branch_failure_is_isolated() {
        let h = Harness::new(DemoOptions::default());
        let posts = Arc::new(NoThreads(h.server.clone()));
        let mut view = h.view_with("off-topic", Some("off-topic-00100"), posts);
        view.mount();
        h.executor.run_all();
        assert_eq!(
            view.poll(),
            vec![PostViewEvent::InitialLoadFinished { ok: true }]
        );
        assert_eq!(view.posts().len(), 2 * POSTS_PER_PAGE);
    }

    #[test]
    fn only_one_older_request_in_flight() {
        let h = Harness::new(DemoOptions::default());
        let mut view = h.view("engineering", None);
        view.mount();
        h.executor.run_all();
        view.poll();

        assert!(view.load_older_posts());
        assert!(!view.load_older_posts());
        assert_eq!(h.executor.pending(), 1);
        h.executor.run_all();
        assert_eq!(
            view.poll(),
            vec![PostViewEvent::PageSettled {
                direction: Direction::Older,
                outcome: PageOutcome::Loaded { more_to_load: true }
            }]
        );
        assert!(view.load_older_posts());
    }

    #[test]
    fn reconnect_triggers_sync() {
        let h = Harness::new(DemoOptions::default());
        let mut view = h.view("town-square", None);
        view.mount();
        h.executor.run_all();
        view.poll();

        h.store.set_connected(false, 1);
        view.on_socket_status(false);
        assert_eq!(h.executor.pending(), 0);
        h.store.set_connected(true, 2);
        view.on_socket_status(true);
        view.on_socket_status(true);
        assert_eq!(h.executor.pending(), 1);
        h.executor.run_all();
        assert_eq!(view.poll(), vec![PostViewEvent::Synced]);
        assert!(h.store.is_channel_synced("town-square"));
    }

    #[test]
    fn responses_for_previous_channel_are_dropped() {
        let h = Harness::new(DemoOptions::default());
        let mut view = h.view("engineering", None);
        view.mount();
        view.switch_channel("town-square", None);
        assert_eq!(h.executor.pending(), 2);
        h.executor.run_all();
        assert_eq!(
            view.poll(),
            vec![PostViewEvent::InitialLoadFinished { ok: true }]
        );
        assert_eq!(view.channel_id(), "town-square");
    }
}
