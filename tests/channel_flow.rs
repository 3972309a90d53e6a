use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;

use teamchat_tui::data::{
    DemoOptions, DemoServer, LoadError, LoadPostsRequest, PageResult, PostService, SyncRequest,
};
use teamchat_tui::executor::{Executor, ManualExecutor};
use teamchat_tui::model::{Direction, Post, PostPage, POSTS_PER_PAGE};
use teamchat_tui::post_list::{PageLoader, PagingState, PostList, PostListConfig};
use teamchat_tui::post_utils::ListRow;
use teamchat_tui::post_view::{PostView, PostViewEvent};
use teamchat_tui::sidebar::{SectionKind, Sidebar};
use teamchat_tui::store::Store;

const NOW_MS: i64 = 4_102_444_800_000;

struct Flow {
    store: Arc<Store>,
    executor: Arc<ManualExecutor>,
    view: PostView,
    list: PostList,
}

impl Flow {
    fn open(channel: &str) -> Self {
        Self::open_with(channel, |server| server as Arc<dyn PostService>)
    }

    fn open_with(
        channel: &str,
        backend: impl FnOnce(Arc<DemoServer>) -> Arc<dyn PostService>,
    ) -> Self {
        let store = Arc::new(Store::new("me"));
        let server = Arc::new(DemoServer::new(store.clone(), DemoOptions::default()));
        let posts = backend(server);
        let executor = ManualExecutor::new();
        let shared: Arc<dyn Executor> = executor.clone();
        let mut view = PostView::new(channel, None, store.clone(), posts, shared);
        let config = PostListConfig {
            load_trigger: 5,
            load_trigger_ratio: 0.0,
            bottom_margin: 1,
            ..PostListConfig::default()
        };
        let mut list = PostList::new(config, "me", store.last_viewed_at(channel), None);
        list.set_client_height(20);
        view.mount();

        let mut flow = Self {
            store,
            executor,
            view,
            list,
        };
        flow.settle();
        flow
    }

    /// Every row is one line tall.
    fn refresh(&mut self) {
        let posts = self.view.posts();
        let snapshot = self.list.snapshot_before_update(&posts);
        let visibility = self.view.visibility();
        let rows = self.list.render(posts, visibility, &Utc).len();
        self.list
            .did_update(snapshot, vec![1; rows], &mut self.view, NOW_MS);
    }

    fn settle(&mut self) {
        self.refresh();
        loop {
            self.executor.run_all();
            let events = self.view.poll();
            if events.is_empty() {
                break;
            }
            for event in events {
                if let PostViewEvent::PageSettled { direction, outcome } = event {
                    self.list
                        .on_page_settled(direction, outcome, &mut self.view);
                }
            }
            self.refresh();
        }
    }

    fn scroll_to(&mut self, scroll_top: u32) {
        self.list.on_scroll(scroll_top);
        self.list
            .on_animation_frame(&mut self.view, Instant::now(), NOW_MS);
        self.settle();
    }
}

/// Serves the demo history but fails every page request.
struct BrokenPages {
    inner: Arc<DemoServer>,
    page_calls: Arc<AtomicUsize>,
}

impl PostService for BrokenPages {
    fn load_unreads(&self, channel_id: &str) -> Result<PostPage> {
        self.inner.load_unreads(channel_id)
    }
    fn load_posts(&self, _request: &LoadPostsRequest) -> Result<PageResult> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        Err(LoadError::Unavailable.into())
    }
    fn get_post_thread(&self, post_id: &str) -> Result<PostPage> {
        self.inner.get_post_thread(post_id)
    }
    fn sync_channel_posts(&self, request: &SyncRequest) -> Result<()> {
        self.inner.sync_channel_posts(request)
    }
    fn create_post(&self, channel_id: &str, message: &str) -> Result<Post> {
        self.inner.create_post(channel_id, message)
    }
}

#[test]
fn opening_a_channel_lands_on_the_unread_marker() {
    let flow = Flow::open("engineering");
    assert!(!flow.view.is_loading());
    assert_eq!(flow.view.posts().len(), 2 * POSTS_PER_PAGE);

    let marker = flow
        .list
        .rows()
        .iter()
        .position(|row| *row == ListRow::NewMessages)
        .expect("unread marker");
    assert_eq!(flow.list.viewport().scroll_top, marker as u32);
    assert!(!flow.list.is_at_bottom());
    assert!(flow.list.show_new_messages_below());
    assert_eq!(
        flow.list.rows().last(),
        Some(&ListRow::Loader(Direction::Newer))
    );
}

#[test]
fn scrolling_to_the_top_prepends_older_history_in_place() {
    let mut flow = Flow::open("engineering");
    let before = flow.view.posts().len();

    flow.scroll_to(0);

    assert_eq!(flow.view.posts().len(), before + POSTS_PER_PAGE);
    assert!(flow.list.viewport().scroll_top >= POSTS_PER_PAGE as u32);
    assert_eq!(flow.list.paging_state(Direction::Older), PagingState::Idle);
}

#[test]
fn scrolling_to_the_bottom_catches_up_and_stops() {
    let mut flow = Flow::open("engineering");

    flow.scroll_to(u32::MAX);

    assert!(flow.view.visibility().newer_posts.all_loaded);
    assert_eq!(
        flow.list.paging_state(Direction::Newer),
        PagingState::Exhausted
    );
    assert!(flow
        .list
        .rows()
        .last()
        .map(|row| row.post_id().is_some())
        .unwrap_or(false));
    assert!(flow.list.is_at_bottom());
    assert_eq!(flow.list.last_viewed_at(), NOW_MS);
    assert_eq!(
        flow.view.posts().first().map(|post| post.id.as_str()),
        Some("engineering-00240")
    );
    assert!(flow.store.channel_posts_status("engineering").is_some_and(|status| status.at_end));
}

#[test]
fn failing_pages_fall_back_to_manual_loading() {
    let page_calls = Arc::new(AtomicUsize::new(0));
    let calls = page_calls.clone();
    let mut flow = Flow::open_with("engineering", move |inner| {
        Arc::new(BrokenPages {
            inner,
            page_calls: calls,
        })
    });

    flow.scroll_to(0);

    assert_eq!(page_calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        flow.list.paging_state(Direction::Older),
        PagingState::Failed(3)
    );
    assert!(!flow.list.auto_retry_enabled(Direction::Older));
    assert_eq!(flow.list.rows()[0], ListRow::ManualLoad(Direction::Older));

    assert!(flow.list.manual_load(Direction::Older, &mut flow.view));
    flow.settle();
    assert_eq!(page_calls.load(Ordering::SeqCst), 5);
    assert_eq!(flow.list.rows()[0], ListRow::ManualLoad(Direction::Older));
}

#[test]
fn sidebar_tracks_unread_channels_from_the_store() {
    let store = Arc::new(Store::new("me"));
    let _server = DemoServer::new(store.clone(), DemoOptions::default());
    let mut sidebar = Sidebar::new(true);
    sidebar.refresh(&store.channels(), &store.favorites(), &store.unread_channels());

    let unread = &sidebar.sections()[0];
    assert_eq!(unread.kind, SectionKind::Unread);
    assert_eq!(unread.channel_ids, vec!["dm-ada", "engineering", "town-square"]);
    assert_eq!(
        sidebar.next_unread_channel_id("dm-ada", 1),
        Some("engineering")
    );
    assert_eq!(
        sidebar.next_unread_channel_id("dm-ada", -1),
        Some("town-square")
    );

    store.mark_channel_viewed("engineering", NOW_MS);
    sidebar.refresh(&store.channels(), &store.favorites(), &store.unread_channels());
    let unread = &sidebar.sections()[0];
    assert_eq!(unread.kind, SectionKind::Unread);
    assert!(!unread.channel_ids.contains(&"engineering".to_string()));
    assert!(sidebar.sections()[1].channel_ids.contains(&"engineering".to_string()));
}
