use std::time::{Duration, Instant};

use chrono::TimeZone;
use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::events::{EventBus, SubscriptionId, Topic, ViewEvent};
use crate::model::{
    count_unread, Direction, Post, PostVisibility, MAX_POST_VISIBILITY, POSTS_PER_PAGE,
};
use crate::post_utils::{self, ListRow};

/// How long after the last scroll event the list counts as "still scrolling".
pub const SCROLL_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostListConfig {
    /// Minimum distance from an edge, in layout units, that triggers a load.
    pub load_trigger: u32,
    /// Fraction of the content height that also counts as "near an edge".
    pub load_trigger_ratio: f32,
    pub bottom_margin: u32,
    pub max_auto_retries: u32,
    pub max_extra_pages: u32,
}

impl Default for PostListConfig {
    fn default() -> Self {
        Self {
            load_trigger: 300,
            load_trigger_ratio: 0.3,
            bottom_margin: 10,
            max_auto_retries: 3,
            max_extra_pages: 10,
        }
    }
}

/// The paged data source behind the list.
pub trait PageLoader {
    /// Returns true when a request was actually issued.
    fn load_older_posts(&mut self) -> bool;
    fn load_newer_posts(&mut self) -> bool;
    fn visibility(&self) -> PostVisibility;
    fn initial_load_pending(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PagingState {
    #[default]
    Idle,
    Loading {
        retries: u32,
    },
    Failed(u32),
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Loaded { more_to_load: bool },
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pager {
    state: PagingState,
    auto_retry: bool,
}

impl Default for Pager {
    fn default() -> Self {
        Self {
            state: PagingState::Idle,
            auto_retry: true,
        }
    }
}

impl Pager {
    fn retries(&self) -> u32 {
        match self.state {
            PagingState::Loading { retries } | PagingState::Failed(retries) => retries,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Viewport {
    pub scroll_top: u32,
    pub scroll_height: u32,
    pub client_height: u32,
}

impl Viewport {
    pub fn max_scroll_top(&self) -> u32 {
        self.scroll_height.saturating_sub(self.client_height)
    }

    pub fn distance_from_bottom(&self) -> u32 {
        self.max_scroll_top().saturating_sub(self.scroll_top)
    }

    fn clamp(&mut self) {
        self.scroll_top = self.scroll_top.min(self.max_scroll_top());
    }
}

/// What changed between two renders, captured before the new rows are
/// measured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSnapshot {
    changed: bool,
    has_new_posts: bool,
    new_post_at_bottom: bool,
    posts_added_at_top: bool,
    was_at_bottom: bool,
    viewport: Viewport,
}

struct Subscriptions {
    resize: (SubscriptionId, Receiver<ViewEvent>),
    scroll: (SubscriptionId, Receiver<ViewEvent>),
}

/// Scroll and pagination state for one channel's message list.
pub struct PostList {
    config: PostListConfig,
    current_user_id: String,
    focused_post_id: Option<String>,
    last_viewed_at: i64,
    posts: Vec<Post>,
    rows: Vec<ListRow>,
    heights: Vec<u32>,
    viewport: Viewport,
    at_bottom: bool,
    placed: bool,
    has_scrolled: bool,
    unread_below: usize,
    older: Pager,
    newer: Pager,
    extra_pages_loaded: u32,
    next_frame: u64,
    pending_frame: Option<u64>,
    scroll_stop_at: Option<Instant>,
    floating_post: Option<String>,
    subscriptions: Option<Subscriptions>,
}

impl PostList {
    pub fn new(
        config: PostListConfig,
        current_user_id: impl Into<String>,
        last_viewed_at: i64,
        focused_post_id: Option<String>,
    ) -> Self {
        Self {
            config,
            current_user_id: current_user_id.into(),
            focused_post_id,
            last_viewed_at,
            posts: Vec::new(),
            rows: Vec::new(),
            heights: Vec::new(),
            viewport: Viewport::default(),
            at_bottom: false,
            placed: false,
            has_scrolled: false,
            unread_below: 0,
            older: Pager::default(),
            newer: Pager::default(),
            extra_pages_loaded: 0,
            next_frame: 0,
            pending_frame: None,
            scroll_stop_at: None,
            floating_post: None,
            subscriptions: None,
        }
    }

    /// Registers the resize and scroll-change listeners. Calling it again
    /// while mounted does nothing.
    pub fn mount(&mut self, bus: &EventBus) {
        if self.subscriptions.is_some() {
            return;
        }
        self.subscriptions = Some(Subscriptions {
            resize: bus.subscribe(Topic::WindowResize),
            scroll: bus.subscribe(Topic::ScrollChange),
        });
    }

    pub fn unmount(&mut self, bus: &EventBus) {
        if let Some(subs) = self.subscriptions.take() {
            bus.unsubscribe(subs.resize.0);
            bus.unsubscribe(subs.scroll.0);
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.subscriptions.is_some()
    }

    /// Applies bus events received since the last call.
    pub fn pump_events(&mut self) -> bool {
        let Some(subs) = self.subscriptions.as_ref() else {
            return false;
        };
        let mut events: Vec<ViewEvent> = subs.resize.1.try_iter().collect();
        events.extend(subs.scroll.1.try_iter());
        let handled = !events.is_empty();
        for event in events {
            match event {
                ViewEvent::WindowResize { height } => self.handle_resize(height, false),
                ViewEvent::ScrollChange { to_bottom } => {
                    if to_bottom {
                        self.scroll_to_bottom();
                    }
                }
            }
        }
        handled
    }

    fn handle_resize(&mut self, height: u32, force_bottom: bool) {
        self.viewport.client_height = height;
        self.viewport.clamp();
        if self.at_bottom || force_bottom {
            self.scroll_to_bottom();
        } else if !self.has_scrolled {
            if let Some(index) = self.new_messages_index() {
                self.viewport.scroll_top = self.row_top(index);
                self.viewport.clamp();
            }
        }
        self.at_bottom = self.check_bottom();
    }

    pub fn set_client_height(&mut self, height: u32) {
        if self.viewport.client_height != height {
            self.handle_resize(height, false);
        }
    }

    /// Phase one of an update: diff the posts about to be shown against the
    /// ones on screen.
    pub fn snapshot_before_update(&self, next: &[Post]) -> UpdateSnapshot {
        let prev_first = self.posts.first();
        let next_first = next.first();
        let same_ids = self.posts.len() == next.len()
            && self.posts.iter().zip(next).all(|(a, b)| a.id == b.id);
        let has_new_posts = match (prev_first, next_first) {
            (None, Some(_)) => true,
            (Some(prev), Some(next)) => prev.id != next.id,
            _ => false,
        };
        let new_post_at_bottom = match (prev_first, next_first) {
            (Some(prev), Some(next)) => {
                next.id != prev.id && next.pending_post_id.as_deref() != Some(prev.id.as_str())
            }
            _ => false,
        };
        let posts_added_at_top = !self.posts.is_empty()
            && self.posts.len() != next.len()
            && prev_first.map(|post| &post.id) == next_first.map(|post| &post.id);

        UpdateSnapshot {
            changed: !same_ids,
            has_new_posts,
            new_post_at_bottom,
            posts_added_at_top,
            was_at_bottom: self.at_bottom,
            viewport: self.viewport,
        }
    }

    /// Phase two: rebuild the rows for `posts`. The caller measures every
    /// returned row and hands the heights to [`PostList::did_update`].
    pub fn render<Tz: TimeZone>(
        &mut self,
        posts: Vec<Post>,
        visibility: PostVisibility,
        tz: &Tz,
    ) -> &[ListRow] {
        let mut rows = Vec::with_capacity(posts.len() + 8);
        rows.push(self.top_row(&posts, visibility));
        rows.extend(post_utils::create_posts(
            &posts,
            self.last_viewed_at,
            &self.current_user_id,
            tz,
        ));
        if let Some(row) = self.bottom_row(visibility) {
            rows.push(row);
        }
        self.posts = posts;
        self.rows = rows;
        &self.rows
    }

    /// Phase three: with the new measurements in hand, fix up the scroll
    /// offset and request whatever pages are missing.
    pub fn did_update(
        &mut self,
        snapshot: UpdateSnapshot,
        heights: Vec<u32>,
        loader: &mut dyn PageLoader,
        now_ms: i64,
    ) {
        self.heights = heights;
        self.heights.resize(self.rows.len(), 1);
        self.viewport.scroll_height = self.heights.iter().sum();
        self.viewport.clamp();
        self.sync_exhausted(loader.visibility());

        self.load_posts_to_fill_screen(loader);

        if !snapshot.changed {
            if snapshot.was_at_bottom {
                self.scroll_to_bottom();
            }
            return;
        }

        if self.focused_post_id.is_none() && snapshot.has_new_posts && !self.check_bottom() {
            self.set_unreads_below();
        }

        if let Some(focused) = self.focused_post_id.clone() {
            if !self.placed {
                if let Some(index) = self.row_index_of(&focused) {
                    let centre = self.row_top(index) + self.heights[index] / 2;
                    self.viewport.scroll_top =
                        centre.saturating_sub(self.viewport.client_height / 2);
                    self.viewport.clamp();
                    self.at_bottom = self.check_bottom();
                    self.placed = true;
                }
            } else if snapshot.posts_added_at_top {
                self.preserve_offset(&snapshot);
            }
            return;
        }

        if !self.placed {
            self.initial_scroll(loader);
            if self.posts.len() >= POSTS_PER_PAGE || loader.visibility().older_posts.all_loaded {
                self.placed = true;
            }
            return;
        }

        if snapshot.new_post_at_bottom {
            let ephemeral = self.posts.first().map(Post::is_ephemeral).unwrap_or(false);
            if snapshot.was_at_bottom || ephemeral {
                self.scroll_to_bottom();
                if ephemeral {
                    self.mark_viewed(now_ms);
                }
                return;
            }
        }

        if snapshot.posts_added_at_top {
            self.preserve_offset(&snapshot);
        }
    }

    fn preserve_offset(&mut self, snapshot: &UpdateSnapshot) {
        let previous = snapshot.viewport;
        if previous.scroll_height == self.viewport.scroll_height {
            return;
        }
        let grown = self
            .viewport
            .scroll_height
            .saturating_sub(previous.scroll_height);
        self.viewport.scroll_top = previous.scroll_top.saturating_add(grown);
        self.viewport.clamp();
    }

    fn initial_scroll(&mut self, loader: &mut dyn PageLoader) {
        if let Some(index) = self.new_messages_index() {
            let top = self.row_top(index);
            if self.viewport.scroll_height.saturating_sub(top) > self.viewport.client_height {
                self.viewport.scroll_top = top;
                self.viewport.clamp();
                self.at_bottom = self.check_bottom();
                self.set_unreads_below();
                // Every loaded post is unread; fetch the context above.
                let first_post = self.rows.iter().position(|row| row.post_id().is_some());
                if first_post.map(|first| first > index).unwrap_or(false) {
                    self.request_more(Direction::Older, loader);
                }
                return;
            }
        }
        self.scroll_to_bottom();
    }

    fn load_posts_to_fill_screen(&mut self, loader: &mut dyn PageLoader) {
        if self.focused_post_id.is_some() || loader.initial_load_pending() {
            return;
        }
        let visibility = loader.visibility();
        if visibility.older_posts.all_loaded || visibility.older_posts.loading {
            return;
        }
        if matches!(self.older.state, PagingState::Loading { .. }) {
            return;
        }
        if self.viewport.scroll_height >= self.viewport.client_height {
            return;
        }
        if self.extra_pages_loaded >= self.config.max_extra_pages {
            if self.older.auto_retry {
                info!(
                    pages = self.extra_pages_loaded,
                    "post_list: screen still not full, switching to manual loading"
                );
            }
            self.older.auto_retry = false;
            return;
        }
        if self.request_more(Direction::Older, loader) {
            self.extra_pages_loaded += 1;
        }
    }

    /// Records a scroll position and asks for a frame. A frame requested
    /// earlier and not yet handled is replaced.
    pub fn on_scroll(&mut self, scroll_top: u32) -> u64 {
        self.viewport.scroll_top = scroll_top;
        self.viewport.clamp();
        self.next_frame = self.next_frame.wrapping_add(1);
        self.pending_frame = Some(self.next_frame);
        self.next_frame
    }

    pub fn scroll_by(&mut self, delta: i32) -> u64 {
        let top = if delta < 0 {
            self.viewport.scroll_top.saturating_sub(delta.unsigned_abs())
        } else {
            self.viewport.scroll_top.saturating_add(delta.unsigned_abs())
        };
        self.on_scroll(top)
    }

    /// Runs the scroll handler at most once per requested frame. Returns
    /// whether there was anything to handle.
    pub fn on_animation_frame(
        &mut self,
        loader: &mut dyn PageLoader,
        now: Instant,
        now_ms: i64,
    ) -> bool {
        if self.pending_frame.take().is_none() {
            return false;
        }
        self.handle_scroll(loader, now, now_ms);
        true
    }

    fn handle_scroll(&mut self, loader: &mut dyn PageLoader, now: Instant, now_ms: i64) {
        self.has_scrolled = self.placed;
        self.update_floating_timestamp();
        self.scroll_stop_at = Some(now + SCROLL_DELAY);

        self.at_bottom = self.check_bottom();
        if self.at_bottom {
            self.mark_viewed(now_ms);
        }

        let threshold = self.load_threshold();
        if self.viewport.scroll_top < threshold {
            self.request_more(Direction::Older, loader);
        }
        if self.viewport.distance_from_bottom() < threshold {
            self.request_more(Direction::Newer, loader);
        }
    }

    /// Expires the "scrolling" flag. Returns true when it changed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.scroll_stop_at {
            Some(deadline) if deadline <= now => {
                self.scroll_stop_at = None;
                true
            }
            _ => false,
        }
    }

    fn load_threshold(&self) -> u32 {
        let ratio = (self.viewport.scroll_height as f32 * self.config.load_trigger_ratio) as u32;
        self.config.load_trigger.max(ratio)
    }

    fn pager_mut(&mut self, direction: Direction) -> &mut Pager {
        match direction {
            Direction::Older => &mut self.older,
            Direction::Newer => &mut self.newer,
        }
    }

    fn pager(&self, direction: Direction) -> Pager {
        match direction {
            Direction::Older => self.older,
            Direction::Newer => self.newer,
        }
    }

    fn sync_exhausted(&mut self, visibility: PostVisibility) {
        for direction in [Direction::Older, Direction::Newer] {
            if visibility.cursor(direction).all_loaded {
                self.pager_mut(direction).state = PagingState::Exhausted;
            }
        }
    }

    fn request(&mut self, direction: Direction, loader: &mut dyn PageLoader, retries: u32) -> bool {
        let pager = self.pager(direction);
        if matches!(
            pager.state,
            PagingState::Loading { .. } | PagingState::Exhausted
        ) {
            return false;
        }
        let cursor = loader.visibility().cursor(direction);
        if cursor.all_loaded {
            self.pager_mut(direction).state = PagingState::Exhausted;
            return false;
        }
        if cursor.loading {
            return false;
        }
        let issued = match direction {
            Direction::Older => loader.load_older_posts(),
            Direction::Newer => loader.load_newer_posts(),
        };
        if issued {
            debug!(direction = direction.label(), retries, "post_list: page requested");
            self.pager_mut(direction).state = PagingState::Loading { retries };
        }
        issued
    }

    /// Asks for the next page, carrying over the retries of an earlier failure.
    fn request_more(&mut self, direction: Direction, loader: &mut dyn PageLoader) -> bool {
        let retries = self.pager(direction).retries();
        self.request(direction, loader, retries)
    }

    /// Feeds back the result of a page request issued through the loader.
    pub fn on_page_settled(
        &mut self,
        direction: Direction,
        outcome: PageOutcome,
        loader: &mut dyn PageLoader,
    ) {
        let max_retries = self.config.max_auto_retries;
        let retries = self.pager(direction).retries();
        match outcome {
            PageOutcome::Loaded { more_to_load } => {
                let pager = self.pager_mut(direction);
                pager.state = if more_to_load {
                    PagingState::Idle
                } else {
                    PagingState::Exhausted
                };
                pager.auto_retry = true;
            }
            PageOutcome::Failed if retries < max_retries => {
                info!(
                    direction = direction.label(),
                    attempt = retries + 1,
                    "post_list: page load failed, retrying"
                );
                self.pager_mut(direction).state = PagingState::Failed(retries);
                if !self.request(direction, loader, retries + 1) {
                    debug!(
                        direction = direction.label(),
                        retries,
                        state = ?self.pager(direction).state,
                        "post_list: retry not issued, waiting for the next scroll"
                    );
                }
            }
            PageOutcome::Failed => {
                warn!(
                    direction = direction.label(),
                    retries, "post_list: page load failed, auto retry disabled"
                );
                let pager = self.pager_mut(direction);
                pager.state = PagingState::Failed(retries);
                pager.auto_retry = false;
            }
        }
    }

    /// The user picked the "load more" row. A failure here goes straight back
    /// to manual mode.
    pub fn manual_load(&mut self, direction: Direction, loader: &mut dyn PageLoader) -> bool {
        if let PagingState::Failed(_) = self.pager(direction).state {
            self.pager_mut(direction).state = PagingState::Idle;
        }
        let retries = self.config.max_auto_retries;
        self.request(direction, loader, retries)
    }

    fn top_row(&self, posts: &[Post], visibility: PostVisibility) -> ListRow {
        if visibility.older_posts.all_loaded {
            ListRow::ChannelIntro
        } else if posts.len() >= MAX_POST_VISIBILITY {
            ListRow::MaxLoaded
        } else if self.older.auto_retry {
            ListRow::Loader(Direction::Older)
        } else {
            ListRow::ManualLoad(Direction::Older)
        }
    }

    fn bottom_row(&self, visibility: PostVisibility) -> Option<ListRow> {
        if visibility.newer_posts.all_loaded {
            None
        } else if self.newer.auto_retry {
            Some(ListRow::Loader(Direction::Newer))
        } else {
            Some(ListRow::ManualLoad(Direction::Newer))
        }
    }

    fn check_bottom(&self) -> bool {
        if self.viewport.scroll_height <= self.viewport.client_height {
            return true;
        }
        self.viewport.distance_from_bottom() <= self.config.bottom_margin
    }

    fn set_unreads_below(&mut self) {
        self.unread_below = count_unread(&self.posts, self.last_viewed_at, &self.current_user_id);
    }

    fn mark_viewed(&mut self, now_ms: i64) {
        self.last_viewed_at = self.last_viewed_at.max(now_ms);
        self.unread_below = 0;
        self.scroll_stop_at = None;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.viewport.scroll_top = self.viewport.max_scroll_top();
        self.at_bottom = true;
    }

    /// Handles a click on the "new messages below" indicator.
    pub fn jump_to_bottom(&mut self, now_ms: i64) {
        self.scroll_to_bottom();
        self.mark_viewed(now_ms);
    }

    fn update_floating_timestamp(&mut self) {
        self.floating_post =
            post_utils::top_visible_post(&self.rows, &self.heights, self.viewport.scroll_top)
                .and_then(|index| self.rows[index].post_id().map(str::to_string));
    }

    fn new_messages_index(&self) -> Option<usize> {
        self.rows.iter().position(|row| *row == ListRow::NewMessages)
    }

    fn row_index_of(&self, post_id: &str) -> Option<usize> {
        self.rows.iter().position(|row| row.post_id() == Some(post_id))
    }

    fn row_top(&self, index: usize) -> u32 {
        self.heights.iter().take(index).sum()
    }

    pub fn rows(&self) -> &[ListRow] {
        &self.rows
    }

    pub fn heights(&self) -> &[u32] {
        &self.heights
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn is_at_bottom(&self) -> bool {
        self.at_bottom
    }

    pub fn unread_below(&self) -> usize {
        self.unread_below
    }

    pub fn show_new_messages_below(&self) -> bool {
        self.focused_post_id.is_none() && !self.at_bottom && self.unread_below > 0
    }

    pub fn last_viewed_at(&self) -> i64 {
        self.last_viewed_at
    }

    pub fn paging_state(&self, direction: Direction) -> PagingState {
        self.pager(direction).state
    }

    pub fn auto_retry_enabled(&self, direction: Direction) -> bool {
        self.pager(direction).auto_retry
    }

    pub fn extra_pages_loaded(&self) -> u32 {
        self.extra_pages_loaded
    }

    /// The post whose timestamp floats over the list while scrolling.
    pub fn floating_timestamp(&self) -> Option<i64> {
        self.scroll_stop_at?;
        let id = self.floating_post.as_deref()?;
        self.posts
            .iter()
            .find(|post| post.id == id)
            .map(|post| post.create_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PageCursor;
    use chrono::Utc;

    #[derive(Default)]
    struct FakeLoader {
        visibility: PostVisibility,
        older_calls: usize,
        newer_calls: usize,
        initial_pending: bool,
    }

    impl FakeLoader {
        fn settle(&mut self, direction: Direction) {
            self.visibility.cursor_mut(direction).loading = false;
        }
    }

    impl PageLoader for FakeLoader {
        fn load_older_posts(&mut self) -> bool {
            if self.visibility.older_posts.loading {
                return false;
            }
            self.visibility.older_posts.loading = true;
            self.older_calls += 1;
            true
        }

        fn load_newer_posts(&mut self) -> bool {
            if self.visibility.newer_posts.loading {
                return false;
            }
            self.visibility.newer_posts.loading = true;
            self.newer_calls += 1;
            true
        }

        fn visibility(&self) -> PostVisibility {
            self.visibility
        }

        fn initial_load_pending(&self) -> bool {
            self.initial_pending
        }
    }

    fn posts(range: std::ops::Range<i64>, user: &str) -> Vec<Post> {
        range
            .rev()
            .map(|n| Post {
                id: format!("p{n}"),
                create_at: 1_000 + n,
                user_id: user.into(),
                channel_id: "c".into(),
                ..Post::default()
            })
            .collect()
    }

    fn update(list: &mut PostList, next: Vec<Post>, loader: &mut FakeLoader, row_height: u32) {
        let snapshot = list.snapshot_before_update(&next);
        let count = list.render(next, loader.visibility(), &Utc).len();
        list.did_update(snapshot, vec![row_height; count], loader, 5_000);
    }

    fn tall_list(loader: &mut FakeLoader) -> PostList {
        let mut list = PostList::new(PostListConfig::default(), "me", 0, None);
        list.set_client_height(50);
        loader.visibility.newer_posts = PageCursor {
            loading: false,
            all_loaded: true,
        };
        update(&mut list, posts(0..60, "u1"), loader, 40);
        loader.older_calls = 0;
        loader.settle(Direction::Older);
        list.on_page_settled(
            Direction::Older,
            PageOutcome::Loaded { more_to_load: true },
            loader,
        );
        list
    }

    #[test]
    fn near_top_loads_older_once_until_settled() {
        let mut loader = FakeLoader::default();
        let mut list = tall_list(&mut loader);
        let now = Instant::now();

        list.on_scroll(100);
        list.on_animation_frame(&mut loader, now, 0);
        assert_eq!(loader.older_calls, 1);

        list.on_scroll(50);
        list.on_animation_frame(&mut loader, now, 0);
        assert_eq!(loader.older_calls, 1);

        loader.settle(Direction::Older);
        list.on_page_settled(
            Direction::Older,
            PageOutcome::Loaded { more_to_load: true },
            &mut loader,
        );
        list.on_scroll(40);
        list.on_animation_frame(&mut loader, now, 0);
        assert_eq!(loader.older_calls, 2);
    }

    #[test]
    fn scroll_events_in_one_frame_are_handled_once() {
        let mut loader = FakeLoader::default();
        let mut list = tall_list(&mut loader);
        let now = Instant::now();

        list.on_scroll(120);
        list.on_scroll(120);
        assert!(list.on_animation_frame(&mut loader, now, 0));
        assert!(!list.on_animation_frame(&mut loader, now, 0));
        assert_eq!(loader.older_calls, 1);
    }

    #[test]
    fn nothing_loads_once_direction_is_exhausted() {
        let mut loader = FakeLoader::default();
        let mut list = tall_list(&mut loader);
        loader.visibility.older_posts.all_loaded = true;
        list.on_scroll(0);
        list.on_animation_frame(&mut loader, Instant::now(), 0);
        assert_eq!(loader.older_calls, 0);
        assert_eq!(list.paging_state(Direction::Older), PagingState::Exhausted);
    }

    #[test]
    fn refused_retry_keeps_its_count_for_the_next_scroll() {
        let mut loader = FakeLoader::default();
        let mut list = tall_list(&mut loader);
        let now = Instant::now();
        list.on_scroll(0);
        list.on_animation_frame(&mut loader, now, 0);

        loader.settle(Direction::Older);
        list.on_page_settled(Direction::Older, PageOutcome::Failed, &mut loader);
        assert_eq!(
            list.paging_state(Direction::Older),
            PagingState::Loading { retries: 1 }
        );
        assert_eq!(loader.older_calls, 2);

        // The loader is still busy, so the second retry is refused.
        list.on_page_settled(Direction::Older, PageOutcome::Failed, &mut loader);
        assert_eq!(list.paging_state(Direction::Older), PagingState::Failed(1));
        assert!(list.auto_retry_enabled(Direction::Older));
        assert_eq!(loader.older_calls, 2);

        loader.settle(Direction::Older);
        list.on_scroll(1);
        list.on_animation_frame(&mut loader, now, 0);
        assert_eq!(
            list.paging_state(Direction::Older),
            PagingState::Loading { retries: 1 }
        );
        assert_eq!(loader.older_calls, 3);

        for _ in 0..3 {
            loader.settle(Direction::Older);
            list.on_page_settled(Direction::Older, PageOutcome::Failed, &mut loader);
        }
        assert_eq!(loader.older_calls, 5);
        assert_eq!(list.paging_state(Direction::Older), PagingState::Failed(3));
        assert!(!list.auto_retry_enabled(Direction::Older));
    }

    #[test]
    fn retries_three_times_then_disables_auto_retry() {
        let mut loader = FakeLoader::default();
        let mut list = tall_list(&mut loader);
        list.on_scroll(0);
        list.on_animation_frame(&mut loader, Instant::now(), 0);
        assert_eq!(loader.older_calls, 1);

        for _ in 0..3 {
            loader.settle(Direction::Older);
            list.on_page_settled(Direction::Older, PageOutcome::Failed, &mut loader);
            assert!(list.auto_retry_enabled(Direction::Older));
        }
        assert_eq!(loader.older_calls, 4);

        loader.settle(Direction::Older);
        list.on_page_settled(Direction::Older, PageOutcome::Failed, &mut loader);
        assert!(!list.auto_retry_enabled(Direction::Older));
        assert_eq!(list.paging_state(Direction::Older), PagingState::Failed(3));
        assert_eq!(loader.older_calls, 4);

        assert!(list.manual_load(Direction::Older, &mut loader));
        loader.settle(Direction::Older);
        list.on_page_settled(
            Direction::Older,
            PageOutcome::Loaded { more_to_load: true },
            &mut loader,
        );
        assert!(list.auto_retry_enabled(Direction::Older));
        assert_eq!(list.paging_state(Direction::Older), PagingState::Idle);
    }

    #[test]
    fn manual_row_replaces_loader_after_retries_run_out() {
        let mut loader = FakeLoader::default();
        let mut list = tall_list(&mut loader);
        list.on_scroll(0);
        list.on_animation_frame(&mut loader, Instant::now(), 0);
        for _ in 0..4 {
            loader.settle(Direction::Older);
            list.on_page_settled(Direction::Older, PageOutcome::Failed, &mut loader);
        }
        let current = list.posts().to_vec();
        update(&mut list, current, &mut loader, 40);
        assert_eq!(list.rows()[0], ListRow::ManualLoad(Direction::Older));
    }

    #[test]
    fn short_content_fills_screen_up_to_bound() {
        let mut loader = FakeLoader::default();
        let mut list = PostList::new(PostListConfig::default(), "me", 0, None);
        list.set_client_height(100);
        let mut shown = posts(0..2, "u1");
        update(&mut list, shown.clone(), &mut loader, 1);
        assert_eq!(loader.older_calls, 1);

        for n in 0..12 {
            loader.settle(Direction::Older);
            list.on_page_settled(
                Direction::Older,
                PageOutcome::Loaded { more_to_load: true },
                &mut loader,
            );
            shown.push(Post {
                id: format!("old{n}"),
                create_at: 10 - n,
                user_id: "u1".into(),
                ..Post::default()
            });
            update(&mut list, shown.clone(), &mut loader, 1);
        }
        assert_eq!(loader.older_calls, 10);
        assert_eq!(list.extra_pages_loaded(), 10);
        assert!(!list.auto_retry_enabled(Direction::Older));
    }

    #[test]
    fn fill_screen_waits_for_initial_load() {
        let mut loader = FakeLoader {
            initial_pending: true,
            ..FakeLoader::default()
        };
        let mut list = PostList::new(PostListConfig::default(), "me", 0, None);
        list.set_client_height(100);
        update(&mut list, posts(0..2, "u1"), &mut loader, 1);
        assert_eq!(loader.older_calls, 0);
    }

    #[test]
    fn prepended_page_keeps_visual_position() {
        let mut loader = FakeLoader::default();
        let mut list = tall_list(&mut loader);
        list.on_scroll(1_000);
        list.on_animation_frame(&mut loader, Instant::now(), 0);
        let before = list.viewport();

        let mut next = list.posts().to_vec();
        next.extend(posts(-30..0, "u1"));
        update(&mut list, next, &mut loader, 40);

        let after = list.viewport();
        assert_eq!(
            after.scroll_top,
            before.scroll_top + (after.scroll_height - before.scroll_height)
        );
    }

    #[test]
    fn new_post_scrolls_when_at_bottom() {
        let mut loader = FakeLoader::default();
        let mut list = tall_list(&mut loader);
        assert!(list.is_at_bottom());

        let mut next = posts(60..61, "u1");
        next.extend(list.posts().to_vec());
        update(&mut list, next, &mut loader, 40);
        assert_eq!(list.viewport().distance_from_bottom(), 0);
    }

    #[test]
    fn new_post_counts_unread_when_scrolled_up() {
        let mut loader = FakeLoader::default();
        let mut list = PostList::new(PostListConfig::default(), "me", 1_050, None);
        list.set_client_height(50);
        loader.visibility.newer_posts.all_loaded = true;
        update(&mut list, posts(0..40, "me"), &mut loader, 40);
        list.on_scroll(400);
        list.on_animation_frame(&mut loader, Instant::now(), 0);
        assert!(!list.is_at_bottom());

        let mut next = posts(100..102, "u1");
        next.extend(list.posts().to_vec());
        let top = list.viewport().scroll_top;
        update(&mut list, next, &mut loader, 40);
        assert_eq!(list.viewport().scroll_top, top);
        assert_eq!(list.unread_below(), 2);
        assert!(list.show_new_messages_below());

        list.on_scroll(u32::MAX);
        list.on_animation_frame(&mut loader, Instant::now(), 9_999);
        assert_eq!(list.unread_below(), 0);
        assert_eq!(list.last_viewed_at(), 9_999);
    }

    #[test]
    fn initial_placement_goes_to_offscreen_unread_marker() {
        let mut loader = FakeLoader::default();
        loader.visibility.newer_posts.all_loaded = true;
        let mut list = PostList::new(PostListConfig::default(), "me", 1_000 + 19, None);
        list.set_client_height(50);
        update(&mut list, posts(0..40, "u1"), &mut loader, 10);
        let marker = list
            .rows()
            .iter()
            .position(|row| *row == ListRow::NewMessages)
            .unwrap();
        assert_eq!(list.viewport().scroll_top, marker as u32 * 10);
        assert_eq!(list.unread_below(), 20);
    }

    #[test]
    fn focused_post_is_centred() {
        let mut loader = FakeLoader::default();
        let mut list = PostList::new(PostListConfig::default(), "me", 0, Some("p30".into()));
        list.set_client_height(40);
        update(&mut list, posts(0..60, "u1"), &mut loader, 10);
        let index = list
            .rows()
            .iter()
            .position(|row| row.post_id() == Some("p30"))
            .unwrap() as u32;
        assert_eq!(list.viewport().scroll_top, index * 10 + 5 - 20);
    }

    #[test]
    fn listeners_are_added_and_removed_once() {
        let bus = EventBus::new();
        let mut list = PostList::new(PostListConfig::default(), "me", 0, None);
        list.mount(&bus);
        list.mount(&bus);
        assert_eq!(bus.subscriber_count(), 2);
        list.unmount(&bus);
        list.unmount(&bus);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn scroll_change_event_can_force_bottom() {
        let bus = EventBus::new();
        let mut loader = FakeLoader::default();
        let mut list = tall_list(&mut loader);
        list.mount(&bus);
        list.on_scroll(0);
        bus.emit(ViewEvent::ScrollChange { to_bottom: true });
        assert!(list.pump_events());
        assert!(list.is_at_bottom());
        assert_eq!(list.viewport().distance_from_bottom(), 0);
        list.unmount(&bus);
    }

    #[test]
    fn floating_timestamp_clears_after_scroll_stops() {
        let mut loader = FakeLoader::default();
        let mut list = tall_list(&mut loader);
        let now = Instant::now();
        list.on_scroll(500);
        list.on_animation_frame(&mut loader, now, 0);
        assert!(list.floating_timestamp().is_some());
        assert!(list.poll(now + SCROLL_DELAY));
        assert!(list.floating_timestamp().is_none());
    }
}
