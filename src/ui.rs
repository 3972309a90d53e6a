use std::collections::HashMap;
use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{Local, NaiveDate, TimeZone};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use rand::seq::SliceRandom;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction as LayoutDirection, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use tracing::{info, warn};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::data::{DemoServer, PostService};
use crate::events::{EventBus, ViewEvent};
use crate::executor::SharedExecutor;
use crate::model::{Channel, ChannelKind, Direction, Post, PostType};
use crate::post_list::{PageLoader, PagingState, PostList, PostListConfig};
use crate::post_utils::{self, ListRow};
use crate::post_view::{PostView, PostViewEvent};
use crate::sidebar::{Sidebar, SidebarModal};
use crate::store::Store;
use crate::suggestion::{
    AtMentionProvider, CommandProvider, Provider, SuggestionBox, SuggestionItem,
};

const SIDEBAR_WIDTH: u16 = 30;
const INPUT_HEIGHT: u16 = 3;
const SCROLL_STEP: i32 = 3;
const MAX_SUGGESTION_ROWS: u16 = 8;
const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const MESSAGE_INDENT: &str = "      ";
const HELP_TEXT: &str = "Alt+↑/↓ channels · Alt+Shift+↑/↓ unread · Ctrl+K switch · Ctrl+Shift+K DMs · PgUp/PgDn scroll · End latest · Ctrl+C quit";

#[derive(Clone, Copy)]
struct Palette {
    bg: Color,
    panel_bg: Color,
    selected_bg: Color,
    border_idle: Color,
    border_focused: Color,
    text_primary: Color,
    text_secondary: Color,
    accent: Color,
    success: Color,
    error: Color,
}

impl Palette {
    fn named(name: &str) -> Self {
        match name {
            "light" => Self {
                bg: Color::Rgb(239, 241, 245),
                panel_bg: Color::Rgb(230, 233, 239),
                selected_bg: Color::Rgb(204, 208, 218),
                border_idle: Color::Rgb(188, 192, 204),
                border_focused: Color::Rgb(30, 102, 245),
                text_primary: Color::Rgb(76, 79, 105),
                text_secondary: Color::Rgb(108, 111, 133),
                accent: Color::Rgb(30, 102, 245),
                success: Color::Rgb(64, 160, 43),
                error: Color::Rgb(210, 15, 57),
            },
            _ => Self {
                bg: Color::Rgb(30, 30, 46),
                panel_bg: Color::Rgb(24, 24, 36),
                selected_bg: Color::Rgb(69, 71, 90),
                border_idle: Color::Rgb(49, 50, 68),
                border_focused: Color::Rgb(137, 180, 250),
                text_primary: Color::Rgb(205, 214, 244),
                text_secondary: Color::Rgb(166, 173, 200),
                accent: Color::Rgb(137, 180, 250),
                success: Color::Rgb(166, 227, 161),
                error: Color::Rgb(243, 139, 168),
            },
        }
    }
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

enum AsyncResponse {
    PostCreated {
        channel_id: String,
        result: Result<Post>,
    },
}

struct Areas {
    status: Rect,
    sidebar: Rect,
    posts: Rect,
    input: Rect,
    footer: Rect,
}

fn areas(size: Rect) -> Areas {
    let rows = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0), Constraint::Length(1)])
        .split(size);
    let columns = Layout::default()
        .direction(LayoutDirection::Horizontal)
        .constraints([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(0)])
        .split(rows[1]);
    let right = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(INPUT_HEIGHT)])
        .split(columns[1]);
    Areas {
        status: rows[0],
        sidebar: columns[0],
        posts: right[0],
        input: right[1],
        footer: rows[2],
    }
}

fn bordered() -> Block<'static> {
    Block::default().borders(Borders::ALL)
}

/// Inner size of the message pane, which is what the post list measures in.
fn post_pane_inner(size: Rect) -> Rect {
    bordered().inner(areas(size).posts)
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(LayoutDirection::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn wrap_with_prefixes(text: &str, width: usize, first_prefix: &str, rest_prefix: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return vec![first_prefix.to_string()];
    }
    let min_width = UnicodeWidthStr::width(first_prefix)
        .max(UnicodeWidthStr::width(rest_prefix))
        .saturating_add(1);
    let options = WrapOptions::new(width.max(min_width))
        .break_words(true)
        .initial_indent(first_prefix)
        .subsequent_indent(rest_prefix);
    wrap(text, options)
        .into_iter()
        .map(|line| line.into_owned())
        .collect()
}

fn centered_label(label: &str, width: usize) -> String {
    let label = format!(" {label} ");
    let used = UnicodeWidthStr::width(label.as_str());
    if used >= width {
        return label;
    }
    let left = (width - used) / 2;
    let right = width - used - left;
    format!("{}{}{}", "─".repeat(left), label, "─".repeat(right))
}

fn channel_prefix(channel: &Channel) -> &'static str {
    match channel.kind {
        ChannelKind::Open => "# ",
        ChannelKind::Private => "🔒",
        ChannelKind::Direct => "@ ",
        ChannelKind::Group => "& ",
    }
}

/// Main text and secondary text for one autocomplete row.
fn suggestion_label(item: &SuggestionItem) -> (String, String) {
    match item {
        SuggestionItem::Member(member) | SuggestionItem::NonMember(member) => {
            let profile = &member.profile;
            let mut detail = profile.display_name();
            if !profile.nickname.is_empty() {
                detail.push_str(&format!(" ({})", profile.nickname));
            }
            if member.is_current_user {
                detail.push_str(" (you)");
            }
            if matches!(item, SuggestionItem::NonMember(_)) {
                detail.push_str(" · not in channel");
            }
            (format!("@{}", profile.username), detail)
        }
        SuggestionItem::Group(group) => (format!("@{}", group.name), group.display_name.clone()),
        SuggestionItem::Special(name) => {
            let detail = match name.as_str() {
                "here" => "Notifies everyone online in this channel",
                "channel" => "Notifies everyone in this channel",
                "all" => "Notifies everyone in this channel",
                _ => "",
            };
            (format!("@{name}"), detail.to_string())
        }
        SuggestionItem::Command(command) => {
            let main = if command.hint.is_empty() {
                command.suggestion.clone()
            } else {
                format!("{} {}", command.suggestion, command.hint)
            };
            (main, command.description.clone())
        }
        SuggestionItem::Loading => ("Loading…".to_string(), String::new()),
    }
}

pub struct Options {
    pub store: Arc<Store>,
    pub server: Arc<DemoServer>,
    pub executor: SharedExecutor,
    pub config: Config,
    pub config_path: String,
    pub log_path: String,
}

pub struct Model {
    store: Arc<Store>,
    server: Arc<DemoServer>,
    posts_api: Arc<dyn PostService>,
    executor: SharedExecutor,
    bus: EventBus,
    sidebar: Sidebar,
    view: PostView,
    list: PostList,
    list_config: PostListConfig,
    suggestions: SuggestionBox,
    channel_id: String,
    input: String,
    drafts: HashMap<String, String>,
    modal_input: String,
    modal_selected: usize,
    sidebar_offset: usize,
    pane: Rect,
    palette: Palette,
    presence: &'static str,
    status_message: String,
    spinner: Spinner,
    tick_rate: Duration,
    incoming_rate: f64,
    config_path: String,
    log_path: String,
    needs_redraw: bool,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
}

impl Model {
    pub fn new(opts: Options) -> Result<Self> {
        let Options {
            store,
            server,
            executor,
            config,
            config_path,
            log_path,
        } = opts;

        let mut sidebar = Sidebar::new(config.ui.show_unread_section);
        sidebar.refresh(&store.channels(), &store.favorites(), &store.unread_channels());
        let channel_id = if store.channel(&config.session.channel).is_some() {
            config.session.channel.clone()
        } else {
            sidebar.order().first().cloned().unwrap_or_default()
        };

        let posts_api: Arc<dyn PostService> = server.clone();
        let list_config = config.post_list.to_post_list_config();
        let mut view = PostView::new(
            channel_id.clone(),
            None,
            store.clone(),
            posts_api.clone(),
            executor.clone(),
        );

        let bus = EventBus::new();
        let pane = post_pane_inner(Rect::new(0, 0, 100, 30));
        let mut list = PostList::new(
            list_config,
            store.current_user_id(),
            store.last_viewed_at(&channel_id),
            None,
        );
        list.mount(&bus);
        list.set_client_height(u32::from(pane.height));

        let mut mentions = AtMentionProvider::new(
            channel_id.clone(),
            store.clone(),
            server.clone(),
            executor.clone(),
            config.suggestions.to_at_mention_options(),
        )?;
        mentions.set_priority_profiles(direct_message_partners(&store));
        let triggers = crate::data::CommandService::list_triggers(server.as_ref())?;
        let bindings = crate::data::CommandService::list_bindings(server.as_ref())?;
        let commands =
            CommandProvider::new(channel_id.clone(), triggers, bindings, server.clone(), executor.clone());
        let providers: Vec<Box<dyn Provider>> = vec![Box::new(mentions), Box::new(commands)];

        view.mount();
        let (response_tx, response_rx) = unbounded();

        let mut model = Self {
            store,
            server,
            posts_api,
            executor,
            bus,
            sidebar,
            view,
            list,
            list_config,
            suggestions: SuggestionBox::new(providers),
            channel_id,
            input: String::new(),
            drafts: HashMap::new(),
            modal_input: String::new(),
            modal_selected: 0,
            sidebar_offset: 0,
            pane,
            palette: Palette::named(&config.ui.theme),
            presence: "online",
            status_message: format!("Config: {} · Log: {}", config_path, log_path),
            spinner: Spinner::new(),
            tick_rate: config.ui.tick_rate,
            incoming_rate: config.demo.incoming_rate,
            config_path,
            log_path,
            needs_redraw: true,
            response_tx,
            response_rx,
        };
        model.refresh_posts();
        Ok(model)
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = terminal
            .size()
            .map_err(anyhow::Error::from)
            .and_then(|size| {
                self.handle_resize(size.width, size.height);
                self.event_loop(&mut terminal)
            });

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        self.list.unmount(&self.bus);

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                // Take the whole burst so scrolling is handled once per frame.
                loop {
                    match event::read()? {
                        Event::Key(key) if key.kind == KeyEventKind::Press => {
                            match self.handle_key(key) {
                                Ok(true) => return Ok(()),
                                Ok(false) => {}
                                Err(err) => self.status_message = format!("Error: {}", err),
                            }
                        }
                        Event::Resize(width, height) => self.handle_resize(width, height),
                        _ => {}
                    }
                    if !event::poll(Duration::ZERO)? {
                        break;
                    }
                }
                self.mark_dirty();
            }

            if self.run_frame() {
                self.mark_dirty();
            }

            if last_tick.elapsed() >= self.tick_rate {
                last_tick = Instant::now();
                if self.on_tick() {
                    self.mark_dirty();
                }
            }
        }
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    /// Scroll handling runs here, once per drawn frame.
    fn run_frame(&mut self) -> bool {
        self.list
            .on_animation_frame(&mut self.view, Instant::now(), now_ms())
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;

        let events = self.view.poll();
        if !events.is_empty() {
            for event in events {
                match event {
                    PostViewEvent::PageSettled { direction, outcome } => {
                        self.list.on_page_settled(direction, outcome, &mut self.view);
                    }
                    PostViewEvent::InitialLoadFinished { ok: false } => {
                        self.status_message = format!(
                            "Couldn't load messages for {}. Press Ctrl+R to retry.",
                            self.channel_label(&self.channel_id)
                        );
                    }
                    PostViewEvent::InitialLoadFinished { ok: true } | PostViewEvent::Synced => {}
                }
            }
            self.refresh_posts();
            changed = true;
        }

        let responses: Vec<AsyncResponse> = self.response_rx.try_iter().collect();
        for response in responses {
            self.handle_async_response(response);
            changed = true;
        }

        if self.suggestions.poll(Instant::now()) {
            changed = true;
        }
        if self.list.pump_events() {
            changed = true;
        }
        if self.list.poll(Instant::now()) {
            changed = true;
        }
        if self.sync_viewed() {
            changed = true;
        }
        changed
    }

    fn handle_async_response(&mut self, response: AsyncResponse) {
        match response {
            AsyncResponse::PostCreated { channel_id, result } => match result {
                Ok(_) if channel_id == self.channel_id => {
                    self.refresh_posts();
                    self.bus.emit(ViewEvent::ScrollChange { to_bottom: true });
                    self.list.pump_events();
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(channel = %channel_id, "ui: failed to send message: {err:#}");
                    self.status_message = format!("Message not sent: {err}");
                }
            },
        }
    }

    fn on_tick(&mut self) -> bool {
        let mut changed = false;
        if self.view.is_loading() || self.any_page_loading() {
            changed |= self.spinner.advance();
        } else {
            self.spinner.reset();
        }

        if !self.store.connection().connected || self.incoming_rate <= 0.0 {
            return changed;
        }
        let here = self
            .server
            .random_incoming(&self.channel_id, self.incoming_rate);
        if here.is_some() {
            self.refresh_posts();
            changed = true;
        }
        let others: Vec<String> = self
            .sidebar
            .order()
            .iter()
            .filter(|id| **id != self.channel_id)
            .cloned()
            .collect();
        let elsewhere = others
            .choose(&mut rand::thread_rng())
            .and_then(|id| self.server.random_incoming(id, self.incoming_rate));
        if elsewhere.is_some() || changed {
            self.refresh_sidebar();
            changed = true;
        }
        changed
    }

    fn any_page_loading(&self) -> bool {
        [Direction::Older, Direction::Newer]
            .into_iter()
            .any(|direction| matches!(self.list.paging_state(direction), PagingState::Loading { .. }))
    }

    /// Rebuilds the rows from the store and lets the list fix its scroll
    /// position against the new measurements.
    fn refresh_posts(&mut self) {
        let posts = self.view.posts();
        let snapshot = self.list.snapshot_before_update(&posts);
        let visibility = self.view.visibility();
        self.list.render(posts, visibility, &Local);
        let heights = self.measure_rows();
        self.list
            .did_update(snapshot, heights, &mut self.view, now_ms());
        self.mark_dirty();
    }

    fn measure_rows(&self) -> Vec<u32> {
        let lookup = post_lookup(self.list.posts());
        let today = Local::now().date_naive();
        self.list
            .rows()
            .iter()
            .map(|row| self.row_lines(row, &lookup, today).len().max(1) as u32)
            .collect()
    }

    /// Marks the channel read once the newest posts are on screen.
    fn sync_viewed(&mut self) -> bool {
        if self.view.is_loading()
            || !self.view.visibility().newer_posts.all_loaded
            || !self.list.is_at_bottom()
        {
            return false;
        }
        let seen = self.list.last_viewed_at();
        let unread = self.store.unread_channels().contains(&self.channel_id);
        if !unread && seen <= self.store.last_viewed_at(&self.channel_id) {
            return false;
        }
        self.store
            .mark_channel_viewed(&self.channel_id, seen.max(now_ms()));
        self.refresh_sidebar();
        true
    }

    fn refresh_sidebar(&mut self) {
        self.sidebar.refresh(
            &self.store.channels(),
            &self.store.favorites(),
            &self.store.unread_channels(),
        );
        self.mark_dirty();
    }

    fn handle_resize(&mut self, width: u16, height: u16) {
        let pane = post_pane_inner(Rect::new(0, 0, width, height));
        let width_changed = pane.width != self.pane.width;
        self.pane = pane;
        self.bus.emit(ViewEvent::WindowResize {
            height: u32::from(pane.height),
        });
        self.list.pump_events();
        if width_changed {
            self.refresh_posts();
        }
        self.mark_dirty();
    }

    fn remount_list(&mut self, last_viewed_at: i64, focused_post_id: Option<String>) {
        self.list.unmount(&self.bus);
        self.list = PostList::new(
            self.list_config,
            self.store.current_user_id(),
            last_viewed_at,
            focused_post_id,
        );
        self.list.mount(&self.bus);
        self.list.set_client_height(u32::from(self.pane.height));
    }

    fn switch_channel(&mut self, channel_id: &str, focused_post_id: Option<String>) {
        if self.store.channel(channel_id).is_none() {
            self.status_message = format!("Channel {channel_id} not found");
            return;
        }
        self.sync_viewed();
        let draft = std::mem::take(&mut self.input);
        self.drafts.insert(self.channel_id.clone(), draft);
        self.input = self.drafts.remove(channel_id).unwrap_or_default();

        self.channel_id = channel_id.to_string();
        self.remount_list(
            self.store.last_viewed_at(channel_id),
            focused_post_id.clone(),
        );
        self.view.switch_channel(channel_id, focused_post_id);
        self.suggestions.set_channel(channel_id);
        self.refresh_sidebar();
        self.refresh_posts();
        self.status_message = format!("Viewing {}", self.channel_label(channel_id));
        info!(channel = %channel_id, "ui: switched channel");
    }

    fn jump_to_latest(&mut self) {
        if self.view.visibility().newer_posts.all_loaded && self.view.focused_post_id().is_none() {
            self.list.jump_to_bottom(now_ms());
            return;
        }
        self.remount_list(self.list.last_viewed_at(), None);
        self.view.jump_to_latest();
        self.refresh_posts();
    }

    fn open_top_post_permalink(&mut self) {
        let viewport = self.list.viewport();
        let Some(post_id) =
            post_utils::top_visible_post(self.list.rows(), self.list.heights(), viewport.scroll_top)
                .and_then(|index| self.list.rows()[index].post_id().map(str::to_string))
        else {
            return;
        };
        let channel_id = self.channel_id.clone();
        self.switch_channel(&channel_id, Some(post_id.clone()));
        self.status_message = format!("Permalink to {post_id}. Press End to return to recent messages.");
    }

    fn load_more_manually(&mut self) {
        for direction in [Direction::Older, Direction::Newer] {
            if matches!(self.list.paging_state(direction), PagingState::Failed(_))
                || !self.list.auto_retry_enabled(direction)
            {
                if self.list.manual_load(direction, &mut self.view) {
                    self.status_message = format!("Loading {} messages…", direction.label());
                }
                return;
            }
        }
    }

    fn toggle_connection(&mut self) {
        let connected = !self.store.connection().connected;
        self.store.set_connected(connected, now_ms());
        self.view.on_socket_status(connected);
        self.status_message = if connected {
            "Reconnected".to_string()
        } else {
            "Disconnected. Press F2 to reconnect.".to_string()
        };
    }

    fn channel_label(&self, channel_id: &str) -> String {
        self.store
            .channel(channel_id)
            .map(|channel| channel.display_name)
            .unwrap_or_else(|| channel_id.to_string())
    }

    fn input_changed(&mut self) {
        self.suggestions.pretext_changed(&self.input);
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let alt = key.modifiers.contains(KeyModifiers::ALT);
        let shift = key.modifiers.contains(KeyModifiers::SHIFT);

        if ctrl && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('q')) {
            return Ok(true);
        }
        if ctrl && shift && matches!(key.code, KeyCode::Char('k') | KeyCode::Char('K')) {
            self.sidebar.toggle_direct_channels();
            self.modal_selected = 0;
            return Ok(false);
        }
        if let Some(modal) = self.sidebar.modal() {
            return self.handle_modal_key(modal, key);
        }

        match key.code {
            KeyCode::Up | KeyCode::Down if alt => {
                let delta = if key.code == KeyCode::Up { -1 } else { 1 };
                let next = if shift {
                    self.sidebar.next_unread_channel_id(&self.channel_id, delta)
                } else {
                    self.sidebar.next_channel_id(&self.channel_id, delta)
                };
                if let Some(next) = next.map(str::to_string) {
                    self.switch_channel(&next, None);
                }
            }
            KeyCode::Char('k') if ctrl => self.open_modal(SidebarModal::QuickSwitch),
            KeyCode::Char('n') if ctrl => self.open_modal(SidebarModal::NewChannel),
            KeyCode::Char('b') if ctrl => self.open_modal(SidebarModal::MoreChannels),
            KeyCode::Char('f') if ctrl => {
                let favorite = !self.store.favorites().contains(&self.channel_id);
                self.store.set_favorite(&self.channel_id, favorite);
                self.refresh_sidebar();
            }
            KeyCode::Char('l') if ctrl => self.load_more_manually(),
            KeyCode::Char('o') if ctrl => self.open_top_post_permalink(),
            KeyCode::Char('r') if ctrl => {
                self.remount_list(self.list.last_viewed_at(), None);
                self.view.jump_to_latest();
                self.refresh_posts();
            }
            KeyCode::Char('u') if ctrl => {
                self.input.clear();
                self.input_changed();
            }
            KeyCode::F(2) => self.toggle_connection(),
            KeyCode::Esc => {
                if self.suggestions.is_open() {
                    self.suggestions.close();
                } else if self.view.focused_post_id().is_some() {
                    self.jump_to_latest();
                }
            }
            KeyCode::Up if self.suggestions.is_open() => self.suggestions.select_previous(),
            KeyCode::Down if self.suggestions.is_open() => self.suggestions.select_next(),
            KeyCode::Tab if self.suggestions.is_open() => self.complete_suggestion()?,
            KeyCode::Enter if self.suggestions.is_open() => self.complete_suggestion()?,
            KeyCode::Up => {
                self.list.scroll_by(-SCROLL_STEP);
            }
            KeyCode::Down => {
                self.list.scroll_by(SCROLL_STEP);
            }
            KeyCode::PageUp => {
                self.list.scroll_by(-i32::from(self.pane.height.max(1)));
            }
            KeyCode::PageDown => {
                self.list.scroll_by(i32::from(self.pane.height.max(1)));
            }
            KeyCode::End => self.jump_to_latest(),
            KeyCode::Enter => self.submit_input()?,
            KeyCode::Backspace => {
                self.input.pop();
                self.input_changed();
            }
            KeyCode::Char(ch) if !ctrl && !alt => {
                self.input.push(ch);
                self.input_changed();
            }
            _ => {}
        }
        Ok(false)
    }

    fn open_modal(&mut self, modal: SidebarModal) {
        self.modal_input.clear();
        self.modal_selected = 0;
        self.sidebar.open_modal(modal);
    }

    fn modal_channels(&self, modal: SidebarModal) -> Vec<Channel> {
        let channels = match modal {
            SidebarModal::MoreChannels => self.sidebar.public_channels(),
            SidebarModal::DirectChannels => self.sidebar.direct_channels(),
            SidebarModal::NewChannel | SidebarModal::QuickSwitch => Vec::new(),
        };
        channels.into_iter().cloned().collect()
    }

    fn handle_modal_key(&mut self, modal: SidebarModal, key: KeyEvent) -> Result<bool> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match (modal, key.code) {
            (_, KeyCode::Esc) => self.sidebar.close_modal(),
            (SidebarModal::QuickSwitch, KeyCode::Up) => {
                self.sidebar.quick_switch_mut().select_previous()
            }
            (SidebarModal::QuickSwitch, KeyCode::Down | KeyCode::Tab) => {
                self.sidebar.quick_switch_mut().select_next()
            }
            (SidebarModal::QuickSwitch, KeyCode::Enter) => {
                if let Some(id) = self.sidebar.confirm_quick_switch() {
                    self.switch_channel(&id, None);
                }
            }
            (SidebarModal::QuickSwitch, KeyCode::Backspace) => {
                self.modal_input.pop();
                self.sidebar.set_quick_switch_query(&self.modal_input);
            }
            (SidebarModal::QuickSwitch, KeyCode::Char(ch)) if !ctrl => {
                self.modal_input.push(ch);
                self.sidebar.set_quick_switch_query(&self.modal_input);
            }
            (SidebarModal::NewChannel, KeyCode::Enter) => self.create_channel(),
            (SidebarModal::NewChannel, KeyCode::Backspace) => {
                self.modal_input.pop();
            }
            (SidebarModal::NewChannel, KeyCode::Char(ch)) if !ctrl => self.modal_input.push(ch),
            (SidebarModal::MoreChannels | SidebarModal::DirectChannels, code) => {
                let channels = self.modal_channels(modal);
                let len = channels.len();
                match code {
                    KeyCode::Up if len > 0 => {
                        self.modal_selected = (self.modal_selected + len - 1) % len;
                    }
                    KeyCode::Down if len > 0 => {
                        self.modal_selected = (self.modal_selected + 1) % len;
                    }
                    KeyCode::Enter => {
                        if let Some(channel) = channels.get(self.modal_selected) {
                            self.sidebar.close_modal();
                            self.switch_channel(&channel.id, None);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(false)
    }

    fn create_channel(&mut self) {
        match self.server.create_channel(&self.modal_input, ChannelKind::Open) {
            Ok(channel) => {
                info!(channel = %channel.id, "ui: channel created");
                self.sidebar.close_modal();
                self.refresh_sidebar();
                self.switch_channel(&channel.id, None);
            }
            Err(err) => self.status_message = format!("Couldn't create channel: {err}"),
        }
    }

    fn complete_suggestion(&mut self) -> Result<()> {
        let Some(completion) = self.suggestions.complete_selected() else {
            return Ok(());
        };
        self.input = completion.text;
        if completion.execute {
            return self.submit_input();
        }
        self.input_changed();
        Ok(())
    }

    fn submit_input(&mut self) -> Result<()> {
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return Ok(());
        }
        self.input.clear();
        self.suggestions.close();

        if text.starts_with('/') {
            self.run_command(&text);
            return Ok(());
        }

        let posts = self.posts_api.clone();
        let tx = self.response_tx.clone();
        let channel_id = self.channel_id.clone();
        self.executor.spawn(Box::new(move || {
            let result = posts.create_post(&channel_id, &text);
            let _ = tx.send(AsyncResponse::PostCreated { channel_id, result });
        }));
        Ok(())
    }

    fn run_command(&mut self, text: &str) {
        if let Some(submission) = self.suggestions.submission(text) {
            info!(app = %submission.app_id, location = %submission.location, "ui: app command submitted");
            let mut values: Vec<String> = submission
                .values
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            values.sort();
            self.status_message = format!("Sent {} ({})", submission.location, values.join(", "));
            return;
        }

        let (trigger, rest) = text.split_once(' ').unwrap_or((text, ""));
        let rest = rest.trim();
        match trigger {
            "/join" => {
                let target = self
                    .store
                    .channels()
                    .into_iter()
                    .find(|channel| {
                        channel.name.eq_ignore_ascii_case(rest)
                            || channel.display_name.eq_ignore_ascii_case(rest)
                    });
                match target {
                    Some(channel) => self.switch_channel(&channel.id, None),
                    None => self.status_message = format!("No channel named {rest}"),
                }
            }
            "/leave" => self.leave_channel(),
            "/msg" => {
                let username = rest.split_whitespace().next().unwrap_or_default();
                let username = username.trim_start_matches('@');
                let target = self.store.channels().into_iter().find(|channel| {
                    channel.kind == ChannelKind::Direct && channel.display_name == username
                });
                match target {
                    Some(channel) => self.switch_channel(&channel.id, None),
                    None => self.status_message = format!("No direct messages with {username}"),
                }
            }
            "/away" => self.presence = "away",
            "/dnd" => self.presence = "dnd",
            "/online" => self.presence = "online",
            "/help" => {
                self.status_message = format!(
                    "{HELP_TEXT} · Config: {} · Log: {}",
                    self.config_path, self.log_path
                );
            }
            _ => self.status_message = format!("Command {trigger} not found"),
        }
    }

    fn leave_channel(&mut self) {
        let channels = self.store.channels();
        if channels.len() <= 1 {
            self.status_message = "You can't leave your last channel".to_string();
            return;
        }
        let leaving = self.channel_id.clone();
        let next = self
            .sidebar
            .next_channel_id(&leaving, 1)
            .map(str::to_string)
            .unwrap_or_default();
        self.store.set_channels(
            channels
                .into_iter()
                .filter(|channel| channel.id != leaving)
                .collect(),
        );
        self.refresh_sidebar();
        self.switch_channel(&next, None);
        self.status_message = format!("Left {leaving}");
    }

    fn row_lines(
        &self,
        row: &ListRow,
        lookup: &HashMap<&str, &Post>,
        today: NaiveDate,
    ) -> Vec<Line<'static>> {
        let width = usize::from(self.pane.width.max(1));
        let secondary = Style::default().fg(self.palette.text_secondary);
        match row {
            ListRow::DateSeparator(day) => vec![Line::from(Span::styled(
                centered_label(&post_utils::date_separator_label(*day, today), width),
                secondary,
            ))],
            ListRow::NewMessages => vec![Line::from(Span::styled(
                centered_label("New Messages", width),
                Style::default().fg(self.palette.error),
            ))],
            ListRow::ChannelIntro => vec![
                Line::from(Span::styled(
                    format!("Beginning of {}", self.channel_label(&self.channel_id)),
                    Style::default()
                        .fg(self.palette.text_primary)
                        .add_modifier(Modifier::BOLD),
                )),
                Line::from(Span::styled(
                    "This is the start of the conversation.".to_string(),
                    secondary,
                )),
            ],
            ListRow::MaxLoaded => vec![Line::from(Span::styled(
                "Maximum number of messages loaded".to_string(),
                secondary,
            ))],
            ListRow::Loader(direction) => vec![Line::from(Span::styled(
                format!("{} Loading {} messages…", self.spinner.frame(), direction.label()),
                secondary,
            ))],
            ListRow::ManualLoad(direction) => vec![Line::from(Span::styled(
                format!("Load {} messages (Ctrl+L)", direction.label()),
                Style::default().fg(self.palette.accent),
            ))],
            ListRow::Post(id) => match lookup.get(id.as_str()) {
                Some(post) => self.post_lines(post, width),
                None => vec![Line::from("")],
            },
        }
    }

    fn post_lines(&self, post: &Post, width: usize) -> Vec<Line<'static>> {
        let time = Local
            .timestamp_millis_opt(post.create_at)
            .single()
            .map(|at| at.format("%H:%M").to_string())
            .unwrap_or_default();
        let author = self
            .store
            .profile(&post.user_id)
            .map(|profile| profile.username)
            .unwrap_or_else(|| post.user_id.clone());
        let focused = self.view.focused_post_id() == Some(post.id.as_str());

        let mut message = post.message.clone();
        let mut body = Style::default().fg(self.palette.text_primary);
        match post.post_type {
            PostType::System => {
                body = Style::default()
                    .fg(self.palette.text_secondary)
                    .add_modifier(Modifier::ITALIC);
            }
            PostType::Ephemeral | PostType::EphemeralAddToChannel => {
                message.push_str(" (only visible to you)");
                body = Style::default().fg(self.palette.text_secondary);
            }
            PostType::Ordinary => {}
        }
        if focused {
            body = body.bg(self.palette.selected_bg);
        }

        let prefix = format!("{time} {author}: ");
        let wrapped = wrap_with_prefixes(&message, width, &prefix, MESSAGE_INDENT);
        wrapped
            .into_iter()
            .enumerate()
            .map(|(index, text)| {
                let rest = if index == 0 {
                    text.strip_prefix(prefix.as_str()).map(str::to_string)
                } else {
                    None
                };
                (rest, text)
            })
            .map(|(rest, text)| match rest {
                Some(rest) => Line::from(vec![
                    Span::styled(format!("{time} "), Style::default().fg(self.palette.text_secondary)),
                    Span::styled(
                        format!("{author}: "),
                        Style::default()
                            .fg(self.palette.accent)
                            .add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(rest, body),
                ]),
                None => Line::from(Span::styled(text, body)),
            })
            .collect()
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(
            Block::default().style(Style::default().bg(self.palette.bg)),
            full,
        );
        let areas = areas(full);

        let status = if self.view.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
        } else {
            self.status_message.clone()
        };
        frame.render_widget(
            Paragraph::new(status).style(
                Style::default()
                    .fg(self.palette.text_primary)
                    .bg(self.palette.selected_bg)
                    .add_modifier(Modifier::BOLD),
            ),
            areas.status,
        );

        self.draw_sidebar(frame, areas.sidebar);
        self.draw_posts(frame, areas.posts);
        self.draw_input(frame, areas.input);

        let connection = if self.store.connection().connected {
            Span::styled("● connected", Style::default().fg(self.palette.success))
        } else {
            Span::styled("● offline", Style::default().fg(self.palette.error))
        };
        let footer = Paragraph::new(Line::from(vec![
            connection,
            Span::raw(format!("  {}  ", self.presence)),
            Span::raw(HELP_TEXT),
        ]))
        .style(
            Style::default()
                .fg(self.palette.text_secondary)
                .bg(self.palette.panel_bg)
                .add_modifier(Modifier::ITALIC),
        )
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });
        frame.render_widget(footer, areas.footer);

        if self.suggestions.is_open() && self.sidebar.modal().is_none() {
            self.draw_suggestions(frame, areas.input);
        }
        if let Some(modal) = self.sidebar.modal() {
            self.draw_modal(frame, modal, full);
        }
    }

    fn pane_block(&self, title: String, focused: bool) -> Block<'static> {
        let border = if focused {
            self.palette.border_focused
        } else {
            self.palette.border_idle
        };
        bordered()
            .title(Span::styled(
                title,
                Style::default()
                    .fg(self.palette.accent)
                    .add_modifier(Modifier::BOLD),
            ))
            .border_style(Style::default().fg(border))
            .style(Style::default().bg(self.palette.panel_bg))
    }

    fn draw_sidebar(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let block = self.pane_block("Channels".to_string(), false);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        // (line, flat index of the channel on that line)
        let mut lines: Vec<(Line<'static>, Option<usize>)> = Vec::new();
        let mut flat = 0usize;
        for section in self.sidebar.sections() {
            lines.push((
                Line::from(Span::styled(
                    section.kind.title(),
                    Style::default()
                        .fg(self.palette.text_secondary)
                        .add_modifier(Modifier::BOLD),
                )),
                None,
            ));
            for id in &section.channel_ids {
                let Some(channel) = self.sidebar.channel(id) else {
                    flat += 1;
                    continue;
                };
                let mut style = Style::default().fg(self.palette.text_secondary);
                if self.sidebar.is_unread(id) {
                    style = style
                        .fg(self.palette.text_primary)
                        .add_modifier(Modifier::BOLD);
                }
                if *id == self.channel_id {
                    style = style
                        .bg(self.palette.selected_bg)
                        .fg(self.palette.text_primary);
                }
                lines.push((
                    Line::from(Span::styled(
                        format!(" {}{}", channel_prefix(channel), channel.display_name),
                        style,
                    )),
                    Some(flat),
                ));
                flat += 1;
            }
        }

        let height = usize::from(inner.height);
        let current_line = lines
            .iter()
            .position(|(_, index)| {
                index.and_then(|index| self.sidebar.order().get(index)) == Some(&self.channel_id)
            })
            .unwrap_or(0);
        if current_line < self.sidebar_offset {
            self.sidebar_offset = current_line;
        } else if height > 0 && current_line >= self.sidebar_offset + height {
            self.sidebar_offset = current_line + 1 - height;
        }
        let offset = self.sidebar_offset.min(lines.len().saturating_sub(1));

        let window: Vec<_> = lines.iter().skip(offset).take(height).collect();
        let visible_flat: Vec<usize> = window.iter().filter_map(|(_, index)| *index).collect();
        let visible = match (visible_flat.first(), visible_flat.last()) {
            (Some(first), Some(last)) => *first..*last + 1,
            _ => 0..0,
        };
        let indicators = self.sidebar.unread_indicators(&self.channel_id, visible);

        let text: Vec<Line<'static>> = window.into_iter().map(|(line, _)| line.clone()).collect();
        frame.render_widget(Paragraph::new(Text::from(text)), inner);

        let badge = Style::default()
            .fg(self.palette.bg)
            .bg(self.palette.accent)
            .add_modifier(Modifier::BOLD);
        if indicators.above && inner.height > 0 {
            let top = Rect::new(inner.x, inner.y, inner.width, 1);
            frame.render_widget(
                Paragraph::new(Span::styled("▲ More unreads", badge)).alignment(Alignment::Center),
                top,
            );
        }
        if indicators.below && inner.height > 1 {
            let bottom = Rect::new(inner.x, inner.y + inner.height - 1, inner.width, 1);
            frame.render_widget(
                Paragraph::new(Span::styled("▼ More unreads", badge)).alignment(Alignment::Center),
                bottom,
            );
        }
    }

    fn draw_posts(&self, frame: &mut Frame<'_>, area: Rect) {
        let mut title = self.channel_label(&self.channel_id);
        if self.store.favorites().contains(&self.channel_id) {
            title.push_str(" ★");
        }
        if self.view.is_loading() {
            title.push_str(&format!(" {}", self.spinner.frame()));
        }
        let block = self.pane_block(title, true);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let lookup = post_lookup(self.list.posts());
        let today = Local::now().date_naive();
        let viewport = self.list.viewport();
        let lines: Vec<Line<'static>> = self
            .list
            .rows()
            .iter()
            .flat_map(|row| self.row_lines(row, &lookup, today))
            .skip(viewport.scroll_top as usize)
            .take(usize::from(inner.height))
            .collect();
        frame.render_widget(Paragraph::new(Text::from(lines)), inner);

        if let Some(at) = self.list.floating_timestamp() {
            if let Some(day) = post_utils::local_date(at, &Local) {
                let label = post_utils::date_separator_label(day, today);
                let top = Rect::new(inner.x, inner.y, inner.width, inner.height.min(1));
                frame.render_widget(Clear, top);
                frame.render_widget(
                    Paragraph::new(Span::styled(
                        format!(" {label} "),
                        Style::default()
                            .fg(self.palette.text_primary)
                            .bg(self.palette.selected_bg),
                    ))
                    .alignment(Alignment::Center),
                    top,
                );
            }
        }

        if self.list.show_new_messages_below() && inner.height > 0 {
            let count = self.list.unread_below();
            let label = if count == 1 {
                "↓ 1 new message below (End)".to_string()
            } else {
                format!("↓ {count} new messages below (End)")
            };
            let bottom = Rect::new(inner.x, inner.y + inner.height - 1, inner.width, 1);
            frame.render_widget(Clear, bottom);
            frame.render_widget(
                Paragraph::new(Span::styled(
                    label,
                    Style::default()
                        .fg(self.palette.bg)
                        .bg(self.palette.accent)
                        .add_modifier(Modifier::BOLD),
                ))
                .alignment(Alignment::Center),
                bottom,
            );
        }
    }

    fn draw_input(&self, frame: &mut Frame<'_>, area: Rect) {
        let title = format!("Message {}", self.channel_label(&self.channel_id));
        let block = self.pane_block(title, self.sidebar.modal().is_none());
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let width = UnicodeWidthStr::width(self.input.as_str());
        let visible = usize::from(inner.width.saturating_sub(1));
        let skip = width.saturating_sub(visible);
        let shown: String = self.input.chars().skip(skip).collect();
        frame.render_widget(
            Paragraph::new(shown.clone()).style(Style::default().fg(self.palette.text_primary)),
            inner,
        );
        if self.sidebar.modal().is_none() {
            let cursor = UnicodeWidthStr::width(shown.as_str()) as u16;
            frame.set_cursor(inner.x + cursor.min(inner.width), inner.y);
        }
    }

    fn draw_suggestions(&self, frame: &mut Frame<'_>, input: Rect) {
        let items = self.suggestions.items();
        let rows = (items.len() as u16).min(MAX_SUGGESTION_ROWS);
        let height = rows + 2;
        if input.y < height {
            return;
        }
        let area = Rect::new(input.x, input.y - height, input.width, height);
        let list_items: Vec<ListItem> = items
            .iter()
            .map(|item| {
                let (main, detail) = suggestion_label(item);
                let mut spans = vec![Span::styled(
                    main,
                    Style::default().fg(self.palette.text_primary),
                )];
                if !detail.is_empty() {
                    spans.push(Span::styled(
                        format!("  {detail}"),
                        Style::default().fg(self.palette.text_secondary),
                    ));
                }
                ListItem::new(Line::from(spans))
            })
            .collect();
        let list = List::new(list_items)
            .block(self.pane_block("Suggestions".to_string(), true))
            .highlight_style(
                Style::default()
                    .bg(self.palette.selected_bg)
                    .add_modifier(Modifier::BOLD),
            );
        let mut state = ListState::default().with_selected(Some(self.suggestions.selected()));
        frame.render_widget(Clear, area);
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_modal(&self, frame: &mut Frame<'_>, modal: SidebarModal, full: Rect) {
        let area = centered_rect(50, 60, full);
        frame.render_widget(Clear, area);
        let (title, prompt, entries, selected): (&str, Option<String>, Vec<String>, usize) =
            match modal {
                SidebarModal::QuickSwitch => {
                    let quick = self.sidebar.quick_switch();
                    let entries = quick
                        .results()
                        .iter()
                        .filter_map(|id| self.sidebar.channel(id))
                        .map(|channel| format!("{}{}", channel_prefix(channel), channel.display_name))
                        .collect();
                    (
                        "Switch Channels",
                        Some(format!("> {}", quick.query())),
                        entries,
                        quick.selected(),
                    )
                }
                SidebarModal::NewChannel => (
                    "New Channel",
                    Some(format!("Name: {}", self.modal_input)),
                    vec!["Enter to create · Esc to cancel".to_string()],
                    usize::MAX,
                ),
                SidebarModal::MoreChannels | SidebarModal::DirectChannels => {
                    let title = if modal == SidebarModal::MoreChannels {
                        "Browse Channels"
                    } else {
                        "Direct Messages"
                    };
                    let entries = self
                        .modal_channels(modal)
                        .iter()
                        .map(|channel| format!("{}{}", channel_prefix(channel), channel.display_name))
                        .collect();
                    (title, None, entries, self.modal_selected)
                }
            };

        let block = self.pane_block(title.to_string(), true);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let list_area = if let Some(prompt) = prompt {
            let split = Layout::default()
                .direction(LayoutDirection::Vertical)
                .constraints([Constraint::Length(2), Constraint::Min(0)])
                .split(inner);
            frame.render_widget(
                Paragraph::new(prompt).style(Style::default().fg(self.palette.text_primary)),
                split[0],
            );
            split[1]
        } else {
            inner
        };

        let items: Vec<ListItem> = entries.into_iter().map(ListItem::new).collect();
        let list = List::new(items)
            .style(Style::default().fg(self.palette.text_secondary))
            .highlight_style(
                Style::default()
                    .bg(self.palette.selected_bg)
                    .fg(self.palette.text_primary)
                    .add_modifier(Modifier::BOLD),
            );
        let mut state =
            ListState::default().with_selected((selected != usize::MAX).then_some(selected));
        frame.render_stateful_widget(list, list_area, &mut state);
    }
}

fn post_lookup(posts: &[Post]) -> HashMap<&str, &Post> {
    posts.iter().map(|post| (post.id.as_str(), post)).collect()
}

/// The other member of each direct channel, listed first in mention
/// suggestions.
fn direct_message_partners(store: &Store) -> Vec<crate::model::UserProfile> {
    let me = store.current_user_id();
    store
        .channels()
        .iter()
        .filter(|channel| channel.kind == ChannelKind::Direct)
        .flat_map(|channel| store.channel_members(&channel.id))
        .filter(|profile| profile.id != me)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DemoOptions;
    use crate::executor::ManualExecutor;

    fn model() -> (Model, Arc<ManualExecutor>, Arc<Store>) {
        let store = Arc::new(Store::new("me"));
        let server = Arc::new(DemoServer::new(store.clone(), DemoOptions::default()));
        let executor = ManualExecutor::new();
        let mut config = Config::default();
        config.demo.incoming_rate = 0.0;
        let model = Model::new(Options {
            store: store.clone(),
            server,
            executor: executor.clone(),
            config,
            config_path: "config.yaml".into(),
            log_path: "teamchat.log".into(),
        })
        .unwrap();
        (model, executor, store)
    }

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    fn type_text(model: &mut Model, text: &str) {
        for ch in text.chars() {
            model.handle_key(key(KeyCode::Char(ch), KeyModifiers::NONE)).unwrap();
        }
    }

    fn settle(model: &mut Model, executor: &ManualExecutor) {
        for _ in 0..10 {
            executor.run_all();
            model.poll_async();
        }
    }

    #[test]
    fn pane_geometry_leaves_room_for_sidebar_and_input() {
        let pane = post_pane_inner(Rect::new(0, 0, 100, 30));
        assert_eq!(pane.width, 100 - SIDEBAR_WIDTH - 2);
        assert_eq!(pane.height, 30 - 2 - INPUT_HEIGHT - 2);
    }

    #[test]
    fn centered_label_fills_width() {
        let label = centered_label("Today", 21);
        assert_eq!(UnicodeWidthStr::width(label.as_str()), 21);
        assert!(label.contains(" Today "));
    }

    #[test]
    fn wrapped_message_keeps_prefix_on_first_line() {
        let lines = wrap_with_prefixes("one two three four five", 16, "09:00 ada: ", MESSAGE_INDENT);
        assert!(lines[0].starts_with("09:00 ada: "));
        assert!(lines[1..].iter().all(|line| line.starts_with(MESSAGE_INDENT)));
    }

    #[test]
    fn initial_load_fills_the_list() {
        let (mut model, executor, _) = model();
        assert!(model.view.is_loading());
        settle(&mut model, &executor);
        assert!(!model.view.is_loading());
        assert!(model.list.posts().len() >= 3);
        assert_eq!(model.list.heights().len(), model.list.rows().len());
    }

    #[test]
    fn alt_down_moves_to_next_channel() {
        let (mut model, executor, _) = model();
        settle(&mut model, &executor);
        let expected = model
            .sidebar
            .next_channel_id("town-square", 1)
            .map(str::to_string)
            .unwrap();
        model.handle_key(key(KeyCode::Down, KeyModifiers::ALT)).unwrap();
        assert_eq!(model.channel_id, expected);
        assert_eq!(model.view.channel_id(), expected);
    }

    #[test]
    fn drafts_follow_their_channel() {
        let (mut model, _, _) = model();
        type_text(&mut model, "half a thought");
        model.switch_channel("off-topic", None);
        assert!(model.input.is_empty());
        model.switch_channel("town-square", None);
        assert_eq!(model.input, "half a thought");
    }

    #[test]
    fn ctrl_shift_k_toggles_direct_channels() {
        let (mut model, _, _) = model();
        let toggle = key(KeyCode::Char('K'), KeyModifiers::CONTROL | KeyModifiers::SHIFT);
        model.handle_key(toggle).unwrap();
        assert_eq!(model.sidebar.modal(), Some(SidebarModal::DirectChannels));
        model.handle_key(toggle).unwrap();
        assert_eq!(model.sidebar.modal(), None);
    }

    #[test]
    fn typing_a_mention_opens_suggestions() {
        let (mut model, _, _) = model();
        type_text(&mut model, "hi @ada");
        assert!(model.suggestions.is_open());
        model.handle_key(key(KeyCode::Tab, KeyModifiers::NONE)).unwrap();
        assert!(model.input.starts_with("hi @ada"));
        assert!(model.input.ends_with(' '));
    }

    #[test]
    fn sent_message_lands_at_the_bottom() {
        let (mut model, executor, store) = model();
        settle(&mut model, &executor);
        type_text(&mut model, "shipping it");
        model.handle_key(key(KeyCode::Enter, KeyModifiers::NONE)).unwrap();
        settle(&mut model, &executor);
        let newest = store.posts_in_channel("town-square");
        assert_eq!(newest[0].message, "shipping it");
        assert!(model.list.is_at_bottom());
    }

    #[test]
    fn join_command_switches_channel() {
        let (mut model, _, _) = model();
        type_text(&mut model, "/join engineering");
        model.suggestions.close();
        model.handle_key(key(KeyCode::Enter, KeyModifiers::NONE)).unwrap();
        assert_eq!(model.channel_id, "engineering");
    }

    #[test]
    fn quick_switch_jumps_to_match() {
        let (mut model, _, _) = model();
        model.handle_key(key(KeyCode::Char('k'), KeyModifiers::CONTROL)).unwrap();
        type_text(&mut model, "releas");
        model.handle_key(key(KeyCode::Enter, KeyModifiers::NONE)).unwrap();
        assert_eq!(model.channel_id, "releases");
        assert_eq!(model.sidebar.modal(), None);
    }
}
