//! Channel list grouping and keyboard navigation.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use tracing::debug;

use crate::model::{Channel, ChannelKind};

const QUICK_SWITCH_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Unread,
    Favorites,
    Public,
    Private,
    Direct,
}

impl SectionKind {
    pub fn title(self) -> &'static str {
        match self {
            SectionKind::Unread => "UNREADS",
            SectionKind::Favorites => "FAVORITES",
            SectionKind::Public => "CHANNELS",
            SectionKind::Private => "PRIVATE CHANNELS",
            SectionKind::Direct => "DIRECT MESSAGES",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    pub channel_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebarModal {
    MoreChannels,
    DirectChannels,
    NewChannel,
    QuickSwitch,
}

/// Whether unread channels sit above or below the visible part of the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnreadIndicators {
    pub above: bool,
    pub below: bool,
}

#[derive(Debug, Default)]
pub struct QuickSwitch {
    query: String,
    results: Vec<String>,
    selected: usize,
}

impl QuickSwitch {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn results(&self) -> &[String] {
        &self.results
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.results.get(self.selected).map(String::as_str)
    }

    pub fn select_next(&mut self) {
        if !self.results.is_empty() {
            self.selected = (self.selected + 1) % self.results.len();
        }
    }

    pub fn select_previous(&mut self) {
        let len = self.results.len();
        if len > 0 {
            self.selected = (self.selected + len - 1) % len;
        }
    }
}

pub struct Sidebar {
    show_unread_section: bool,
    sections: Vec<Section>,
    order: Vec<String>,
    channels: HashMap<String, Channel>,
    unread: HashSet<String>,
    modal: Option<SidebarModal>,
    quick_switch: QuickSwitch,
    matcher: SkimMatcherV2,
}

impl Sidebar {
    pub fn new(show_unread_section: bool) -> Self {
        Self {
            show_unread_section,
            sections: Vec::new(),
            order: Vec::new(),
            channels: HashMap::new(),
            unread: HashSet::new(),
            modal: None,
            quick_switch: QuickSwitch::default(),
            matcher: SkimMatcherV2::default(),
        }
    }

    /// Rebuilds the buckets. Each bucket is sorted by display name; with the
    /// unread section enabled an unread channel appears only there.
    pub fn refresh(
        &mut self,
        channels: &[Channel],
        favorites: &HashSet<String>,
        unread: &HashSet<String>,
    ) {
        let mut buckets: HashMap<SectionKind, Vec<&Channel>> = HashMap::new();
        for channel in channels {
            let kind = if self.show_unread_section && unread.contains(&channel.id) {
                SectionKind::Unread
            } else if favorites.contains(&channel.id) {
                SectionKind::Favorites
            } else {
                match channel.kind {
                    ChannelKind::Open => SectionKind::Public,
                    ChannelKind::Private => SectionKind::Private,
                    ChannelKind::Direct | ChannelKind::Group => SectionKind::Direct,
                }
            };
            buckets.entry(kind).or_default().push(channel);
        }

        self.sections = [
            SectionKind::Unread,
            SectionKind::Favorites,
            SectionKind::Public,
            SectionKind::Private,
            SectionKind::Direct,
        ]
        .into_iter()
        .filter_map(|kind| {
            let mut members = buckets.remove(&kind)?;
            members.sort_by_cached_key(|channel| channel.display_name.to_lowercase());
            Some(Section {
                kind,
                channel_ids: members.into_iter().map(|channel| channel.id.clone()).collect(),
            })
        })
        .collect();

        self.order = self
            .sections
            .iter()
            .flat_map(|section| section.channel_ids.iter().cloned())
            .collect();
        self.channels = channels
            .iter()
            .map(|channel| (channel.id.clone(), channel.clone()))
            .collect();
        self.unread = unread.clone();
        self.refresh_quick_switch();
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Channel ids in navigation order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn is_unread(&self, id: &str) -> bool {
        self.unread.contains(id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.order.iter().position(|candidate| candidate == id)
    }

    /// Moves `delta` steps through the flat order, wrapping at both ends. An
    /// unknown current channel counts as the first one.
    pub fn next_channel_id(&self, current: &str, delta: isize) -> Option<&str> {
        let len = self.order.len() as isize;
        if len == 0 {
            return None;
        }
        let index = self.position(current).unwrap_or(0) as isize;
        let next = (index + delta).rem_euclid(len) as usize;
        self.order.get(next).map(String::as_str)
    }

    /// Nearest unread channel in the direction of `delta`, wrapping around.
    /// The current channel itself is never returned.
    pub fn next_unread_channel_id(&self, current: &str, delta: isize) -> Option<&str> {
        let len = self.order.len() as isize;
        if len == 0 || delta == 0 {
            return None;
        }
        let index = self.position(current).unwrap_or(0) as isize;
        let step = delta.signum();
        (1..len)
            .map(|offset| (index + offset * step).rem_euclid(len) as usize)
            .map(|next| self.order[next].as_str())
            .find(|id| self.unread.contains(*id))
    }

    /// `visible` is the range of flat-order indexes currently on screen.
    pub fn unread_indicators(&self, current: &str, visible: Range<usize>) -> UnreadIndicators {
        let mut unread = self
            .order
            .iter()
            .enumerate()
            .filter(|(_, id)| id.as_str() != current && self.unread.contains(id.as_str()))
            .map(|(index, _)| index);
        let Some(first) = unread.next() else {
            return UnreadIndicators::default();
        };
        let last = unread.last().unwrap_or(first);
        UnreadIndicators {
            above: first < visible.start,
            below: last >= visible.end,
        }
    }

    pub fn modal(&self) -> Option<SidebarModal> {
        self.modal
    }

    pub fn open_modal(&mut self, modal: SidebarModal) {
        debug!(?modal, "sidebar: modal opened");
        if modal == SidebarModal::QuickSwitch {
            self.quick_switch = QuickSwitch::default();
            self.refresh_quick_switch();
        }
        self.modal = Some(modal);
    }

    /// The direct messages shortcut closes the modal when it is already open.
    pub fn toggle_direct_channels(&mut self) {
        if self.modal == Some(SidebarModal::DirectChannels) {
            self.close_modal();
        } else {
            self.open_modal(SidebarModal::DirectChannels);
        }
    }

    pub fn close_modal(&mut self) {
        self.modal = None;
    }

    pub fn quick_switch(&self) -> &QuickSwitch {
        &self.quick_switch
    }

    pub fn quick_switch_mut(&mut self) -> &mut QuickSwitch {
        &mut self.quick_switch
    }

    pub fn set_quick_switch_query(&mut self, query: &str) {
        self.quick_switch.query = query.to_string();
        self.quick_switch.selected = 0;
        self.refresh_quick_switch();
    }

    /// Closes the switcher and returns the chosen channel id.
    pub fn confirm_quick_switch(&mut self) -> Option<String> {
        let chosen = self.quick_switch.selected_id().map(str::to_string);
        self.close_modal();
        chosen
    }

    /// Channels not yet in the sidebar are listed by the more channels modal;
    /// everything here is joined, so it lists the public ones by name.
    pub fn public_channels(&self) -> Vec<&Channel> {
        let mut channels: Vec<&Channel> = self
            .channels
            .values()
            .filter(|channel| channel.kind == ChannelKind::Open)
            .collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        channels
    }

    pub fn direct_channels(&self) -> Vec<&Channel> {
        let mut channels: Vec<&Channel> = self
            .channels
            .values()
            .filter(|channel| matches!(channel.kind, ChannelKind::Direct | ChannelKind::Group))
            .collect();
        channels.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        channels
    }

    fn refresh_quick_switch(&mut self) {
        let query = self.quick_switch.query.trim();
        let results: Vec<String> = if query.is_empty() {
            self.order.iter().take(QUICK_SWITCH_LIMIT).cloned().collect()
        } else {
            let mut scored: Vec<(i64, &String)> = self
                .order
                .iter()
                .filter_map(|id| {
                    let channel = self.channels.get(id)?;
                    let by_display = self.matcher.fuzzy_match(&channel.display_name, query);
                    let by_name = self.matcher.fuzzy_match(&channel.name, query);
                    by_display.max(by_name).map(|score| (score, id))
                })
                .collect();
            // Stable sort keeps sidebar order among equal scores.
            scored.sort_by(|a, b| b.0.cmp(&a.0));
            scored
                .into_iter()
                .take(QUICK_SWITCH_LIMIT)
                .map(|(_, id)| id.clone())
                .collect()
        };
        self.quick_switch.selected = self
            .quick_switch
            .selected
            .min(results.len().saturating_sub(1));
        self.quick_switch.results = results;
    }
}
