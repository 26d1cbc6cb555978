use super::{
    editor,
    screen::{Label, MenuScreen},
};
use crate::{
    services::{
        release::{ReleaseVersion, UpdateDirection},
        state_store::PersistedState,
    },
    types::StaticNetwork,
};
use chrono::{NaiveDateTime, Timelike};
use tokio::time::Instant;

/// Where a message overlay leads once its deadline passes
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OverlayExit {
    Return(MenuScreen),
    Restart,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageOverlay {
    pub id: u64,
    pub message: String,
    pub deadline: Instant,
    pub exit: OverlayExit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdatePhase {
    Idle,
    Checking,
    Confirm,
    Downloading,
    Applying,
    Restarting,
    Failed,
}

impl UpdatePhase {
    /// Phases that must not be interrupted by the idle revert
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            UpdatePhase::Downloading | UpdatePhase::Applying | UpdatePhase::Restarting
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpdateSession {
    pub direction: UpdateDirection,
    /// Candidates newest first, at most three
    pub available: Vec<ReleaseVersion>,
    pub selected: Option<ReleaseVersion>,
    pub phase: UpdatePhase,
}

impl UpdateSession {
    pub fn checking(direction: UpdateDirection) -> Self {
        Self {
            direction,
            available: Vec::new(),
            selected: None,
            phase: UpdatePhase::Checking,
        }
    }
}

/// Everything the menu knows. Owned by the controller; everyone else sees
/// cloned snapshots.
#[derive(Clone, Debug, PartialEq)]
pub struct NavigatorState {
    pub screen: MenuScreen,
    pub selection_index: usize,
    pub edit_cursor: usize,
    pub draft_network: StaticNetwork,
    pub draft_datetime: NaiveDateTime,
    pub draft_time_format_24h: bool,
    pub committed: PersistedState,
    pub last_interaction: Instant,
    pub idle_latched: bool,
    pub overlay: Option<MessageOverlay>,
    pub update: Option<UpdateSession>,
    next_overlay_id: u64,
}

impl NavigatorState {
    pub fn new(committed: PersistedState, now: Instant, local: NaiveDateTime) -> Self {
        let mut state = Self {
            screen: MenuScreen::Default,
            selection_index: 0,
            edit_cursor: 0,
            draft_network: committed.static_network(),
            draft_datetime: local,
            draft_time_format_24h: committed.time_format_24h,
            committed,
            last_interaction: now,
            idle_latched: false,
            overlay: None,
            update: None,
            next_overlay_id: 1,
        };
        state.reset_drafts(local);
        state
    }

    /// Record user activity
    pub fn touch(&mut self, now: Instant) {
        self.last_interaction = now;
        self.idle_latched = false;
    }

    /// Drafts := committed values; the date/time draft starts at `local`
    pub fn reset_drafts(&mut self, local: NaiveDateTime) {
        self.draft_network = self.committed.static_network();
        self.draft_time_format_24h = self.committed.time_format_24h;
        self.draft_datetime = local
            .with_second(0)
            .and_then(|dt| dt.with_nanosecond(0))
            .unwrap_or(local);
    }

    pub fn update_busy(&self) -> bool {
        self.update.as_ref().is_some_and(|s| s.phase.is_busy())
    }

    /// Options of the current screen that can actually be chosen
    pub fn option_count(&self) -> usize {
        let available = self.update.as_ref().map_or(0, |s| s.available.len());

        self.screen
            .entries()
            .iter()
            .flatten()
            .filter(|entry| match entry.label {
                Label::Version(i) => i < available,
                _ => true,
            })
            .count()
    }

    /// Number of fields of the current editor, zero outside editors
    pub fn field_count(&self) -> usize {
        self.screen
            .editor()
            .map_or(0, |kind| editor::field_count(kind, self.draft_time_format_24h))
    }

    pub(crate) fn clamp_selection(&mut self) {
        self.selection_index = self.selection_index.min(self.option_count().saturating_sub(1));
        self.edit_cursor = self.edit_cursor.min(self.field_count().saturating_sub(1));
    }

    pub(crate) fn next_overlay_id(&mut self) -> u64 {
        let id = self.next_overlay_id;
        self.next_overlay_id += 1;
        id
    }
}
