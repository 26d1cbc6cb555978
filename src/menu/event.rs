use crate::{
    input::ButtonEvent,
    services::{
        commands::Command,
        release::{CheckOutcome, ReleaseVersion, UpdateFailure},
    },
    types::{NetworkMode, PowerAction, ServiceId, StaticNetwork},
};
use chrono::NaiveDateTime;
use std::fmt;
use tokio::time::Instant;

/// Background actions whose completion is reported back to the navigator
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActionKind {
    Service,
    Network,
    StaticNetwork,
    DateTime,
    Power,
    AppUpdate,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Service => "service switch",
            ActionKind::Network => "network switch",
            ActionKind::StaticNetwork => "static network",
            ActionKind::DateTime => "date/time",
            ActionKind::Power => "power action",
            ActionKind::AppUpdate => "application update",
        };
        f.write_str(name)
    }
}

/// Everything that can change the navigator state
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Button(ButtonEvent),
    Remote(Command),
    IdleTimeout,
    OverlayExpired(u64),
    UpdateChecked(CheckOutcome),
    /// The release archive is downloaded and verified, files are being replaced
    UpdateStaged,
    UpdateFinished(Result<(), UpdateFailure>),
    ActionFinished { action: ActionKind, ok: bool },
}

/// Work requested by a transition, executed outside the navigator
#[derive(Clone, Debug, PartialEq)]
pub enum SideEffect {
    SelectService(ServiceId),
    SelectNetwork(NetworkMode),
    ApplyStaticNetwork(StaticNetwork),
    SetDateTime {
        datetime: NaiveDateTime,
        format_24h: bool,
    },
    Power(PowerAction),
    UpdateApplication(ServiceId),
    CheckForUpdates,
    InstallRelease(ReleaseVersion),
    Restart,
}

impl SideEffect {
    /// Whether the committed state changed and must be saved
    pub fn persists(&self) -> bool {
        matches!(
            self,
            SideEffect::SelectService(_)
                | SideEffect::SelectNetwork(_)
                | SideEffect::ApplyStaticNetwork(_)
                | SideEffect::SetDateTime { .. }
        )
    }
}

/// The two clocks a transition needs: monotonic for deadlines, wall clock
/// for seeding the date/time drafts.
#[derive(Clone, Copy, Debug)]
pub struct Moment {
    pub instant: Instant,
    pub local: NaiveDateTime,
}

impl Moment {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            local: chrono::Local::now().naive_local(),
        }
    }
}
