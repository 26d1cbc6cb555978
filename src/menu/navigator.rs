use super::{
    editor::{self, FAST_STEP},
    event::{ActionKind, Event, Moment, SideEffect},
    screen::{EditorKind, InfoPage, MenuAction, MenuScreen, ScreenKind, Target},
    state::{MessageOverlay, NavigatorState, OverlayExit, UpdatePhase, UpdateSession},
};
use crate::{
    config::PanelConfig,
    input::{ButtonEvent, ButtonId, PressKind},
    services::{
        commands::Command,
        release::{CheckOutcome, ReleaseVersion, UpdateDirection, UpdateFailure, select_candidates},
    },
    types::{NetworkMode, PowerAction, ServiceId, StaticNetwork},
};
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use std::time::Duration;

/// What a button does on the current screen
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    None,
    Open(MenuScreen),
    Select(usize),
    Adjust(i32),
    MoveCursor(i32),
    Cancel,
    Apply,
}

/// The complete (screen, button, kind) table; anything not listed does nothing
pub fn action_for(screen: MenuScreen, button: ButtonId, kind: PressKind) -> Action {
    use ButtonId::*;
    use PressKind::*;

    match (screen.kind(), button, kind) {
        (ScreenKind::Home, K1 | K2, Press) => Action::Open(MenuScreen::MainMenu),
        (ScreenKind::Home, K3, Press) => Action::Open(MenuScreen::InfoOverlay(InfoPage::Health)),
        (ScreenKind::Home, K4, Press) => Action::Open(MenuScreen::InfoOverlay(InfoPage::Network)),
        (ScreenKind::Info, _, Press) => Action::Open(MenuScreen::Default),
        (ScreenKind::List, _, Press) => Action::Select(button.index()),
        (ScreenKind::Editor, K1, Press) => Action::Adjust(1),
        (ScreenKind::Editor, K2, Press) => Action::Adjust(-1),
        (ScreenKind::Editor, K1, HoldStart | HoldRepeat) => Action::Adjust(FAST_STEP),
        (ScreenKind::Editor, K2, HoldStart | HoldRepeat) => Action::Adjust(-FAST_STEP),
        (ScreenKind::Editor, K3, Press) => Action::MoveCursor(-1),
        (ScreenKind::Editor, K4, Press) => Action::MoveCursor(1),
        (ScreenKind::Editor, K3, HoldStart) => Action::Cancel,
        (ScreenKind::Editor, K4, HoldStart) => Action::Apply,
        _ => Action::None,
    }
}

#[derive(Clone, Debug)]
pub struct NavigatorSettings {
    pub idle_timeout: Duration,
    pub message_duration: Duration,
    pub update_message_duration: Duration,
    pub current_version: ReleaseVersion,
}

impl NavigatorSettings {
    pub fn from_config(panel: &PanelConfig) -> Self {
        Self {
            idle_timeout: panel.idle_timeout,
            message_duration: panel.message_duration,
            update_message_duration: panel.update_message_duration,
            current_version: ReleaseVersion::current(),
        }
    }
}

/// The menu state machine.
///
/// [`Navigator::handle`] is the only code that mutates [`NavigatorState`].
/// It never performs I/O; work outside the state is returned as a
/// [`SideEffect`] for the caller to execute.
#[derive(Clone, Debug)]
pub struct Navigator {
    settings: NavigatorSettings,
}

impl Navigator {
    pub fn new(settings: NavigatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &NavigatorSettings {
        &self.settings
    }

    pub fn handle(&self, state: &mut NavigatorState, event: Event, moment: Moment) -> Option<SideEffect> {
        let effect = match event {
            Event::Button(button) => {
                state.touch(moment.instant);
                self.on_button(state, button, moment)
            }
            Event::Remote(command) => {
                state.touch(moment.instant);
                self.on_command(state, command, moment)
            }
            Event::IdleTimeout => {
                self.on_idle(state, moment);
                None
            }
            Event::OverlayExpired(id) => self.on_overlay_expired(state, id, moment),
            Event::UpdateChecked(outcome) => {
                self.on_update_checked(state, outcome, moment);
                None
            }
            Event::UpdateStaged => {
                if let Some(session) = state.update.as_mut().filter(|s| s.phase == UpdatePhase::Downloading) {
                    session.phase = UpdatePhase::Applying;
                }
                None
            }
            Event::UpdateFinished(result) => {
                self.on_update_finished(state, result, moment);
                None
            }
            Event::ActionFinished { action, ok } => self.on_action_finished(state, action, ok, moment),
        };

        state.clamp_selection();
        effect
    }

    fn on_button(&self, state: &mut NavigatorState, event: ButtonEvent, moment: Moment) -> Option<SideEffect> {
        let action = action_for(state.screen, event.button, event.kind);
        debug!("{:?} {} {:?} -> {action:?}", state.screen, event.button, event.kind);

        match action {
            Action::None => None,
            Action::Open(screen) => {
                self.enter(state, screen, moment);
                None
            }
            Action::Select(slot) => self.select(state, slot, moment),
            Action::Adjust(step) => {
                if let Some(kind) = state.screen.editor() {
                    editor::adjust(state, kind, step);
                }
                None
            }
            Action::MoveCursor(delta) => {
                if let Some(kind) = state.screen.editor() {
                    editor::move_cursor(state, kind, delta);
                }
                None
            }
            Action::Cancel => {
                let parent = state.screen.parent();
                state.reset_drafts(moment.local);
                self.enter(state, parent, moment);
                None
            }
            Action::Apply => self.apply(state, moment),
        }
    }

    fn on_command(&self, state: &mut NavigatorState, command: Command, moment: Moment) -> Option<SideEffect> {
        info!("remote command: {command:?}");

        match command {
            Command::ButtonPress(event) => self.on_button(state, event, moment),
            Command::ToggleService(service) => Some(self.select_service(state, service, moment)),
            Command::ToggleNetwork(mode) => Some(self.select_network(state, mode, moment)),
            Command::SetStaticIp(network) => {
                Some(self.commit_static_network(state, network, MenuScreen::Default, moment))
            }
            Command::Power(action) => self.power(state, action, moment),
            Command::SetDateTime { datetime, format_24h } => self.set_datetime(state, datetime, format_24h, moment),
            Command::UpdateAppStable(service) => {
                self.enter(state, MenuScreen::Default, moment);
                Some(SideEffect::UpdateApplication(service))
            }
            Command::MenuNavigate(screen) => {
                if screen.is_remote_navigable() {
                    self.enter(state, screen, moment);
                } else {
                    warn!("refuse remote navigation to {screen:?}");
                }
                None
            }
        }
    }

    fn on_idle(&self, state: &mut NavigatorState, moment: Moment) {
        if state.idle_latched
            || state.update_busy()
            || state.overlay.is_some()
            || moment.instant.saturating_duration_since(state.last_interaction) < self.settings.idle_timeout
        {
            return;
        }

        if state.screen != MenuScreen::Default {
            info!("idle timeout on {:?}, back to default screen", state.screen);
            self.enter(state, MenuScreen::Default, moment);
        }
        state.idle_latched = true;
    }

    fn on_overlay_expired(&self, state: &mut NavigatorState, id: u64, moment: Moment) -> Option<SideEffect> {
        if state.overlay.as_ref().map(|o| o.id) != Some(id) {
            debug!("ignore expiry of replaced overlay {id}");
            return None;
        }

        let exit = state.overlay.as_ref()?.exit.clone();
        match exit {
            OverlayExit::Restart => Some(SideEffect::Restart),
            OverlayExit::Return(screen) => {
                let screen = if screen == MenuScreen::UpdateProgress && !state.update_busy() {
                    MenuScreen::Default
                } else {
                    screen
                };
                self.enter(state, screen, moment);
                state.last_interaction = moment.instant;
                state.idle_latched = screen == MenuScreen::Default;
                None
            }
        }
    }

    fn on_update_checked(&self, state: &mut NavigatorState, outcome: CheckOutcome, moment: Moment) {
        let Some(session) = state.update.as_mut().filter(|s| s.phase == UpdatePhase::Checking) else {
            debug!("ignore update check result without a waiting session");
            return;
        };

        let versions = match outcome {
            CheckOutcome::Available(versions) => versions,
            CheckOutcome::NoVersions => return self.fail_update(state, UpdateFailure::NoVersions, moment),
            CheckOutcome::RateLimited => return self.fail_update(state, UpdateFailure::RateLimited, moment),
        };

        let direction = session.direction;
        let candidates = select_candidates(direction, &self.settings.current_version, &versions);
        if candidates.is_empty() {
            let message = match direction {
                UpdateDirection::Upgrade => "UP TO DATE",
                UpdateDirection::Downgrade => "NO OLDER VERSIONS",
            };
            info!("no update candidates: {message}");
            state.update = None;
            self.show_overlay(
                state,
                message,
                self.settings.message_duration,
                OverlayExit::Return(MenuScreen::UpdateMenu),
                moment,
            );
            return;
        }

        session.available = candidates;
        session.phase = UpdatePhase::Confirm;
        self.enter(state, MenuScreen::VersionSelect, moment);
    }

    fn on_update_finished(&self, state: &mut NavigatorState, result: Result<(), UpdateFailure>, moment: Moment) {
        let Some(session) = state
            .update
            .as_mut()
            .filter(|s| matches!(s.phase, UpdatePhase::Downloading | UpdatePhase::Applying))
        else {
            warn!("ignore update result without an installing session");
            return;
        };

        match result {
            Ok(()) => {
                session.phase = UpdatePhase::Restarting;
                let message = match &session.selected {
                    Some(version) => format!("UPDATED TO {version}"),
                    None => "UPDATED".to_string(),
                };
                info!("{message}, restart pending");
                self.show_overlay(
                    state,
                    message,
                    self.settings.update_message_duration,
                    OverlayExit::Restart,
                    moment,
                );
            }
            Err(failure) => self.fail_update(state, failure, moment),
        }
    }

    fn on_action_finished(
        &self,
        state: &mut NavigatorState,
        action: ActionKind,
        ok: bool,
        moment: Moment,
    ) -> Option<SideEffect> {
        match (action, ok) {
            (ActionKind::DateTime, true) => {
                info!("clock set, restart to pick up the new time");
                Some(SideEffect::Restart)
            }
            (ActionKind::DateTime, false) => {
                self.show_overlay(
                    state,
                    "CLOCK NOT SET",
                    self.settings.message_duration,
                    OverlayExit::Return(MenuScreen::Default),
                    moment,
                );
                None
            }
            (_, true) => None,
            (action, false) => {
                warn!("{action} did not complete, state unchanged");
                None
            }
        }
    }

    fn select(&self, state: &mut NavigatorState, slot: usize, moment: Moment) -> Option<SideEffect> {
        let entry = state.screen.entries().get(slot).copied().flatten()?;

        if let Target::Act(MenuAction::PickVersion(i)) = entry.target {
            let available = state.update.as_ref().map_or(0, |s| s.available.len());
            if i >= available {
                return None;
            }
        }
        state.selection_index = slot;

        match entry.target {
            Target::Display => None,
            Target::Screen(screen) => {
                if screen == MenuScreen::VersionSelect {
                    if let Some(session) = state.update.as_mut() {
                        session.selected = None;
                    }
                }
                self.enter(state, screen, moment);
                None
            }
            Target::Act(action) => self.perform(state, action, moment),
        }
    }

    fn perform(&self, state: &mut NavigatorState, action: MenuAction, moment: Moment) -> Option<SideEffect> {
        match action {
            MenuAction::SelectService(service) => Some(self.select_service(state, service, moment)),
            MenuAction::SelectNetwork(mode) => Some(self.select_network(state, mode, moment)),
            MenuAction::Power(action) => self.power(state, action, moment),
            MenuAction::CheckUpdates(direction) => {
                if state.update.is_some() {
                    debug!("update session already running");
                    return None;
                }
                info!("check for {direction:?} versions");
                state.update = Some(UpdateSession::checking(direction));
                Some(SideEffect::CheckForUpdates)
            }
            MenuAction::PickVersion(i) => {
                let session = state.update.as_mut().filter(|s| s.phase == UpdatePhase::Confirm)?;
                session.selected = Some(session.available.get(i)?.clone());
                let gate = match session.direction {
                    UpdateDirection::Upgrade => MenuScreen::UpdateConfirm,
                    UpdateDirection::Downgrade => MenuScreen::DowngradeConfirm,
                };
                self.enter(state, gate, moment);
                None
            }
            MenuAction::Install => {
                let session = state.update.as_mut().filter(|s| s.phase == UpdatePhase::Confirm)?;
                let version = session.selected.clone()?;
                session.phase = UpdatePhase::Downloading;
                info!("install {version}");
                self.show_overlay(
                    state,
                    format!("DOWNLOADING {version}"),
                    self.settings.message_duration,
                    OverlayExit::Return(MenuScreen::UpdateProgress),
                    moment,
                );
                Some(SideEffect::InstallRelease(version))
            }
        }
    }

    fn apply(&self, state: &mut NavigatorState, moment: Moment) -> Option<SideEffect> {
        match state.screen.editor()? {
            EditorKind::Octets(_) => {
                let parent = state.screen.parent();
                let network = state.draft_network;
                Some(self.commit_static_network(state, network, parent, moment))
            }
            EditorKind::Date | EditorKind::Time => {
                let (datetime, format_24h) = (state.draft_datetime, state.draft_time_format_24h);
                self.set_datetime(state, datetime, format_24h, moment)
            }
        }
    }

    fn select_service(&self, state: &mut NavigatorState, service: ServiceId, moment: Moment) -> SideEffect {
        state.committed.service = service;
        self.enter(state, MenuScreen::Default, moment);
        SideEffect::SelectService(service)
    }

    fn select_network(&self, state: &mut NavigatorState, mode: NetworkMode, moment: Moment) -> SideEffect {
        state.committed.network = mode;
        self.enter(state, MenuScreen::Default, moment);
        SideEffect::SelectNetwork(mode)
    }

    fn commit_static_network(
        &self,
        state: &mut NavigatorState,
        network: StaticNetwork,
        next: MenuScreen,
        moment: Moment,
    ) -> SideEffect {
        state.committed.set_static_network(network);
        state.reset_drafts(moment.local);
        self.enter(state, next, moment);
        SideEffect::ApplyStaticNetwork(network)
    }

    fn power(&self, state: &mut NavigatorState, action: PowerAction, moment: Moment) -> Option<SideEffect> {
        if state.update_busy() {
            warn!("refuse {action} while an update is installing");
            return None;
        }

        let message = match action {
            PowerAction::Reboot => "REBOOTING...",
            PowerAction::Shutdown => "SHUTTING DOWN...",
        };
        self.show_overlay(
            state,
            message,
            self.settings.message_duration,
            OverlayExit::Return(MenuScreen::Default),
            moment,
        );
        Some(SideEffect::Power(action))
    }

    fn set_datetime(
        &self,
        state: &mut NavigatorState,
        datetime: NaiveDateTime,
        format_24h: bool,
        moment: Moment,
    ) -> Option<SideEffect> {
        if state.update_busy() {
            warn!("refuse clock change while an update is installing");
            return None;
        }

        state.committed.time_format_24h = format_24h;
        self.show_overlay(
            state,
            "SETTING DATE/TIME",
            self.settings.message_duration,
            OverlayExit::Return(MenuScreen::Default),
            moment,
        );
        Some(SideEffect::SetDateTime { datetime, format_24h })
    }

    fn fail_update(&self, state: &mut NavigatorState, failure: UpdateFailure, moment: Moment) {
        warn!("update failed: {failure}");
        if let Some(session) = state.update.as_mut() {
            session.phase = UpdatePhase::Failed;
        }
        self.show_overlay(
            state,
            failure.message(),
            self.settings.update_message_duration,
            OverlayExit::Return(MenuScreen::Default),
            moment,
        );
    }

    fn show_overlay(
        &self,
        state: &mut NavigatorState,
        message: impl Into<String>,
        duration: Duration,
        exit: OverlayExit,
        moment: Moment,
    ) {
        let id = state.next_overlay_id();
        state.overlay = Some(MessageOverlay {
            id,
            message: message.into(),
            deadline: moment.instant + duration,
            exit,
        });
        state.screen = MenuScreen::MessageOverlay;
        state.selection_index = 0;
        state.edit_cursor = 0;
    }

    /// Switch screens. Entering an editor or the default screen reseeds the
    /// drafts; leaving the update flow ends an update session that is not
    /// installing.
    fn enter(&self, state: &mut NavigatorState, screen: MenuScreen, moment: Moment) {
        if screen.editor().is_some() || screen == MenuScreen::Default {
            state.reset_drafts(moment.local);
        }
        if !screen.is_update_flow() && !state.update_busy() && state.update.take().is_some() {
            debug!("update session ended");
        }

        debug!("screen {:?} -> {screen:?}", state.screen);
        state.overlay = None;
        state.screen = screen;
        state.selection_index = 0;
        state.edit_cursor = 0;
    }
}
