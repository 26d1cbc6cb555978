//! Idle timeout supervision.
//!
//! The supervisor only watches snapshots and asks the controller to revert;
//! the navigator checks the same conditions again when the request arrives,
//! so a stale snapshot can never revert a screen the user just touched.

use crate::menu::{Event, MenuScreen, NavigatorState};
use log::{debug, info};
use std::time::Duration;
use tokio::{
    sync::{mpsc, watch},
    time::{self, Instant},
};

/// Whether `state` has been left alone for at least `idle_timeout`
pub fn should_revert(state: &NavigatorState, now: Instant, idle_timeout: Duration) -> bool {
    state.screen != MenuScreen::Default
        && !state.idle_latched
        && !state.update_busy()
        && state.overlay.is_none()
        && now.saturating_duration_since(state.last_interaction) >= idle_timeout
}

pub async fn run(
    snapshots: watch::Receiver<NavigatorState>,
    events: mpsc::UnboundedSender<Event>,
    tick: Duration,
    idle_timeout: Duration,
) {
    info!("idle timeout {idle_timeout:?}, checked every {tick:?}");
    let mut interval = time::interval(tick);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let revert = should_revert(&snapshots.borrow(), Instant::now(), idle_timeout);
        if revert {
            debug!("idle threshold reached");
            if events.send(Event::IdleTimeout).is_err() {
                info!("controller stopped, timeout supervisor stopping");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        menu::{
            UpdatePhase,
            state::{MessageOverlay, OverlayExit, UpdateSession},
        },
        services::{release::UpdateDirection, state_store::PersistedState},
    };

    const IDLE: Duration = Duration::from_secs(20);

    fn state_on(screen: MenuScreen, now: Instant) -> NavigatorState {
        let mut state = NavigatorState::new(PersistedState::default(), now, chrono::Local::now().naive_local());
        state.screen = screen;
        state
    }

    #[test]
    fn reverts_after_threshold_only() {
        let now = Instant::now();
        let state = state_on(MenuScreen::MainMenu, now);

        assert!(!should_revert(&state, now + Duration::from_secs(19), IDLE));
        assert!(should_revert(&state, now + IDLE, IDLE));
    }

    #[test]
    fn nothing_to_do_on_default_or_when_latched() {
        let now = Instant::now();
        let later = now + Duration::from_secs(60);

        assert!(!should_revert(&state_on(MenuScreen::Default, now), later, IDLE));

        let mut latched = state_on(MenuScreen::MainMenu, now);
        latched.idle_latched = true;
        assert!(!should_revert(&latched, later, IDLE));
    }

    #[test]
    fn never_interrupts_an_install() {
        let now = Instant::now();
        let mut state = state_on(MenuScreen::UpdateProgress, now);
        let mut session = UpdateSession::checking(UpdateDirection::Upgrade);
        session.phase = UpdatePhase::Applying;
        state.update = Some(session);

        assert!(!should_revert(&state, now + Duration::from_secs(600), IDLE));
    }

    #[test]
    fn overlays_expire_on_their_own() {
        let now = Instant::now();
        let mut state = state_on(MenuScreen::MessageOverlay, now);
        state.overlay = Some(MessageOverlay {
            id: 1,
            message: "REBOOTING...".to_string(),
            deadline: now + Duration::from_secs(3),
            exit: OverlayExit::Return(MenuScreen::Default),
        });

        assert!(!should_revert(&state, now + Duration::from_secs(60), IDLE));
    }

    #[tokio::test(start_paused = true)]
    async fn sends_timeout_from_tick() {
        let now = Instant::now();
        let (_snapshot_tx, snapshots) = watch::channel(state_on(MenuScreen::MainMenu, now));
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(run(snapshots, tx, Duration::from_secs(1), IDLE));

        assert_eq!(rx.recv().await, Some(Event::IdleTimeout));
        assert!(Instant::now() >= now + IDLE);
    }
}
