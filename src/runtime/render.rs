use super::view::{self, Display, FrameInput, PanelInfo};
use crate::{menu::NavigatorState, system_adapter::Telemetry};
use log::{info, warn};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{Notify, watch},
    time::{self, Instant},
};

/// Draws frames from state snapshots.
///
/// Ticks are throttled by a minimum interval and flip the blink phase.
/// Explicit render requests draw at once. A message overlay is drawn once
/// and left alone by the ticks until it is replaced.
pub struct RenderScheduler<D> {
    display: D,
    snapshots: watch::Receiver<NavigatorState>,
    telemetry: watch::Receiver<Option<Telemetry>>,
    info: PanelInfo,
    tick: Duration,
    min_interval: Duration,
    blink: bool,
    last_render: Option<Instant>,
    drawn_overlay: Option<u64>,
}

impl<D: Display> RenderScheduler<D> {
    pub fn new(
        display: D,
        snapshots: watch::Receiver<NavigatorState>,
        telemetry: watch::Receiver<Option<Telemetry>>,
        info: PanelInfo,
        tick: Duration,
        min_interval: Duration,
    ) -> Self {
        Self {
            display,
            snapshots,
            telemetry,
            info,
            tick,
            min_interval,
            blink: true,
            last_render: None,
            drawn_overlay: None,
        }
    }

    /// Periodic render, returns whether a frame was drawn
    pub fn on_tick(&mut self, now: Instant) -> bool {
        self.blink = !self.blink;

        let overlay = self.snapshots.borrow().overlay.as_ref().map(|o| o.id);
        if overlay.is_some() && overlay == self.drawn_overlay {
            return false;
        }
        if self
            .last_render
            .is_some_and(|last| now.saturating_duration_since(last) < self.min_interval)
        {
            return false;
        }

        self.render(now);
        true
    }

    /// Out of band render, ignores the throttle
    pub fn render_now(&mut self, now: Instant) {
        self.render(now);
    }

    fn render(&mut self, now: Instant) {
        let state = self.snapshots.borrow().clone();
        let telemetry = self.telemetry.borrow().clone();

        let frame = view::frame(&FrameInput {
            state: &state,
            info: &self.info,
            telemetry: telemetry.as_ref(),
            local: chrono::Local::now().naive_local(),
            blink: self.blink,
        });

        if let Err(e) = self.display.show(&frame) {
            warn!("failed to draw frame: {e:#}");
        }
        self.last_render = Some(now);
        self.drawn_overlay = state.overlay.as_ref().map(|o| o.id);
    }

    pub async fn run(mut self, requests: Arc<Notify>) {
        info!("render tick {:?}, min interval {:?}", self.tick, self.min_interval);
        let mut interval = time::interval(self.tick);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.on_tick(Instant::now());
                }
                _ = requests.notified() => self.render_now(Instant::now()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        menu::{
            MenuScreen,
            state::{MessageOverlay, OverlayExit},
        },
        runtime::view::Frame,
        services::state_store::PersistedState,
    };
    use anyhow::Result;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Frame>>>);

    impl Recorder {
        fn count(&self) -> usize {
            self.0.lock().expect("lock").len()
        }

        fn last(&self) -> Frame {
            self.0.lock().expect("lock").last().cloned().expect("a frame")
        }
    }

    impl Display for Recorder {
        fn show(&mut self, frame: &Frame) -> Result<()> {
            self.0.lock().expect("lock").push(frame.clone());
            Ok(())
        }
    }

    struct Fixture {
        recorder: Recorder,
        scheduler: RenderScheduler<Recorder>,
        state_tx: watch::Sender<NavigatorState>,
        _telemetry_tx: watch::Sender<Option<Telemetry>>,
    }

    fn fixture(min_interval: Duration) -> Fixture {
        let state = NavigatorState::new(PersistedState::default(), Instant::now(), chrono::Local::now().naive_local());
        let (state_tx, snapshots) = watch::channel(state);
        let (telemetry_tx, telemetry) = watch::channel(None);
        let config = AppConfig::load().expect("defaults should load");
        let info = PanelInfo::new(&config.system, "V3.4.0".parse().expect("version"));
        let recorder = Recorder::default();
        let scheduler = RenderScheduler::new(
            recorder.clone(),
            snapshots,
            telemetry,
            info,
            Duration::from_millis(500),
            min_interval,
        );

        Fixture {
            recorder,
            scheduler,
            state_tx,
            _telemetry_tx: telemetry_tx,
        }
    }

    #[test]
    fn ticks_are_throttled() {
        let mut f = fixture(Duration::from_millis(50));
        let now = Instant::now();

        assert!(f.scheduler.on_tick(now));
        assert!(!f.scheduler.on_tick(now + Duration::from_millis(20)));
        assert!(f.scheduler.on_tick(now + Duration::from_millis(70)));
        assert_eq!(f.recorder.count(), 2);
    }

    #[test]
    fn immediate_render_bypasses_throttle() {
        let mut f = fixture(Duration::from_secs(10));
        let now = Instant::now();

        f.scheduler.on_tick(now);
        f.state_tx.send_modify(|s| s.screen = MenuScreen::MainMenu);
        f.scheduler.render_now(now);

        assert_eq!(f.recorder.count(), 2);
        assert_eq!(f.recorder.last().lines[0], format!("{:<15}^", "APPLICATION"));
    }

    #[test]
    fn overlay_is_drawn_once() {
        let mut f = fixture(Duration::from_millis(50));
        let now = Instant::now();
        f.state_tx.send_modify(|s| {
            s.screen = MenuScreen::MessageOverlay;
            s.overlay = Some(MessageOverlay {
                id: 7,
                message: "UP TO DATE".to_string(),
                deadline: now + Duration::from_secs(3),
                exit: OverlayExit::Return(MenuScreen::UpdateMenu),
            });
        });

        f.scheduler.render_now(now);
        assert!(!f.scheduler.on_tick(now + Duration::from_secs(1)));
        assert!(!f.scheduler.on_tick(now + Duration::from_secs(2)));

        assert_eq!(f.recorder.count(), 1);
        assert_eq!(f.recorder.last().lines[1], "UP TO DATE");
    }

    #[test]
    fn blink_flips_each_tick() {
        let mut f = fixture(Duration::ZERO);
        let now = Instant::now();
        f.state_tx.send_modify(|s| {
            s.screen = MenuScreen::SetGateway;
            s.edit_cursor = 0;
        });

        f.scheduler.on_tick(now);
        let first = f.recorder.last();
        f.scheduler.on_tick(now + Duration::from_millis(500));
        let second = f.recorder.last();

        assert_ne!(first.lines[1], second.lines[1]);
        assert!(first.lines[1].contains("[192]") || second.lines[1].contains("[192]"));
    }
}
