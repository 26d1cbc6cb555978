use super::{ButtonEvent, ButtonId, Edge, debounce::RateLimiter};
use log::{debug, info};
use std::time::Duration;
use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};

#[derive(Clone, Copy, Debug)]
pub struct HoldTimings {
    /// Time a button must stay down before `HoldStart` fires
    pub hold: Duration,
    /// Cadence of `HoldRepeat` after `HoldStart`, `None` disables repeats
    pub repeat: Option<Duration>,
}

#[derive(Clone, Copy, Debug)]
struct Actuation {
    deadline: Option<Instant>,
    held: bool,
    /// A release arrived inside the debounce window and takes effect here
    /// unless the button goes down again first
    settle: Option<Instant>,
}

/// Turns debounced edges into press/hold events.
///
/// Each actuation ends in exactly one of: a `Press` on release, or a
/// `HoldStart` (plus optional `HoldRepeat`s) with nothing on release.
pub struct InputDispatcher {
    limiter: RateLimiter,
    timings: HoldTimings,
    active: [Option<Actuation>; 4],
}

impl InputDispatcher {
    pub fn new(limiter: RateLimiter, timings: HoldTimings) -> Self {
        Self {
            limiter,
            timings,
            active: [None; 4],
        }
    }

    /// Feed one edge, returning the event it completes, if any.
    pub fn on_edge(&mut self, edge: Edge) -> Option<ButtonEvent> {
        let slot = edge.button.index();

        if edge.pressed {
            match self.active[slot].as_mut() {
                Some(actuation) => {
                    if actuation.settle.take().is_some() {
                        debug!("{} bounced back down", edge.button);
                    } else {
                        debug!("ignore repeated down edge on {}", edge.button);
                    }
                }
                None if !self.limiter.accept(edge.button, edge.at) => debug!("debounced {}", edge.button),
                None => {
                    self.active[slot] = Some(Actuation {
                        deadline: Some(edge.at + self.timings.hold),
                        held: false,
                        settle: None,
                    });
                }
            }
            return None;
        }

        let actuation = self.active[slot].as_mut()?;
        if !self.limiter.accept(edge.button, edge.at) {
            debug!("defer release of {}", edge.button);
            actuation.settle = Some(self.limiter.ready_at(edge.button).unwrap_or(edge.at));
            return None;
        }

        match self.active[slot].take() {
            Some(Actuation { held: false, .. }) => Some(ButtonEvent::press(edge.button)),
            _ => None,
        }
    }

    /// Earliest pending hold or settle deadline across all buttons.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.active
            .iter()
            .flatten()
            .filter_map(|a| a.settle.or(a.deadline))
            .min()
    }

    /// Fire every deadline that has passed at `now`.
    pub fn poll(&mut self, now: Instant) -> Vec<ButtonEvent> {
        let mut events = Vec::new();

        for (button, slot) in ButtonId::ALL.into_iter().zip(self.active.iter_mut()) {
            let Some(actuation) = slot.as_mut() else {
                continue;
            };

            if let Some(settle) = actuation.settle {
                if settle <= now {
                    self.limiter.accept(button, settle);
                    if !actuation.held {
                        events.push(ButtonEvent::press(button));
                    }
                    *slot = None;
                }
                continue;
            }

            let Some(deadline) = actuation.deadline else {
                continue;
            };
            if deadline > now {
                continue;
            }

            if actuation.held {
                events.push(ButtonEvent::hold_repeat(button));
            } else {
                actuation.held = true;
                events.push(ButtonEvent::hold_start(button));
            }
            actuation.deadline = self.timings.repeat.map(|repeat| deadline + repeat);
        }

        events
    }

    /// Run until either channel closes.
    pub async fn run(mut self, mut edges: mpsc::Receiver<Edge>, events: mpsc::Sender<ButtonEvent>) {
        info!("input dispatcher started");

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                edge = edges.recv() => {
                    let Some(edge) = edge else {
                        info!("edge source closed, input dispatcher stopping");
                        return;
                    };
                    if let Some(event) = self.on_edge(edge) {
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                _ = wait_until(deadline) => {
                    for event in self.poll(Instant::now()) {
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::PressKind;

    fn dispatcher(repeat: Option<u64>) -> InputDispatcher {
        InputDispatcher::new(
            RateLimiter::new(Duration::from_millis(50)),
            HoldTimings {
                hold: Duration::from_millis(1000),
                repeat: repeat.map(Duration::from_millis),
            },
        )
    }

    fn edge(button: ButtonId, pressed: bool, at: Instant) -> Edge {
        Edge { button, pressed, at }
    }

    mod edges {
        use super::*;

        #[test]
        fn short_actuation_is_a_press() {
            let mut d = dispatcher(None);
            let t0 = Instant::now();

            assert_eq!(d.on_edge(edge(ButtonId::K2, true, t0)), None);
            assert_eq!(
                d.on_edge(edge(ButtonId::K2, false, t0 + Duration::from_millis(120))),
                Some(ButtonEvent::press(ButtonId::K2))
            );
        }

        #[test]
        fn bounce_yields_single_press() {
            let mut d = dispatcher(None);
            let t0 = Instant::now();
            let ms = Duration::from_millis;

            let events: Vec<_> = [
                edge(ButtonId::K1, true, t0),
                edge(ButtonId::K1, false, t0 + ms(3)),
                edge(ButtonId::K1, true, t0 + ms(6)),
                edge(ButtonId::K1, false, t0 + ms(9)),
            ]
            .into_iter()
            .filter_map(|e| d.on_edge(e))
            .collect();

            assert!(events.is_empty());
            assert_eq!(d.next_deadline(), Some(t0 + ms(50)));
            assert_eq!(d.poll(t0 + ms(50)), vec![ButtonEvent::press(ButtonId::K1)]);
            assert_eq!(d.next_deadline(), None);
        }

        #[test]
        fn bounce_after_release_yields_single_press() {
            let mut d = dispatcher(None);
            let t0 = Instant::now();
            let ms = Duration::from_millis;

            let events: Vec<_> = [
                edge(ButtonId::K1, true, t0),
                edge(ButtonId::K1, false, t0 + ms(200)),
                edge(ButtonId::K1, true, t0 + ms(203)),
                edge(ButtonId::K1, false, t0 + ms(206)),
            ]
            .into_iter()
            .filter_map(|e| d.on_edge(e))
            .collect();

            assert_eq!(events, vec![ButtonEvent::press(ButtonId::K1)]);
            assert_eq!(d.next_deadline(), None);
        }

        #[test]
        fn press_bounce_does_not_cut_a_hold_short() {
            let mut d = dispatcher(None);
            let t0 = Instant::now();
            let ms = Duration::from_millis;

            d.on_edge(edge(ButtonId::K4, true, t0));
            assert_eq!(d.on_edge(edge(ButtonId::K4, false, t0 + ms(2))), None);
            assert_eq!(d.on_edge(edge(ButtonId::K4, true, t0 + ms(4))), None);

            assert_eq!(d.next_deadline(), Some(t0 + ms(1000)));
            assert_eq!(d.poll(t0 + ms(1000)), vec![ButtonEvent::hold_start(ButtonId::K4)]);
        }

        #[test]
        fn next_actuation_after_interval_is_accepted() {
            let mut d = dispatcher(None);
            let t0 = Instant::now();
            let ms = Duration::from_millis;

            d.on_edge(edge(ButtonId::K2, true, t0));
            d.on_edge(edge(ButtonId::K2, false, t0 + ms(100)));
            d.on_edge(edge(ButtonId::K2, true, t0 + ms(160)));

            assert_eq!(
                d.on_edge(edge(ButtonId::K2, false, t0 + ms(260))),
                Some(ButtonEvent::press(ButtonId::K2))
            );
        }

        #[test]
        fn release_without_press_is_ignored() {
            let mut d = dispatcher(None);
            assert_eq!(d.on_edge(edge(ButtonId::K3, false, Instant::now())), None);
        }
    }

    mod holds {
        use super::*;

        #[test]
        fn hold_suppresses_press_on_release() {
            let mut d = dispatcher(None);
            let t0 = Instant::now();

            d.on_edge(edge(ButtonId::K4, true, t0));
            assert_eq!(d.next_deadline(), Some(t0 + Duration::from_millis(1000)));
            assert!(d.poll(t0 + Duration::from_millis(999)).is_empty());

            let fired = d.poll(t0 + Duration::from_millis(1000));
            assert_eq!(fired, vec![ButtonEvent::hold_start(ButtonId::K4)]);
            assert_eq!(d.next_deadline(), None);

            assert_eq!(
                d.on_edge(edge(ButtonId::K4, false, t0 + Duration::from_millis(1500))),
                None
            );
        }

        #[test]
        fn repeats_follow_hold_start() {
            let mut d = dispatcher(Some(600));
            let t0 = Instant::now();
            let ms = Duration::from_millis;

            d.on_edge(edge(ButtonId::K1, true, t0));
            let kinds: Vec<PressKind> = [ms(1000), ms(1600), ms(2200)]
                .into_iter()
                .flat_map(|offset| d.poll(t0 + offset))
                .map(|e| e.kind)
                .collect();

            assert_eq!(
                kinds,
                vec![PressKind::HoldStart, PressKind::HoldRepeat, PressKind::HoldRepeat]
            );
            assert_eq!(d.next_deadline(), Some(t0 + ms(2800)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_emits_hold_from_timer() {
        let (edge_tx, edge_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        tokio::spawn(dispatcher(None).run(edge_rx, event_tx));

        edge_tx
            .send(edge(ButtonId::K3, true, Instant::now()))
            .await
            .expect("send edge");
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let event = event_rx.recv().await.expect("hold event");
        assert_eq!(event, ButtonEvent::hold_start(ButtonId::K3));
    }
}
