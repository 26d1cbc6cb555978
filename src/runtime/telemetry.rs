use crate::{
    menu::{MenuScreen, NavigatorState},
    system_adapter::{SystemAdapter, Telemetry},
};
use log::{debug, info, warn};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, time};

/// Last known good telemetry.
///
/// A failed or slow read keeps the previous values; readers never wait for
/// the system.
pub struct TelemetryCache {
    tx: watch::Sender<Option<Telemetry>>,
}

impl Default for TelemetryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryCache {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Telemetry>> {
        self.tx.subscribe()
    }

    /// Read telemetry once; returns whether the cached values were replaced
    pub async fn refresh<A: SystemAdapter>(&self, adapter: &A, limit: Duration) -> bool {
        match time::timeout(limit, adapter.telemetry()).await {
            Ok(Ok(telemetry)) => {
                self.tx.send_replace(Some(telemetry));
                true
            }
            Ok(Err(e)) => {
                warn!("failed to read telemetry, keeping last values: {e:#}");
                false
            }
            Err(_) => {
                warn!("telemetry read exceeded {limit:?}, keeping last values");
                false
            }
        }
    }

    /// Refresh every `max_age` while a screen that shows telemetry is up.
    pub async fn run<A>(
        self,
        adapter: Arc<A>,
        snapshots: watch::Receiver<NavigatorState>,
        max_age: Duration,
        limit: Duration,
    ) where
        A: SystemAdapter + Send + Sync + 'static,
    {
        info!("telemetry refresh every {max_age:?}");
        let mut interval = time::interval(max_age);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let screen = snapshots.borrow().screen;
            if matches!(screen, MenuScreen::Default | MenuScreen::InfoOverlay(_)) {
                self.refresh(adapter.as_ref(), limit).await;
            } else {
                debug!("skip telemetry on {screen:?}");
            }
        }
    }
}
