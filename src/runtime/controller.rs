//! The single consumer loop.
//!
//! Every event, whether it comes from a button, a remote command, a timer or a
//! finished background task, is applied here one at a time. This is the only
//! place that owns [`NavigatorState`]; the rest of the process sees cloned
//! snapshots published through a `watch` channel.

use crate::{
    input::ButtonEvent,
    menu::{ActionKind, Event, Moment, Navigator, NavigatorState, SideEffect},
    services::{
        commands::Command,
        installer::Installer,
        release::{ReleaseSource, ReleaseVersion},
        state_store::StateStore,
    },
    system_adapter::SystemAdapter,
};
use anyhow::Result;
use log::{debug, error, info};
use std::{future::Future, sync::Arc};
use tokio::{
    sync::{Notify, mpsc, watch},
    time::{Instant, sleep_until},
};

/// Why the controller loop ended
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    /// Start over with a fresh process so new files and the new clock apply
    Restart,
    Shutdown,
}

pub struct Controller<A, S> {
    navigator: Navigator,
    state: NavigatorState,
    adapter: Arc<A>,
    installer: Arc<Installer<S>>,
    store: StateStore,
    snapshots: watch::Sender<NavigatorState>,
    render: Arc<Notify>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl<A, S> Controller<A, S>
where
    A: SystemAdapter + Send + Sync + 'static,
    S: ReleaseSource + Send + Sync + 'static,
{
    pub fn new(
        navigator: Navigator,
        state: NavigatorState,
        adapter: Arc<A>,
        installer: Installer<S>,
        store: StateStore,
    ) -> Self {
        let (snapshots, _) = watch::channel(state.clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            navigator,
            state,
            adapter,
            installer: Arc::new(installer),
            store,
            snapshots,
            render: Arc::new(Notify::new()),
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> &NavigatorState {
        &self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<NavigatorState> {
        self.snapshots.subscribe()
    }

    /// Signalled after every applied event, asks for an immediate render
    pub fn render_requests(&self) -> Arc<Notify> {
        self.render.clone()
    }

    /// Sender for events produced outside the controller (timeout supervisor)
    pub fn events(&self) -> mpsc::UnboundedSender<Event> {
        self.events_tx.clone()
    }

    /// Apply one event and start whatever it requires
    pub fn apply(&mut self, event: Event) -> Option<RunOutcome> {
        let shown = self.state.overlay.as_ref().map(|o| o.id);
        let effect = self.navigator.handle(&mut self.state, event, Moment::now());

        if let Some(overlay) = &self.state.overlay {
            if shown != Some(overlay.id) {
                self.expire_overlay_at(overlay.id, overlay.deadline);
            }
        }

        let outcome = effect.and_then(|effect| self.execute(effect));
        self.publish();
        outcome
    }

    pub async fn run(
        mut self,
        mut buttons: mpsc::Receiver<ButtonEvent>,
        mut commands: mpsc::Receiver<Command>,
    ) -> RunOutcome {
        info!("controller started on {:?}", self.state.screen);
        self.publish();

        loop {
            let event = tokio::select! {
                Some(event) = self.events_rx.recv() => event,
                Some(button) = buttons.recv() => Event::Button(button),
                Some(command) = commands.recv() => Event::Remote(command),
                else => return RunOutcome::Shutdown,
            };

            if let Some(outcome) = self.apply(event) {
                info!("controller stopping: {outcome:?}");
                return outcome;
            }
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.state.clone());
        self.render.notify_one();
    }

    fn persist(&self) {
        match self.store.save(&self.state.committed) {
            Ok(()) => debug!("state saved"),
            Err(e) => error!("failed to save state: {e:#}"),
        }
    }

    fn execute(&self, effect: SideEffect) -> Option<RunOutcome> {
        debug!("execute {effect:?}");
        if effect.persists() {
            self.persist();
        }

        let adapter = self.adapter.clone();
        match effect {
            SideEffect::SelectService(service) => {
                self.spawn_action(ActionKind::Service, async move { adapter.activate_service(service).await })
            }
            SideEffect::SelectNetwork(mode) => {
                self.spawn_action(ActionKind::Network, async move { adapter.switch_network(mode).await })
            }
            SideEffect::ApplyStaticNetwork(network) => self.spawn_action(ActionKind::StaticNetwork, async move {
                adapter.apply_static_network(network).await
            }),
            SideEffect::SetDateTime { datetime, format_24h } => {
                self.spawn_action(ActionKind::DateTime, async move {
                    adapter.set_datetime(datetime).await?;
                    // the panel clock format is best effort
                    if let Err(e) = adapter.set_clock_format(format_24h).await {
                        error!("failed to set panel clock format: {e:#}");
                    }
                    Ok(())
                })
            }
            SideEffect::Power(action) => {
                self.spawn_action(ActionKind::Power, async move { adapter.power(action).await })
            }
            SideEffect::UpdateApplication(service) => self.spawn_action(ActionKind::AppUpdate, async move {
                adapter.update_application(service).await
            }),
            SideEffect::CheckForUpdates => self.check_for_updates(),
            SideEffect::InstallRelease(version) => self.install(version),
            SideEffect::Restart => return Some(RunOutcome::Restart),
        }
        None
    }

    fn spawn_action<F>(&self, action: ActionKind, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let ok = match task.await {
                Ok(()) => {
                    info!("{action} done");
                    true
                }
                Err(e) => {
                    error!("{action} failed: {e:#}");
                    false
                }
            };
            if events.send(Event::ActionFinished { action, ok }).is_err() {
                debug!("controller gone, {action} result dropped");
            }
        });
    }

    fn check_for_updates(&self) {
        let installer = self.installer.clone();
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let outcome = installer.check().await;
            if events.send(Event::UpdateChecked(outcome)).is_err() {
                debug!("controller gone, update check result dropped");
            }
        });
    }

    fn install(&self, version: ReleaseVersion) {
        let installer = self.installer.clone();
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let staged = events.clone();
            let result = installer
                .install(&version, move || {
                    if staged.send(Event::UpdateStaged).is_err() {
                        debug!("controller gone, staging notice dropped");
                    }
                })
                .await;
            if events.send(Event::UpdateFinished(result)).is_err() {
                debug!("controller gone, install result dropped");
            }
        });
    }

    fn expire_overlay_at(&self, id: u64, deadline: Instant) {
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            sleep_until(deadline).await;
            if events.send(Event::OverlayExpired(id)).is_err() {
                debug!("controller gone, expiry of overlay {id} dropped");
            }
        });
    }
}
