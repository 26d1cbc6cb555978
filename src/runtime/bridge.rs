use crate::services::{
    command_source::CommandSource,
    commands::{Command, CommandMessage},
};
use log::{error, info, warn};
use std::time::Duration;
use tokio::{sync::mpsc, time};

/// Moves commands from a transport into the controller's bounded queue.
///
/// Accepted commands are never dropped: a full queue makes the poller wait.
pub struct CommandBridge<C> {
    source: C,
    poll_interval: Duration,
}

impl<C: CommandSource> CommandBridge<C> {
    pub fn new(source: C, poll_interval: Duration) -> Self {
        Self { source, poll_interval }
    }

    /// Validate a message; rejected messages are logged and dropped here
    pub fn translate(msg: &CommandMessage) -> Option<Command> {
        match Command::try_from(msg) {
            Ok(command) => Some(command),
            Err(e) => {
                warn!("reject command {:?}: {e:#}", msg.command);
                None
            }
        }
    }

    /// Drain the transport once, returns the number of enqueued commands or
    /// `None` once the queue is closed
    pub async fn poll_once(&mut self, queue: &mpsc::Sender<Command>) -> Option<usize> {
        let messages = match self.source.poll() {
            Ok(messages) => messages,
            Err(e) => {
                error!("failed to poll commands: {e:#}");
                return Some(0);
            }
        };

        let mut count = 0;
        for command in messages.iter().filter_map(Self::translate) {
            info!("enqueue {command:?}");
            if queue.send(command).await.is_err() {
                return None;
            }
            count += 1;
        }
        Some(count)
    }

    pub async fn run(mut self, queue: mpsc::Sender<Command>) {
        info!("command bridge polling every {:?}", self.poll_interval);
        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if self.poll_once(&queue).await.is_none() {
                info!("controller stopped, command bridge stopping");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{input::ButtonId, types::ServiceId};
    use anyhow::{Result, anyhow};
    use serde_json::json;
    use std::collections::VecDeque;

    struct ScriptedSource(VecDeque<Result<Vec<CommandMessage>>>);

    impl CommandSource for ScriptedSource {
        fn poll(&mut self) -> Result<Vec<CommandMessage>> {
            self.0.pop_front().unwrap_or_else(|| Ok(vec![]))
        }
    }

    fn msg(command: &str, params: serde_json::Value) -> CommandMessage {
        CommandMessage {
            command: command.to_string(),
            params,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn keeps_order_and_skips_invalid() {
        let source = ScriptedSource(VecDeque::from([Ok(vec![
            msg("toggle_service", json!({"service": "B"})),
            msg("self_destruct", json!({})),
            msg("button_press", json!({"button": "K1"})),
        ])]));
        let mut bridge = CommandBridge::new(source, Duration::from_millis(250));
        let (tx, mut rx) = mpsc::channel(4);

        assert_eq!(bridge.poll_once(&tx).await, Some(2));

        assert_eq!(rx.recv().await, Some(Command::ToggleService(ServiceId::B)));
        assert!(matches!(
            rx.recv().await,
            Some(Command::ButtonPress(event)) if event.button == ButtonId::K1
        ));
    }

    #[tokio::test]
    async fn transport_error_is_not_fatal() {
        let source = ScriptedSource(VecDeque::from([
            Err(anyhow!("permission denied")),
            Ok(vec![msg("power", json!({"action": "reboot"}))]),
        ]));
        let mut bridge = CommandBridge::new(source, Duration::from_millis(250));
        let (tx, _rx) = mpsc::channel(4);

        assert_eq!(bridge.poll_once(&tx).await, Some(0));
        assert_eq!(bridge.poll_once(&tx).await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_applies_backpressure() {
        let source = ScriptedSource(VecDeque::from([Ok(vec![
            msg("toggle_network", json!({"mode": "DHCP"})),
            msg("toggle_network", json!({"mode": "STATIC"})),
        ])]));
        let bridge = CommandBridge::new(source, Duration::from_millis(250));
        let (tx, mut rx) = mpsc::channel(1);

        tokio::spawn(bridge.run(tx));
        time::sleep(Duration::from_secs(1)).await;

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn stops_when_queue_closes() {
        let source = ScriptedSource(VecDeque::from([Ok(vec![msg("toggle_service", json!({"service": "A"}))])]));
        let mut bridge = CommandBridge::new(source, Duration::from_millis(250));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        assert_eq!(bridge.poll_once(&tx).await, None);
    }
}
