//! Button vocabulary and the edge-to-event pipeline.
//!
//! Raw edges are produced by the GPIO driver (or the console source) through an
//! [`EdgeSender`], which never blocks. The [`dispatcher::InputDispatcher`] task
//! debounces them and turns each actuation into exactly one `Press` or a
//! `HoldStart` followed by optional `HoldRepeat`s.

pub mod console;
pub mod debounce;
pub mod dispatcher;

use anyhow::bail;
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::Instant,
};

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum ButtonId {
    K1,
    K2,
    K3,
    K4,
}

impl ButtonId {
    pub const ALL: [ButtonId; 4] = [ButtonId::K1, ButtonId::K2, ButtonId::K3, ButtonId::K4];

    /// Zero-based position, which is also the option slot the button selects.
    pub fn index(self) -> usize {
        match self {
            ButtonId::K1 => 0,
            ButtonId::K2 => 1,
            ButtonId::K3 => 2,
            ButtonId::K4 => 3,
        }
    }
}

impl FromStr for ButtonId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "K1" => Ok(ButtonId::K1),
            "K2" => Ok(ButtonId::K2),
            "K3" => Ok(ButtonId::K3),
            "K4" => Ok(ButtonId::K4),
            other => bail!("unknown button: {other}"),
        }
    }
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "K{}", self.index() + 1)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PressKind {
    #[default]
    Press,
    #[serde(alias = "holdStart", alias = "hold")]
    HoldStart,
    #[serde(alias = "holdRepeat")]
    HoldRepeat,
}

/// A normalized button event as consumed by the navigator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ButtonEvent {
    pub button: ButtonId,
    pub kind: PressKind,
}

impl ButtonEvent {
    pub fn press(button: ButtonId) -> Self {
        Self {
            button,
            kind: PressKind::Press,
        }
    }

    pub fn hold_start(button: ButtonId) -> Self {
        Self {
            button,
            kind: PressKind::HoldStart,
        }
    }

    pub fn hold_repeat(button: ButtonId) -> Self {
        Self {
            button,
            kind: PressKind::HoldRepeat,
        }
    }
}

/// One electrical edge of a button.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Edge {
    pub button: ButtonId,
    pub pressed: bool,
    pub at: Instant,
}

/// Handle given to edge producers. Signalling never blocks and never awaits.
#[derive(Clone, Debug)]
pub struct EdgeSender {
    tx: mpsc::Sender<Edge>,
}

impl EdgeSender {
    pub fn new(tx: mpsc::Sender<Edge>) -> Self {
        Self { tx }
    }

    pub fn signal(&self, button: ButtonId, pressed: bool) {
        let edge = Edge {
            button,
            pressed,
            at: Instant::now(),
        };

        match self.tx.try_send(edge) {
            Ok(()) => {}
            Err(TrySendError::Full(edge)) => warn!("edge queue full, dropped {edge:?}"),
            Err(TrySendError::Closed(_)) => warn!("input dispatcher stopped, edge dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_names_round_trip() {
        for button in ButtonId::ALL {
            assert_eq!(button.to_string().parse::<ButtonId>().expect("parse"), button);
        }
        assert_eq!("k3".parse::<ButtonId>().expect("lowercase"), ButtonId::K3);
        assert!("K5".parse::<ButtonId>().is_err());
    }

    #[test]
    fn press_kind_accepts_camel_case() {
        let kind: PressKind = serde_json::from_str(r#""holdStart""#).expect("alias");
        assert_eq!(kind, PressKind::HoldStart);
        let kind: PressKind = serde_json::from_str(r#""hold_repeat""#).expect("snake");
        assert_eq!(kind, PressKind::HoldRepeat);
    }

    #[tokio::test]
    async fn full_edge_queue_drops_without_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let sender = EdgeSender::new(tx);

        sender.signal(ButtonId::K1, true);
        sender.signal(ButtonId::K1, false);

        let edge = rx.recv().await.expect("first edge");
        assert!(edge.pressed);
        assert!(rx.try_recv().is_err());
    }
}
