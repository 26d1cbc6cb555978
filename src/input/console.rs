//! Bench input: button actuations typed on stdin.
//!
//! Each line names a button, optionally followed by `hold` and a duration in
//! milliseconds, e.g. `K1`, `k4 hold`, `K2 hold 2500`. The lines are turned
//! into edges so they go through the same debounce and hold logic as GPIO.

use super::{ButtonId, EdgeSender};
use anyhow::{Context, Result, bail};
use log::{info, warn};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConsoleActuation {
    pub button: ButtonId,
    /// How long the button stays down, `None` for a tap
    pub hold: Option<Duration>,
}

pub fn parse_line(line: &str, default_hold: Duration) -> Result<ConsoleActuation> {
    let mut words = line.split_whitespace();
    let button = words
        .next()
        .context("empty line")?
        .parse::<ButtonId>()?;

    let hold = match words.next() {
        None => None,
        Some(word) if word.eq_ignore_ascii_case("hold") => match words.next() {
            Some(ms) => Some(Duration::from_millis(
                ms.parse().context(format!("invalid hold duration: {ms}"))?,
            )),
            None => Some(default_hold),
        },
        Some(other) => bail!("unexpected word: {other}"),
    };

    Ok(ConsoleActuation { button, hold })
}

/// Read actuations from stdin until it closes.
pub async fn run(edges: EdgeSender, hold: Duration) {
    info!("console input enabled, type K1..K4 [hold [ms]]");

    // overshoot the hold threshold so the timer fires before release
    let default_hold = hold + Duration::from_millis(200);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                warn!("failed to read console input: {e:#}");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(&line, default_hold) {
            Ok(actuation) => {
                edges.signal(actuation.button, true);
                if let Some(hold) = actuation.hold {
                    tokio::time::sleep(hold).await;
                }
                edges.signal(actuation.button, false);
            }
            Err(e) => warn!("ignored console input {line:?}: {e:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOLD: Duration = Duration::from_millis(1200);

    #[test]
    fn tap() {
        assert_eq!(
            parse_line("k2", HOLD).expect("tap"),
            ConsoleActuation {
                button: ButtonId::K2,
                hold: None
            }
        );
    }

    #[test]
    fn hold_with_and_without_duration() {
        assert_eq!(parse_line("K4 hold", HOLD).expect("hold").hold, Some(HOLD));
        assert_eq!(
            parse_line("K1 HOLD 3000", HOLD).expect("hold ms").hold,
            Some(Duration::from_millis(3000))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_line("K9", HOLD).is_err());
        assert!(parse_line("K1 twice", HOLD).is_err());
        assert!(parse_line("K1 hold soon", HOLD).is_err());
    }
}
