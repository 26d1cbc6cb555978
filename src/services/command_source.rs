//! Transports that deliver [`CommandMessage`]s from the companion process.

use crate::services::{commands::CommandMessage, marker::MarkerFile};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

/// Age after which an unparseable spool file is treated as garbage
const SPOOL_SETTLE: Duration = Duration::from_secs(2);

pub trait CommandSource: Send {
    /// Take all messages that arrived since the last poll, oldest first
    fn poll(&mut self) -> Result<Vec<CommandMessage>>;
}

/// Read a payload file and delete it, `Ok(None)` if it does not exist
fn take_payload(path: &Path) -> Result<Option<String>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context(format!("failed to read command payload: {path:?}")),
    };

    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e).context(format!("failed to remove command payload: {path:?}")),
    }

    Ok(Some(content))
}

fn parse_payload(content: &str, origin: &Path) -> Option<CommandMessage> {
    match serde_json::from_str::<CommandMessage>(content) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!("ignore invalid command payload in {origin:?}: {e:#}");
            None
        }
    }
}

/// Legacy two-file transport: a payload file announced by a marker file.
///
/// The producer overwrites the payload, so of several commands written
/// between two polls only the last survives.
pub struct MarkerCommandSource {
    payload: PathBuf,
    marker: MarkerFile,
}

impl MarkerCommandSource {
    pub fn new(payload: impl Into<PathBuf>, marker: impl Into<PathBuf>) -> Self {
        Self {
            payload: payload.into(),
            marker: MarkerFile::new(marker, "command trigger"),
        }
    }
}

impl CommandSource for MarkerCommandSource {
    fn poll(&mut self) -> Result<Vec<CommandMessage>> {
        if !self.marker.exists() {
            return Ok(Vec::new());
        }

        let payload = take_payload(&self.payload);
        self.marker.clear();

        match payload? {
            Some(content) => Ok(parse_payload(&content, &self.payload).into_iter().collect()),
            None => {
                debug!("command marker without payload");
                Ok(Vec::new())
            }
        }
    }
}

/// Spool directory transport: every `*.json` file is one message, consumed in
/// file-name order.
///
/// Producers should write under another name and rename the file into place.
/// A file that does not parse yet is left alone while it is younger than the
/// settle time, and the files after it wait so the order holds. Once older,
/// it is logged and removed.
pub struct SpoolCommandSource {
    dir: PathBuf,
    settle: Duration,
}

impl SpoolCommandSource {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).context(format!("failed to create command spool: {dir:?}"))?;
        info!("command spool at {dir:?}");
        Ok(Self {
            dir,
            settle: SPOOL_SETTLE,
        })
    }

    fn is_settled(&self, path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(|modified| SystemTime::now().duration_since(modified).unwrap_or_default())
            .is_some_and(|age| age >= self.settle)
    }
}

impl CommandSource for SpoolCommandSource {
    fn poll(&mut self) -> Result<Vec<CommandMessage>> {
        let mut files = fs::read_dir(&self.dir)
            .context(format!("failed to read command spool: {:?}", self.dir))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json") && path.is_file())
            .collect::<Vec<_>>();
        files.sort();

        let mut messages = Vec::with_capacity(files.len());
        for path in files {
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!("skip spooled command {path:?}: {e:#}");
                    continue;
                }
            };

            match serde_json::from_str::<CommandMessage>(&content) {
                Ok(msg) => messages.push(msg),
                Err(_) if !self.is_settled(&path) => {
                    debug!("wait for {path:?} to be written completely");
                    break;
                }
                Err(e) => warn!("ignore invalid command payload in {path:?}: {e:#}"),
            }

            if let Err(e) = fs::remove_file(&path) {
                warn!("failed to remove spooled command {path:?}: {e:#}");
            }
        }

        Ok(messages)
    }
}
