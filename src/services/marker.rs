//! Marker files used as change signals between processes.
//!
//! A marker only carries its existence; the data it announces lives elsewhere.

use log::{error, info};
use std::{fs, io::ErrorKind, path::PathBuf};

/// A marker file at a configurable path.
#[derive(Clone, Debug)]
pub struct MarkerFile {
    path: PathBuf,
    label: &'static str,
}

impl MarkerFile {
    pub fn new(path: impl Into<PathBuf>, label: &'static str) -> Self {
        Self {
            path: path.into(),
            label,
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Set the marker file.
    #[cfg(test)]
    pub fn set(&self) -> std::io::Result<()> {
        info!("setting {} marker at: {:?}", self.label, self.path);
        fs::write(&self.path, "")
    }

    /// Clear the marker file. NotFound is silently ignored.
    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!("cleared {} marker", self.label),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => error!("failed to clear {} marker: {e}", self.label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn set_and_clear() {
        let dir = TempDir::new().expect("should create temp dir");
        let marker = MarkerFile::new(dir.path().join("trigger"), "test");

        assert!(!marker.exists());
        marker.set().expect("should set marker");
        assert!(marker.exists());
        marker.clear();
        assert!(!marker.exists());
    }

    #[test]
    fn clear_missing_marker_is_silent() {
        let dir = TempDir::new().expect("should create temp dir");
        let marker = MarkerFile::new(dir.path().join("absent"), "test");

        marker.clear();

        assert!(!marker.exists());
    }
}
