//! Persisted panel state
//!
//! A small JSON document that survives restarts. It is read-modify-write and
//! not transactional: whoever saves last wins. A missing or unreadable file
//! yields the defaults and nothing is written until the next explicit apply.

use crate::types::{NetworkMode, Octets, ServiceId, StaticNetwork, deserialize_octets};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

fn default_ip() -> Octets {
    StaticNetwork::default().ip
}

fn default_subnet_mask() -> Octets {
    StaticNetwork::default().subnet_mask
}

fn default_gateway() -> Octets {
    StaticNetwork::default().gateway
}

fn default_time_format() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PersistedState {
    #[serde(default)]
    pub service: ServiceId,
    #[serde(default)]
    pub network: NetworkMode,
    #[serde(default = "default_ip", deserialize_with = "deserialize_octets")]
    pub static_ip: Octets,
    #[serde(default = "default_subnet_mask", deserialize_with = "deserialize_octets")]
    pub subnet_mask: Octets,
    #[serde(default = "default_gateway", deserialize_with = "deserialize_octets")]
    pub gateway: Octets,
    #[serde(rename = "time_format_24hr", default = "default_time_format")]
    pub time_format_24h: bool,
}

impl Default for PersistedState {
    fn default() -> Self {
        let network = StaticNetwork::default();
        Self {
            service: ServiceId::default(),
            network: NetworkMode::default(),
            static_ip: network.ip,
            subnet_mask: network.subnet_mask,
            gateway: network.gateway,
            time_format_24h: default_time_format(),
        }
    }
}

impl PersistedState {
    pub fn static_network(&self) -> StaticNetwork {
        StaticNetwork {
            ip: self.static_ip,
            subnet_mask: self.subnet_mask,
            gateway: self.gateway,
        }
    }

    pub fn set_static_network(&mut self, network: StaticNetwork) {
        self.static_ip = network.ip;
        self.subnet_mask = network.subnet_mask;
        self.gateway = network.gateway;
    }
}

/// Load/save access to the persisted state file
#[derive(Clone, Debug)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state, substituting defaults for a missing or corrupt file
    pub fn load(&self) -> PersistedState {
        match self.try_load() {
            Ok(Some(state)) => state,
            Ok(None) => {
                info!("no state file at {:?}, using defaults", self.path);
                PersistedState::default()
            }
            Err(e) => {
                warn!("failed to load state, using defaults: {e:#}");
                PersistedState::default()
            }
        }
    }

    /// Load the state; `Ok(None)` means the file does not exist
    pub fn try_load(&self) -> Result<Option<PersistedState>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context(format!("failed to read state file: {:?}", self.path)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .context(format!("failed to parse state file: {:?}", self.path))
    }

    /// Write the state via a temporary sibling and a rename
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        debug!("save state to {:?}: {state:?}", self.path);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context(format!("failed to create state directory: {parent:?}"))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string(state).context("failed to serialize state")?;
        fs::write(&tmp, json).context(format!("failed to write state file: {tmp:?}"))?;
        fs::rename(&tmp, &self.path).context(format!("failed to rename {tmp:?} to {:?}", self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> StateStore {
        StateStore::new(dir.path().join("state.json"))
    }

    #[test]
    fn missing_file_yields_defaults_without_writing() {
        let dir = TempDir::new().expect("should create temp dir");
        let store = store_in(&dir);

        let state = store.load();

        assert_eq!(state, PersistedState::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = TempDir::new().expect("should create temp dir");
        let store = store_in(&dir);
        fs::write(store.path(), "{ not json").expect("should write");

        assert_eq!(store.load(), PersistedState::default());
        assert!(store.try_load().is_err());
    }

    #[test]
    fn short_octet_array_is_rejected() {
        let dir = TempDir::new().expect("should create temp dir");
        let store = store_in(&dir);
        fs::write(store.path(), r#"{"static_ip":[10,0,0]}"#).expect("should write");

        assert!(store.try_load().is_err());
        assert_eq!(store.load().static_ip, [192, 168, 0, 100]);
    }

    #[test]
    fn save_and_reload() {
        let dir = TempDir::new().expect("should create temp dir");
        let store = store_in(&dir);
        let state = PersistedState {
            service: ServiceId::B,
            network: NetworkMode::Dhcp,
            static_ip: [10, 1, 2, 3],
            subnet_mask: [255, 255, 0, 0],
            gateway: [10, 1, 0, 1],
            time_format_24h: false,
        };

        store.save(&state).expect("should save");

        assert_eq!(store.load(), state);
    }

    #[test]
    fn file_uses_external_schema() {
        let dir = TempDir::new().expect("should create temp dir");
        let store = store_in(&dir);

        store.save(&PersistedState::default()).expect("should save");
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).expect("should read")).expect("json");

        assert_eq!(raw["service"], "A");
        assert_eq!(raw["network"], "STATIC");
        assert_eq!(raw["static_ip"], serde_json::json!([192, 168, 0, 100]));
        assert_eq!(raw["time_format_24hr"], true);
    }

    #[test]
    fn legacy_file_is_accepted() {
        let dir = TempDir::new().expect("should create temp dir");
        let store = store_in(&dir);
        fs::write(
            store.path(),
            r#"{"service":"satellite","network":"DHCP","static_ip":"10.0.0.5","subnet_mask":[255,0,0,0],"gateway":"10.0.0.1"}"#,
        )
        .expect("should write");

        let state = store.try_load().expect("should parse").expect("should exist");

        assert_eq!(state.service, ServiceId::B);
        assert_eq!(state.network, NetworkMode::Dhcp);
        assert_eq!(state.static_ip, [10, 0, 0, 5]);
        assert!(state.time_format_24h);
    }

    #[test]
    fn saving_one_change_keeps_unrelated_fields() {
        let dir = TempDir::new().expect("should create temp dir");
        let store = store_in(&dir);

        let mut state = store.load();
        state.network = NetworkMode::Dhcp;
        store.save(&state).expect("should save");

        assert_eq!(state.network, NetworkMode::Dhcp);
        assert_eq!(state.static_network(), StaticNetwork::default());
        assert_eq!(store.load(), state);
    }
}
