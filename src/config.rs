use anyhow::{Context, Result, ensure};
use std::{env, path::PathBuf, str::FromStr, sync::OnceLock, time::Duration};

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Input, idle and render timings
    pub panel: PanelConfig,

    /// Command bridge configuration
    pub commands: CommandConfig,

    /// Operating system integration
    pub system: SystemConfig,

    /// Self-update configuration
    pub update: UpdateConfig,

    /// Path configuration
    pub paths: PathConfig,
}

#[derive(Clone, Debug)]
pub struct PanelConfig {
    pub debounce: Duration,
    pub hold: Duration,
    pub hold_repeat: Option<Duration>,
    pub idle_timeout: Duration,
    pub supervisor_tick: Duration,
    pub render_tick: Duration,
    pub render_min_interval: Duration,
    pub message_duration: Duration,
    pub update_message_duration: Duration,
    pub telemetry_timeout: Duration,
    pub telemetry_max_age: Duration,
    pub console_input: bool,
}

#[derive(Clone, Debug)]
pub struct CommandConfig {
    pub poll_interval: Duration,
    pub queue_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct ServiceUnit {
    pub label: String,
    pub unit: String,
    pub port: Option<u16>,
}

#[derive(Clone, Debug)]
pub struct SystemConfig {
    pub service_a: ServiceUnit,
    pub service_b: ServiceUnit,
    pub dhcp_profile: String,
    pub static_profile: String,
    pub interface: String,
    pub command_timeout: Duration,
    pub app_update_command: Option<String>,
}

#[derive(Clone, Debug)]
pub struct UpdateConfig {
    /// `owner/name` of the release repository
    pub repository: String,
    pub api_base: String,
    /// Archive download URL, `{repository}` and `{tag}` are substituted
    pub archive_url_template: String,
    /// Entry that must exist in a release archive for it to be installable
    pub required_entry: String,
    pub http_timeout: Duration,
    /// File names in the install directory that an update never overwrites
    pub preserved: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub state_file: PathBuf,
    pub command_payload: PathBuf,
    pub command_marker: PathBuf,
    pub command_spool_dir: Option<PathBuf>,
    pub install_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub clock_config_file: Option<PathBuf>,
}

impl AppConfig {
    /// Get or load the application configuration
    ///
    /// Returns a reference to the cached configuration. On first call, it loads
    /// all configuration from environment variables. Subsequent calls return the
    /// cached instance.
    ///
    /// # Panics
    /// Panics if configuration loading fails. The panel cannot run without a
    /// valid configuration; `main` calls [`AppConfig::load`] first to report
    /// the problem as a diagnostic instead.
    pub fn get() -> &'static Self {
        APP_CONFIG.get_or_init(|| Self::load_internal().expect("failed to load application configuration"))
    }

    /// Load the configuration once, returning the error instead of panicking
    pub fn load() -> Result<&'static Self> {
        if let Some(config) = APP_CONFIG.get() {
            return Ok(config);
        }
        let config = Self::load_internal()?;
        Ok(APP_CONFIG.get_or_init(|| config))
    }

    fn load_internal() -> Result<Self> {
        let panel = PanelConfig::load()?;
        let commands = CommandConfig::load()?;
        let system = SystemConfig::load()?;
        let mut update = UpdateConfig::load()?;
        let paths = PathConfig::load()?;

        if let Some(relative) = paths.state_file_in_install_dir() {
            let relative = relative.to_string_lossy().to_string();
            if !update.preserved.contains(&relative) {
                update.preserved.push(relative);
            }
        }

        Ok(Self {
            panel,
            commands,
            system,
            update,
            paths,
        })
    }
}

static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .context(format!("failed to parse {name}: invalid format")),
        Err(_) => Ok(default),
    }
}

fn millis(name: &str, default: u64) -> Result<Duration> {
    parse_var(name, default).map(Duration::from_millis)
}

fn secs(name: &str, default: u64) -> Result<Duration> {
    parse_var(name, default).map(Duration::from_secs)
}

/// Timer periods drive `tokio::time::interval`, which rejects zero
fn period(name: &str, value: Duration) -> Result<Duration> {
    ensure!(!value.is_zero(), "{name} must be positive");
    Ok(value)
}

fn period_millis(name: &str, default: u64) -> Result<Duration> {
    period(name, millis(name, default)?)
}

fn period_secs(name: &str, default: u64) -> Result<Duration> {
    period(name, secs(name, default)?)
}

impl PanelConfig {
    fn load() -> Result<Self> {
        let repeat_ms: u64 = parse_var("PANEL_HOLD_REPEAT_MS", 600)?;

        Ok(Self {
            debounce: millis("PANEL_DEBOUNCE_MS", 50)?,
            hold: millis("PANEL_HOLD_MS", 1000)?,
            hold_repeat: (repeat_ms > 0).then(|| Duration::from_millis(repeat_ms)),
            idle_timeout: secs("PANEL_IDLE_TIMEOUT_SECS", 20)?,
            supervisor_tick: period_millis("PANEL_SUPERVISOR_TICK_MS", 1000)?,
            render_tick: period_millis("PANEL_RENDER_TICK_MS", 500)?,
            render_min_interval: millis("PANEL_RENDER_MIN_INTERVAL_MS", 50)?,
            message_duration: secs("PANEL_MESSAGE_SECS", 3)?,
            update_message_duration: secs("PANEL_UPDATE_MESSAGE_SECS", 10)?,
            telemetry_timeout: millis("PANEL_TELEMETRY_TIMEOUT_MS", 1500)?,
            telemetry_max_age: period_secs("PANEL_TELEMETRY_MAX_AGE_SECS", 2)?,
            console_input: parse_var("PANEL_CONSOLE_INPUT", false)?,
        })
    }
}

impl CommandConfig {
    fn load() -> Result<Self> {
        let queue_capacity: usize = parse_var("PANEL_COMMAND_QUEUE", 16)?;
        ensure!(queue_capacity > 0, "PANEL_COMMAND_QUEUE must be positive");

        Ok(Self {
            poll_interval: period_millis("PANEL_COMMAND_POLL_MS", 250)?,
            queue_capacity,
        })
    }
}

impl SystemConfig {
    fn load() -> Result<Self> {
        let service_a = ServiceUnit {
            label: var_or("PANEL_SERVICE_A_LABEL", "COMPANION"),
            unit: var_or("PANEL_SERVICE_A_UNIT", "companion.service"),
            port: Some(parse_var("PANEL_SERVICE_A_PORT", 8000u16)?),
        };
        let service_b = ServiceUnit {
            label: var_or("PANEL_SERVICE_B_LABEL", "SATELLITE"),
            unit: var_or("PANEL_SERVICE_B_UNIT", "satellite.service"),
            port: Some(parse_var("PANEL_SERVICE_B_PORT", 9999u16)?),
        };

        Ok(Self {
            service_a,
            service_b,
            dhcp_profile: var_or("PANEL_DHCP_PROFILE", "DHCP"),
            static_profile: var_or("PANEL_STATIC_PROFILE", "STATIC"),
            interface: var_or("PANEL_INTERFACE", "eth0"),
            command_timeout: secs("PANEL_COMMAND_TIMEOUT_SECS", 15)?,
            app_update_command: env::var("PANEL_APP_UPDATE_COMMAND").ok(),
        })
    }

    pub fn service(&self, id: crate::types::ServiceId) -> &ServiceUnit {
        match id {
            crate::types::ServiceId::A => &self.service_a,
            crate::types::ServiceId::B => &self.service_b,
        }
    }
}

impl UpdateConfig {
    fn load() -> Result<Self> {
        let preserved = var_or("PANEL_UPDATE_PRESERVE", "state.json")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            repository: var_or("PANEL_RELEASE_REPO", "panel-menu/panel-menu"),
            api_base: var_or("PANEL_RELEASE_API", "https://api.github.com"),
            archive_url_template: var_or(
                "PANEL_RELEASE_ARCHIVE_URL",
                "https://github.com/{repository}/archive/refs/tags/{tag}.zip",
            ),
            required_entry: var_or("PANEL_RELEASE_REQUIRED_ENTRY", env!("CARGO_PKG_NAME")),
            http_timeout: secs("PANEL_HTTP_TIMEOUT_SECS", 30)?,
            preserved,
        })
    }
}

impl PathConfig {
    fn load() -> Result<Self> {
        let data_dir = Self::data_dir();

        let state_file = env::var("PANEL_STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("state.json"));
        let command_payload = env::var("PANEL_COMMAND_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("web_command.json"));
        let command_marker = env::var("PANEL_COMMAND_MARKER")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("trigger_command"));
        let command_spool_dir = env::var("PANEL_COMMAND_SPOOL").ok().map(PathBuf::from);
        let install_dir = env::var("PANEL_INSTALL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.clone());
        let staging_dir = env::var("PANEL_STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join(concat!(env!("CARGO_PKG_NAME"), "-staging")));
        let clock_config_file = env::var("PANEL_CLOCK_CONFIG").ok().map(PathBuf::from);

        Ok(Self {
            state_file,
            command_payload,
            command_marker,
            command_spool_dir,
            install_dir,
            staging_dir,
            clock_config_file,
        })
    }

    /// Location of the state file relative to the install directory, `None`
    /// if it lives elsewhere
    pub fn state_file_in_install_dir(&self) -> Option<PathBuf> {
        self.state_file
            .strip_prefix(&self.install_dir)
            .ok()
            .filter(|relative| !relative.as_os_str().is_empty())
            .map(PathBuf::from)
    }

    #[cfg(not(any(test, feature = "mock")))]
    fn data_dir() -> PathBuf {
        env::var("PANEL_DATA_DIR")
            .map(PathBuf::from)
            .or_else(|_| env::current_dir())
            .unwrap_or_else(|_| PathBuf::from("."))
    }

    // In test mode, use temp directory as default to avoid touching the working directory
    #[cfg(any(test, feature = "mock"))]
    fn data_dir() -> PathBuf {
        env::temp_dir().join(concat!(env!("CARGO_PKG_NAME"), "-test"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_environment() {
        let config = AppConfig::load().expect("defaults should load");

        assert!(config.panel.debounce <= config.panel.hold);
        assert!(config.commands.queue_capacity > 0);
        assert!(config.update.preserved.iter().any(|p| p == "state.json"));
        assert!(config.update.archive_url_template.contains("{tag}"));
    }

    mod paths {
        use super::*;

        fn paths(install_dir: &str, state_file: &str) -> PathConfig {
            PathConfig {
                state_file: PathBuf::from(state_file),
                command_payload: PathBuf::from("/run/panel/web_command.json"),
                command_marker: PathBuf::from("/run/panel/trigger_command"),
                command_spool_dir: None,
                install_dir: PathBuf::from(install_dir),
                staging_dir: PathBuf::from("/tmp/panel-staging"),
                clock_config_file: None,
            }
        }

        #[test]
        fn nested_state_file_is_relative_to_install_dir() {
            let paths = paths("/opt/panel", "/opt/panel/data/state.json");
            assert_eq!(paths.state_file_in_install_dir(), Some(PathBuf::from("data/state.json")));
        }

        #[test]
        fn state_file_outside_install_dir_is_not_preserved() {
            let paths = paths("/opt/panel", "/var/lib/panel/state.json");
            assert_eq!(paths.state_file_in_install_dir(), None);
        }

        #[test]
        fn sibling_directory_with_common_prefix_is_outside() {
            let paths = paths("/opt/panel", "/opt/panel-data/state.json");
            assert_eq!(paths.state_file_in_install_dir(), None);
        }
    }

    mod periods {
        use super::*;

        #[test]
        fn zero_period_is_rejected() {
            let err = period("PANEL_RENDER_TICK_MS", Duration::ZERO).expect_err("zero should fail");
            assert!(err.to_string().contains("PANEL_RENDER_TICK_MS"));
        }

        #[test]
        fn positive_period_passes() {
            assert_eq!(
                period("PANEL_COMMAND_POLL_MS", Duration::from_millis(1)).expect("valid period"),
                Duration::from_millis(1)
            );
        }

        #[test]
        fn default_periods_are_positive() {
            let config = AppConfig::load().expect("defaults should load");

            assert!(!config.panel.supervisor_tick.is_zero());
            assert!(!config.panel.render_tick.is_zero());
            assert!(!config.panel.telemetry_max_age.is_zero());
            assert!(!config.commands.poll_interval.is_zero());
        }
    }
}
