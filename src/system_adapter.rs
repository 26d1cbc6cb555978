//! Operating system integration: services, network profiles, clock, power and
//! telemetry. Every external command runs with an explicit timeout.

use crate::{
    config::SystemConfig,
    types::{NetworkMode, PowerAction, ServiceId, StaticNetwork, dotted},
};
use anyhow::{Context, Result, bail, ensure};
use chrono::NaiveDateTime;
use ini::Ini;
use log::{debug, info, warn};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{
    net::Ipv4Addr,
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::{process::Command, time::timeout};
use trait_variant::make;

/// Live system values shown on the panel. Missing values could not be read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Telemetry {
    pub ip: Option<String>,
    pub profile: Option<String>,
    pub active_service: Option<ServiceId>,
    pub cpu_load: Option<String>,
    pub memory: Option<String>,
    pub disk: Option<String>,
    pub temperature: Option<String>,
    pub subnet_mask: Option<String>,
    pub gateway: Option<String>,
    pub dns: Option<String>,
}

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait SystemAdapter {
    /// Start `service` and stop the other one
    async fn activate_service(&self, service: ServiceId) -> Result<()>;
    /// Bring up the profile of `mode` if it is not active yet
    async fn switch_network(&self, mode: NetworkMode) -> Result<()>;
    /// Write addressing into the static profile
    async fn apply_static_network(&self, network: StaticNetwork) -> Result<()>;
    async fn power(&self, action: PowerAction) -> Result<()>;
    async fn set_datetime(&self, datetime: NaiveDateTime) -> Result<()>;
    /// Switch the desktop panel clock between 24 and 12 hour notation
    async fn set_clock_format(&self, format_24h: bool) -> Result<()>;
    /// Run the update routine of an application service
    async fn update_application(&self, service: ServiceId) -> Result<()>;
    async fn telemetry(&self) -> Result<Telemetry>;
}

pub struct ShellSystemAdapter {
    system: SystemConfig,
    clock_config_file: Option<PathBuf>,
}

impl ShellSystemAdapter {
    pub fn new(system: SystemConfig, clock_config_file: Option<PathBuf>) -> Self {
        Self {
            system,
            clock_config_file,
        }
    }

    /// Run a command and return its stdout, failing on a non-zero exit
    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        debug!("run {program} {args:?}");

        let output = timeout(
            self.system.command_timeout,
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .context(format!("{program} timed out"))?
        .context(format!("failed to spawn {program}"))?;

        ensure!(
            output.status.success(),
            "{program} {args:?} failed with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a command for its exit status only
    async fn succeeds(&self, program: &str, args: &[&str]) -> bool {
        let status = timeout(
            self.system.command_timeout,
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await;

        matches!(status, Ok(Ok(status)) if status.success())
    }

    /// Run a command, logging failures instead of propagating them
    async fn read(&self, program: &str, args: &[&str]) -> Option<String> {
        match self.run(program, args).await {
            Ok(out) => Some(out),
            Err(e) => {
                debug!("telemetry source unavailable: {e:#}");
                None
            }
        }
    }

    fn profile(&self, mode: NetworkMode) -> &str {
        match mode {
            NetworkMode::Dhcp => &self.system.dhcp_profile,
            NetworkMode::Static => &self.system.static_profile,
        }
    }

    async fn active_profile(&self) -> Result<Option<String>> {
        let out = self
            .run("nmcli", &["-t", "-f", "NAME,DEVICE", "connection", "show", "--active"])
            .await?;
        Ok(active_profile_on(&out, &self.system.interface))
    }
}

impl SystemAdapter for ShellSystemAdapter {
    async fn activate_service(&self, service: ServiceId) -> Result<()> {
        let selected = self.system.service(service);
        let other = self.system.service(service.other());
        info!("activate {} ({})", selected.label, selected.unit);

        if let Err(e) = self.run("systemctl", &["disable", "--now", &other.unit]).await {
            warn!("failed to stop {}: {e:#}", other.unit);
        }
        self.run("systemctl", &["enable", "--now", &selected.unit])
            .await
            .context(format!("failed to start {}", selected.unit))?;

        Ok(())
    }

    async fn switch_network(&self, mode: NetworkMode) -> Result<()> {
        let profile = self.profile(mode).to_string();
        let active = self.active_profile().await?;

        if active.as_deref() == Some(profile.as_str()) {
            info!("network profile {profile} already active");
            return Ok(());
        }

        if let Some(active) = active {
            if let Err(e) = self.run("nmcli", &["connection", "down", &active]).await {
                warn!("failed to bring down {active}: {e:#}");
            }
        }
        self.run("nmcli", &["connection", "up", &profile])
            .await
            .context(format!("failed to bring up {profile}"))?;
        self.run("nmcli", &["device", "reapply", &self.system.interface])
            .await
            .context("failed to reapply device configuration")?;

        info!("switched to network profile {profile}");
        Ok(())
    }

    async fn apply_static_network(&self, network: StaticNetwork) -> Result<()> {
        let profile = self.system.static_profile.as_str();
        let carries_link = match self.active_profile().await {
            Ok(active) => active.as_deref() == Some(profile),
            Err(e) => {
                warn!("failed to read active network profile: {e:#}");
                false
            }
        };
        info!(
            "apply static network {}/{} via {} to {profile}",
            dotted(&network.ip),
            network.prefix_len(),
            dotted(&network.gateway)
        );

        for args in static_network_commands(profile, &network, carries_link) {
            let args = args.iter().map(String::as_str).collect::<Vec<_>>();
            self.run("nmcli", &args)
                .await
                .context(format!("failed to apply static network to {profile}"))?;
        }

        Ok(())
    }

    async fn power(&self, action: PowerAction) -> Result<()> {
        info!("{action} requested");
        let verb = match action {
            PowerAction::Reboot => "reboot",
            PowerAction::Shutdown => "poweroff",
        };
        self.run("systemctl", &[verb]).await.map(|_| ())
    }

    async fn set_datetime(&self, datetime: NaiveDateTime) -> Result<()> {
        let value = datetime.format("%Y-%m-%d %H:%M:%S").to_string();
        info!("set system clock to {value}");

        self.run("date", &["-s", &value])
            .await
            .context("failed to set system clock")?;
        Ok(())
    }

    async fn set_clock_format(&self, format_24h: bool) -> Result<()> {
        match &self.clock_config_file {
            Some(path) => write_clock_format(path, format_24h),
            None => {
                debug!("no panel clock configuration, skip clock format");
                Ok(())
            }
        }
    }

    async fn update_application(&self, service: ServiceId) -> Result<()> {
        let Some(command) = &self.system.app_update_command else {
            bail!("no application update command configured");
        };
        let unit = self.system.service(service);
        let script = format!("{command} {}", unit.label.to_lowercase());
        info!("update application {}: {script}", unit.label);

        self.run("sh", &["-c", &script])
            .await
            .context(format!("failed to update {}", unit.label))?;
        Ok(())
    }

    async fn telemetry(&self) -> Result<Telemetry> {
        let iface = self.system.interface.as_str();

        let active_service = if self.succeeds("systemctl", &["is-active", "--quiet", &self.system.service_a.unit]).await {
            Some(ServiceId::A)
        } else if self.succeeds("systemctl", &["is-active", "--quiet", &self.system.service_b.unit]).await {
            Some(ServiceId::B)
        } else {
            None
        };

        let ip = self
            .read("hostname", &["-I"])
            .await
            .and_then(|out| out.split_whitespace().next().map(str::to_string));
        let profile = self
            .read("nmcli", &["-t", "-f", "NAME,DEVICE", "connection", "show", "--active"])
            .await
            .and_then(|out| active_profile_on(&out, iface));
        let subnet_mask = self
            .read("ip", &["-o", "-f", "inet", "addr", "show", iface])
            .await
            .and_then(|out| subnet_mask_from_addr(&out));
        let gateway = self
            .read("ip", &["route", "show", "default"])
            .await
            .and_then(|out| out.split_whitespace().nth(2).map(str::to_string));
        let dns = self
            .read("nmcli", &["dev", "show", iface])
            .await
            .and_then(|out| dns_from_device_show(&out));
        let memory = self.read("free", &["-m"]).await.and_then(|out| memory_from_free(&out));
        let disk = self.read("df", &["-h", "/"]).await.and_then(|out| disk_from_df(&out));
        let temperature = self
            .read("vcgencmd", &["measure_temp"])
            .await
            .and_then(|out| out.trim().split('=').nth(1).map(str::to_string));
        let cpu_load = tokio::fs::read_to_string("/proc/loadavg")
            .await
            .ok()
            .and_then(|out| out.split_whitespace().next().map(str::to_string));

        Ok(Telemetry {
            ip,
            profile,
            active_service,
            cpu_load,
            memory,
            disk,
            temperature,
            subnet_mask,
            gateway,
            dns,
        })
    }
}

/// Rewrite every `clock_format` key of the panel configuration
pub fn write_clock_format(path: &Path, format_24h: bool) -> Result<()> {
    let value = if format_24h { "%H:%M:%S" } else { "%I:%M:%S %p" };
    let mut ini = Ini::load_from_file(path).context(format!("failed to load panel configuration: {path:?}"))?;

    let mut found = false;
    for (_, properties) in ini.iter_mut() {
        if properties.contains_key("clock_format") {
            properties.insert("clock_format", value);
            found = true;
        }
    }
    if !found {
        ini.with_section(Some("panel")).set("clock_format", value);
    }

    info!("write clock_format={value} to {path:?}");
    ini.write_to_file(path)
        .context(format!("failed to write panel configuration: {path:?}"))
}

/// nmcli arguments that write `network` into `profile` and, if the profile
/// carries the link right now, bring it up again so the addresses take effect
fn static_network_commands(profile: &str, network: &StaticNetwork, carries_link: bool) -> Vec<Vec<String>> {
    let address = format!("{}/{}", dotted(&network.ip), network.prefix_len());
    let gateway = dotted(&network.gateway);

    let mut commands = vec![
        [
            "connection",
            "modify",
            profile,
            "ipv4.addresses",
            address.as_str(),
            "ipv4.gateway",
            gateway.as_str(),
            "ipv4.method",
            "manual",
            "ipv4.dns",
            gateway.as_str(),
        ]
        .map(str::to_string)
        .to_vec(),
    ];
    if carries_link {
        commands.push(["connection", "up", profile].map(str::to_string).to_vec());
    }
    commands
}

fn active_profile_on(nmcli_active: &str, iface: &str) -> Option<String> {
    nmcli_active.lines().find_map(|line| {
        let (name, device) = line.rsplit_once(':')?;
        (device == iface).then(|| name.to_string())
    })
}

fn subnet_mask_from_addr(ip_addr: &str) -> Option<String> {
    let cidr = ip_addr
        .split_whitespace()
        .find(|word| word.contains('/'))?
        .split_once('/')?
        .1
        .parse::<u32>()
        .ok()?;
    if cidr > 32 {
        return None;
    }
    let mask = u32::MAX.checked_shl(32 - cidr).unwrap_or(0);
    Some(Ipv4Addr::from(mask).to_string())
}

fn dns_from_device_show(device_show: &str) -> Option<String> {
    device_show
        .lines()
        .find(|line| line.starts_with("IP4.DNS"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, value)| value.trim().to_string())
}

fn memory_from_free(free: &str) -> Option<String> {
    let line = free.lines().find(|line| line.starts_with("Mem:"))?;
    let mut fields = line.split_whitespace().skip(1);
    let total: u64 = fields.next()?.parse().ok()?;
    let used: u64 = fields.next()?.parse().ok()?;
    Some(format!("{used}/{total}MB"))
}

fn disk_from_df(df: &str) -> Option<String> {
    let fields: Vec<&str> = df.lines().nth(1)?.split_whitespace().collect();
    match fields.as_slice() {
        [_, size, used, _, percent, ..] => Some(format!("{used}/{size} {percent}")),
        _ => None,
    }
}
