//! Frame derivation: what the four display lines show for a state snapshot.

use crate::{
    config::SystemConfig,
    menu::{
        InfoPage, MenuScreen, NavigatorState, UpdatePhase,
        editor,
        screen::{EditorKind, Label, Target},
    },
    services::release::ReleaseVersion,
    system_adapter::Telemetry,
    types::{NetworkMode, ServiceId},
};
use anyhow::Result;
use chrono::NaiveDateTime;
use log::info;
use std::fmt;

pub const LINES: usize = 4;

/// Indicator drawn next to an option, naming the button that selects it
const INDICATORS: [&str; LINES] = ["^", "v", "<", ">"];

const LABEL_WIDTH: usize = 15;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Frame {
    pub lines: [String; LINES],
}

impl Frame {
    fn new(lines: [String; LINES]) -> Self {
        Self { lines }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lines.join(" | "))
    }
}

/// Output device for frames
pub trait Display: Send {
    fn show(&mut self, frame: &Frame) -> Result<()>;
}

/// Writes each changed frame to the log
#[derive(Default)]
pub struct LogDisplay {
    last: Option<Frame>,
}

impl Display for LogDisplay {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        if self.last.as_ref() != Some(frame) {
            info!("[{frame}]");
            self.last = Some(frame.clone());
        }
        Ok(())
    }
}

/// Values a frame needs that are not part of the navigator state
#[derive(Clone, Debug)]
pub struct PanelInfo {
    labels: [String; 2],
    ports: [Option<u16>; 2],
    pub version: ReleaseVersion,
}

impl PanelInfo {
    pub fn new(system: &SystemConfig, version: ReleaseVersion) -> Self {
        Self {
            labels: [system.service_a.label.clone(), system.service_b.label.clone()],
            ports: [system.service_a.port, system.service_b.port],
            version,
        }
    }

    fn slot(service: ServiceId) -> usize {
        match service {
            ServiceId::A => 0,
            ServiceId::B => 1,
        }
    }

    pub fn label(&self, service: ServiceId) -> &str {
        &self.labels[Self::slot(service)]
    }

    pub fn port(&self, service: ServiceId) -> Option<u16> {
        self.ports[Self::slot(service)]
    }
}

/// Everything [`frame`] reads
pub struct FrameInput<'a> {
    pub state: &'a NavigatorState,
    pub info: &'a PanelInfo,
    pub telemetry: Option<&'a Telemetry>,
    pub local: NaiveDateTime,
    /// Blink phase; the edit cursor is bracketed while it is on
    pub blink: bool,
}

pub fn frame(input: &FrameInput) -> Frame {
    let state = input.state;

    match state.screen {
        MenuScreen::Default => home(input),
        MenuScreen::InfoOverlay(page) => info_page(input, page),
        MenuScreen::MessageOverlay => {
            let message = state.overlay.as_ref().map(|o| o.message.clone()).unwrap_or_default();
            Frame::new([String::new(), message, String::new(), String::new()])
        }
        MenuScreen::UpdateProgress => progress(input),
        screen => match screen.editor() {
            Some(kind) => editor_frame(input, kind),
            None => list(input),
        },
    }
}

fn clock(local: &NaiveDateTime, format_24h: bool) -> String {
    let pattern = if format_24h { "%H:%M:%S" } else { "%I:%M:%S %p" };
    local.format(pattern).to_string()
}

fn or_dash(value: Option<&String>) -> &str {
    value.map_or("-", String::as_str)
}

fn home(input: &FrameInput) -> Frame {
    let committed = &input.state.committed;

    // before the first telemetry read the committed service stands in
    let (title, service) = match input.telemetry {
        Some(telemetry) => match telemetry.active_service {
            Some(service) => (input.info.label(service).to_string(), Some(service)),
            None => ("SYSTEM OFF".to_string(), None),
        },
        None => (input.info.label(committed.service).to_string(), Some(committed.service)),
    };
    let profile = input
        .telemetry
        .and_then(|t| t.profile.clone())
        .unwrap_or_else(|| committed.network.to_string());
    let ip = input.telemetry.and_then(|t| t.ip.clone()).unwrap_or_else(|| "NO IP".to_string());
    let port = service
        .and_then(|s| input.info.port(s))
        .map(|p| format!(":{p}"))
        .unwrap_or_default();
    let temperature = input.telemetry.and_then(|t| t.temperature.clone()).unwrap_or_default();

    Frame::new([
        format!("{title:<12}{profile}"),
        format!("{ip}{port}"),
        format!("{:<14}{temperature}", clock(&input.local, committed.time_format_24h)),
        input.info.version.to_string(),
    ])
}

fn info_page(input: &FrameInput, page: InfoPage) -> Frame {
    let t = input.telemetry;

    match page {
        InfoPage::Health => Frame::new([
            format!("TEMP: {}", or_dash(t.and_then(|t| t.temperature.as_ref()))),
            format!("CPU: {}", or_dash(t.and_then(|t| t.cpu_load.as_ref()))),
            format!("MEM: {}", or_dash(t.and_then(|t| t.memory.as_ref()))),
            format!("DISK: {}", or_dash(t.and_then(|t| t.disk.as_ref()))),
        ]),
        InfoPage::Network => Frame::new([
            format!("IP: {}", or_dash(t.and_then(|t| t.ip.as_ref()))),
            format!("SUB: {}", or_dash(t.and_then(|t| t.subnet_mask.as_ref()))),
            format!("GW: {}", or_dash(t.and_then(|t| t.gateway.as_ref()))),
            format!("DNS: {}", or_dash(t.and_then(|t| t.dns.as_ref()))),
        ]),
    }
}

fn is_marked(input: &FrameInput, label: Label) -> bool {
    let committed = &input.state.committed;

    match label {
        Label::Service(service) => {
            let active = input.telemetry.and_then(|t| t.active_service).unwrap_or(committed.service);
            active == service
        }
        Label::Network(mode) => committed.network == mode,
        _ => false,
    }
}

fn label_text(input: &FrameInput, label: Label) -> String {
    match label {
        Label::Text(text) => text.to_string(),
        Label::Service(service) => input.info.label(service).to_string(),
        Label::Network(NetworkMode::Dhcp) => "DHCP".to_string(),
        Label::Network(NetworkMode::Static) => "STATIC IP".to_string(),
        Label::Version(i) => input
            .state
            .update
            .as_ref()
            .and_then(|s| s.available.get(i))
            .map(ToString::to_string)
            .unwrap_or_default(),
        Label::CurrentVersion => format!("CURRENT: {}", input.info.version),
        Label::CurrentDateTime => {
            let pattern = if input.state.committed.time_format_24h {
                "%m/%d/%y %H:%M"
            } else {
                "%m/%d/%y %I:%M %p"
            };
            input.local.format(pattern).to_string()
        }
    }
}

fn list(input: &FrameInput) -> Frame {
    let entries = input.state.screen.entries();
    let mut lines: [String; LINES] = Default::default();

    for (slot, entry) in entries.iter().enumerate() {
        let Some(entry) = entry else {
            continue;
        };
        let text = label_text(input, entry.label);
        if text.is_empty() {
            continue;
        }

        let marker = if is_marked(input, entry.label) { "*" } else { "" };
        let indicator = match entry.target {
            Target::Display => "",
            _ => INDICATORS[slot],
        };
        let label = format!("{marker}{text}");
        lines[slot] = format!("{label:<LABEL_WIDTH$}{indicator}").trim_end().to_string();
    }

    Frame::new(lines)
}

/// Bracket the field under the cursor while the blink phase is on
fn fields(values: &[String], cursor: usize, blink: bool, separator: &str) -> String {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            if i == cursor && blink {
                format!("[{value}]")
            } else if i == cursor {
                format!(" {value} ")
            } else {
                value.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(separator)
}

fn editor_frame(input: &FrameInput, kind: EditorKind) -> Frame {
    let state = input.state;
    let cursor = state.edit_cursor;
    let draft = &state.draft_datetime;

    let value = match kind {
        EditorKind::Octets(field) => {
            let octets = editor::octets(&state.draft_network, field);
            let values: Vec<String> = octets.iter().map(ToString::to_string).collect();
            fields(&values, cursor, input.blink, ".")
        }
        EditorKind::Date => {
            let values = [draft.format("%m"), draft.format("%d"), draft.format("%Y")].map(|v| v.to_string());
            fields(&values, cursor, input.blink, "/")
        }
        EditorKind::Time => {
            let format = if state.draft_time_format_24h { "24HR" } else { "12HR" };
            let hour = if state.draft_time_format_24h {
                draft.format("%H")
            } else {
                draft.format("%I")
            };
            let mut values = vec![format.to_string(), hour.to_string(), draft.format("%M").to_string()];
            if !state.draft_time_format_24h {
                values.push(draft.format("%p").to_string());
            }
            fields(&values, cursor, input.blink, " ")
        }
    };

    Frame::new([
        state.screen.title().to_string(),
        value,
        "CANCEL: HOLD <".to_string(),
        "APPLY:  HOLD >".to_string(),
    ])
}

fn progress(input: &FrameInput) -> Frame {
    let session = input.state.update.as_ref();
    let version = session
        .and_then(|s| s.selected.as_ref())
        .map(ToString::to_string)
        .unwrap_or_default();
    let phase = match session.map(|s| s.phase) {
        Some(UpdatePhase::Downloading) => "DOWNLOADING",
        Some(UpdatePhase::Applying) => "INSTALLING",
        Some(UpdatePhase::Restarting) => "RESTARTING",
        _ => "",
    };
    let wait = if input.blink { "PLEASE WAIT" } else { "" };

    Frame::new([
        MenuScreen::UpdateProgress.title().to_string(),
        version,
        phase.to_string(),
        wait.to_string(),
    ])
}
