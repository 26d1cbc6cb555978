//! Remote command vocabulary
//!
//! A companion process injects `{command, params, timestamp}` messages. Each
//! is validated and translated into a [`Command`] before it is queued; a
//! message that fails translation never reaches the navigator.

use crate::{
    input::{ButtonEvent, ButtonId, PressKind},
    menu::MenuScreen,
    types::{NetworkMode, Octets, PowerAction, ServiceId, StaticNetwork, deserialize_octets},
};
use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_valid::Validate;

/// A message as written by the command producer.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CommandMessage {
    pub command: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    ToggleService(ServiceId),
    ToggleNetwork(NetworkMode),
    SetStaticIp(StaticNetwork),
    Power(PowerAction),
    ButtonPress(ButtonEvent),
    SetDateTime {
        datetime: NaiveDateTime,
        format_24h: bool,
    },
    UpdateAppStable(ServiceId),
    MenuNavigate(MenuScreen),
}

#[derive(Deserialize)]
struct ServiceParams {
    service: ServiceId,
}

#[derive(Deserialize)]
struct NetworkParams {
    #[serde(alias = "network")]
    mode: NetworkMode,
}

#[derive(Deserialize)]
struct StaticIpParams {
    #[serde(deserialize_with = "deserialize_octets")]
    ip: Octets,
    #[serde(alias = "subnet_mask", deserialize_with = "deserialize_octets")]
    subnet: Octets,
    #[serde(deserialize_with = "deserialize_octets")]
    gateway: Octets,
}

#[derive(Deserialize)]
struct PowerParams {
    action: PowerAction,
}

#[derive(Deserialize)]
struct ButtonParams {
    button: ButtonId,
    #[serde(default)]
    kind: PressKind,
}

fn default_format_24h() -> bool {
    true
}

#[derive(Deserialize, Validate)]
struct DateTimeParams {
    #[validate(min_length = 8)]
    #[validate(max_length = 10)]
    date: String,
    #[validate(min_length = 4)]
    #[validate(max_length = 11)]
    time: String,
    #[serde(default = "default_format_24h", alias = "time_format_24hr")]
    format_24hr: bool,
}

#[derive(Deserialize)]
struct AppParams {
    #[serde(alias = "service")]
    app: ServiceId,
}

#[derive(Deserialize, Validate)]
struct MenuParams {
    #[validate(min_length = 1)]
    #[validate(max_length = 32)]
    menu: String,
}

fn params<T: DeserializeOwned>(msg: &CommandMessage) -> Result<T> {
    serde_json::from_value(msg.params.clone()).context(format!("invalid params for {}", msg.command))
}

fn parse_date(date: &str) -> Result<NaiveDate> {
    ["%Y-%m-%d", "%m/%d/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date.trim(), fmt).ok())
        .context(format!("invalid date: {date}"))
}

fn parse_time(time: &str) -> Result<NaiveTime> {
    ["%H:%M:%S", "%H:%M", "%I:%M %p", "%I:%M:%S %p"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(time.trim(), fmt).ok())
        .context(format!("invalid time: {time}"))
}

impl TryFrom<&CommandMessage> for Command {
    type Error = anyhow::Error;

    fn try_from(msg: &CommandMessage) -> Result<Self> {
        let command = match msg.command.as_str() {
            "toggle_service" => Command::ToggleService(params::<ServiceParams>(msg)?.service),
            "toggle_network" => Command::ToggleNetwork(params::<NetworkParams>(msg)?.mode),
            "set_static_ip" => {
                let p: StaticIpParams = params(msg)?;
                Command::SetStaticIp(StaticNetwork {
                    ip: p.ip,
                    subnet_mask: p.subnet,
                    gateway: p.gateway,
                })
            }
            "power" => Command::Power(params::<PowerParams>(msg)?.action),
            "button_press" => {
                let p: ButtonParams = params(msg)?;
                Command::ButtonPress(ButtonEvent {
                    button: p.button,
                    kind: p.kind,
                })
            }
            "set_datetime" => {
                let p: DateTimeParams = params(msg)?;
                p.validate().context("set_datetime validation failed")?;
                Command::SetDateTime {
                    datetime: parse_date(&p.date)?.and_time(parse_time(&p.time)?),
                    format_24h: p.format_24hr,
                }
            }
            "update_app_stable" => Command::UpdateAppStable(params::<AppParams>(msg)?.app),
            "menu_navigate" => {
                let p: MenuParams = params(msg)?;
                p.validate().context("menu_navigate validation failed")?;
                let screen = MenuScreen::from_name(&p.menu).context(format!("unknown menu: {}", p.menu))?;
                if !screen.is_remote_navigable() {
                    bail!("menu {} cannot be opened remotely", p.menu);
                }
                Command::MenuNavigate(screen)
            }
            other => bail!("unknown command: {other}"),
        };

        Ok(command)
    }
}
