use serde::{Deserialize, Deserializer, Serialize, de};
use std::{fmt, net::Ipv4Addr, str::FromStr};

/// One dotted network address as four octets.
pub type Octets = [u8; 4];

/// The two mutually exclusive application services the panel can run.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum ServiceId {
    #[default]
    #[serde(alias = "companion", alias = "a")]
    A,
    #[serde(alias = "satellite", alias = "b")]
    B,
}

impl ServiceId {
    pub fn other(self) -> Self {
        match self {
            ServiceId::A => ServiceId::B,
            ServiceId::B => ServiceId::A,
        }
    }
}

impl FromStr for ServiceId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" | "companion" => Ok(ServiceId::A),
            "b" | "satellite" => Ok(ServiceId::B),
            other => anyhow::bail!("unknown service: {other}"),
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceId::A => write!(f, "A"),
            ServiceId::B => write!(f, "B"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NetworkMode {
    Dhcp,
    #[default]
    Static,
}

impl FromStr for NetworkMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DHCP" => Ok(NetworkMode::Dhcp),
            "STATIC" => Ok(NetworkMode::Static),
            other => anyhow::bail!("unknown network mode: {other}"),
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Dhcp => write!(f, "DHCP"),
            NetworkMode::Static => write!(f, "STATIC"),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Reboot,
    Shutdown,
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerAction::Reboot => write!(f, "reboot"),
            PowerAction::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Static addressing for the wired interface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StaticNetwork {
    pub ip: Octets,
    pub subnet_mask: Octets,
    pub gateway: Octets,
}

impl Default for StaticNetwork {
    fn default() -> Self {
        Self {
            ip: [192, 168, 0, 100],
            subnet_mask: [255, 255, 255, 0],
            gateway: [192, 168, 0, 1],
        }
    }
}

impl StaticNetwork {
    /// Prefix length of the subnet mask, counting bits up to the last set one.
    pub fn prefix_len(&self) -> u8 {
        let mask = u32::from_be_bytes(self.subnet_mask);
        if mask == 0 {
            0
        } else {
            (32 - mask.trailing_zeros()) as u8
        }
    }
}

pub fn dotted(octets: &Octets) -> String {
    Ipv4Addr::from(*octets).to_string()
}

/// Accepts `[192, 168, 0, 1]` as well as the legacy `"192.168.0.1"` form.
pub fn deserialize_octets<'de, D>(deserializer: D) -> Result<Octets, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<u8>),
        Dotted(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::List(list) => <Octets>::try_from(list.as_slice())
            .map_err(|_| de::Error::invalid_length(list.len(), &"exactly 4 octets")),
        Raw::Dotted(s) => s
            .trim()
            .parse::<Ipv4Addr>()
            .map(|addr| addr.octets())
            .map_err(de::Error::custom),
    }
}
