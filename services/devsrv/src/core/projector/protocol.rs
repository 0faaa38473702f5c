//! Projector wire protocols
//!
//! All three variants share one shape: a TCP port, three `\r`-terminated
//! command strings, a status parser and a separate acknowledgement check.
//! Status replies and command acks look different on the wire, so the two
//! parsers are never interchangeable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use errors::GatewayError;

/// Protocol family selected per projector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectorProtocolType {
    /// LG-style RS232 command set tunnelled over TCP
    #[serde(alias = "lg")]
    Rs232,
    #[serde(alias = "pj-link")]
    PjLink,
    /// Sony PJ Talk
    #[serde(alias = "sony")]
    PjTalk,
}

impl ProjectorProtocolType {
    pub fn descriptor(self) -> &'static ProjectorProtocol {
        match self {
            Self::Rs232 => &LG_RS232,
            Self::PjLink => &PJLINK,
            Self::PjTalk => &PJTALK,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rs232 => "rs232",
            Self::PjLink => "pjlink",
            Self::PjTalk => "pjtalk",
        }
    }
}

impl fmt::Display for ProjectorProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectorProtocolType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rs232" | "lg" => Ok(Self::Rs232),
            "pjlink" | "pj-link" => Ok(Self::PjLink),
            "pjtalk" | "sony" => Ok(Self::PjTalk),
            other => Err(GatewayError::Configuration(format!(
                "Unsupported projector protocol: {other}"
            ))),
        }
    }
}

/// Power state reported by a projector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectorStatus {
    Unknown,
    On,
    Off,
    WarmingUp,
    CoolingDown,
    Failure,
    /// A status query answered with a command acknowledgement
    AckOnly,
}

impl ProjectorStatus {
    /// States that describe the lamp rather than an error
    pub fn is_power_state(self) -> bool {
        matches!(self, Self::On | Self::Off | Self::WarmingUp | Self::CoolingDown)
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::On => "Projector is ON",
            Self::Off => "Projector is OFF",
            Self::WarmingUp => "Projector is warming up",
            Self::CoolingDown => "Projector is cooling down",
            Self::Failure => "Projector reported an error",
            Self::AckOnly => "Projector acknowledged instead of reporting status",
            Self::Unknown => "Projector status unknown",
        }
    }
}

/// Capability set of one protocol variant
pub struct ProjectorProtocol {
    pub name: &'static str,
    pub port: u16,
    pub on_command: &'static str,
    pub off_command: &'static str,
    pub status_command: &'static str,
    /// The projector greets with a banner before accepting commands
    pub expects_banner: bool,
    parse_status: fn(&str) -> ProjectorStatus,
    is_ack: fn(&str, ProjectorStatus) -> bool,
}

impl fmt::Debug for ProjectorProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectorProtocol")
            .field("name", &self.name)
            .field("port", &self.port)
            .field("expects_banner", &self.expects_banner)
            .finish_non_exhaustive()
    }
}

impl ProjectorProtocol {
    pub fn parse_status(&self, response: &str) -> ProjectorStatus {
        (self.parse_status)(response.trim())
    }

    /// Whether `response` confirms a power command that should yield `expected`
    pub fn is_ack(&self, response: &str, expected: ProjectorStatus) -> bool {
        (self.is_ack)(response.trim(), expected)
    }
}

pub static LG_RS232: ProjectorProtocol = ProjectorProtocol {
    name: "rs232",
    port: 9761,
    on_command: "ka 01 01\r",
    off_command: "ka 01 00\r",
    status_command: "ka 01 FF\r",
    expects_banner: false,
    parse_status: lg_status,
    is_ack: lg_ack,
};

pub static PJLINK: ProjectorProtocol = ProjectorProtocol {
    name: "pjlink",
    port: 4352,
    on_command: "%1POWR 1\r",
    off_command: "%1POWR 0\r",
    status_command: "%1POWR ?\r",
    expects_banner: true,
    parse_status: pjlink_status,
    is_ack: pjlink_ack,
};

pub static PJTALK: ProjectorProtocol = ProjectorProtocol {
    name: "pjtalk",
    port: 53484,
    on_command: "POWR 1\r",
    off_command: "POWR 0\r",
    status_command: "POWR ?\r",
    expects_banner: false,
    parse_status: pjtalk_status,
    is_ack: pjtalk_ack,
};

fn lg_status(response: &str) -> ProjectorStatus {
    if response.contains("OK01") {
        ProjectorStatus::On
    } else if response.contains("OK00") {
        ProjectorStatus::Off
    } else if response.contains("NG") {
        ProjectorStatus::Failure
    } else {
        ProjectorStatus::Unknown
    }
}

fn lg_ack(response: &str, expected: ProjectorStatus) -> bool {
    match expected {
        ProjectorStatus::On => response.contains("OK01"),
        ProjectorStatus::Off => response.contains("OK00"),
        _ => false,
    }
}

fn pjlink_status(response: &str) -> ProjectorStatus {
    match response {
        "%1POWR=0" => ProjectorStatus::Off,
        "%1POWR=1" => ProjectorStatus::On,
        "%1POWR=2" => ProjectorStatus::WarmingUp,
        "%1POWR=3" => ProjectorStatus::CoolingDown,
        _ => ProjectorStatus::Unknown,
    }
}

fn pjlink_ack(response: &str, _expected: ProjectorStatus) -> bool {
    response == "%1POWR=OK"
}

fn pjtalk_status(response: &str) -> ProjectorStatus {
    match response {
        "POWR=0" => ProjectorStatus::Off,
        "POWR=1" => ProjectorStatus::On,
        "POWR=ERR" => ProjectorStatus::Failure,
        _ => ProjectorStatus::Unknown,
    }
}

fn pjtalk_ack(response: &str, _expected: ProjectorStatus) -> bool {
    response == "POWR=OK"
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_pjlink_status_table() {
        let p = ProjectorProtocolType::PjLink.descriptor();
        assert_eq!(p.parse_status("%1POWR=0"), ProjectorStatus::Off);
        assert_eq!(p.parse_status("%1POWR=1"), ProjectorStatus::On);
        assert_eq!(p.parse_status("%1POWR=2"), ProjectorStatus::WarmingUp);
        assert_eq!(p.parse_status("%1POWR=3\r"), ProjectorStatus::CoolingDown);
        assert_eq!(p.parse_status("%1POWR=4"), ProjectorStatus::Unknown);
        assert_eq!(p.parse_status("%1POWR=OK"), ProjectorStatus::Unknown);
        assert_eq!(p.parse_status(""), ProjectorStatus::Unknown);
    }

    #[test]
    fn test_ack_is_separate_from_status() {
        let p = ProjectorProtocolType::PjLink.descriptor();
        assert!(p.is_ack("%1POWR=OK", ProjectorStatus::On));
        assert!(!p.is_ack("%1POWR=1", ProjectorStatus::On));

        let p = ProjectorProtocolType::PjTalk.descriptor();
        assert!(p.is_ack("POWR=OK\r", ProjectorStatus::Off));
        assert!(!p.is_ack("POWR=0", ProjectorStatus::Off));
        assert_eq!(p.parse_status("POWR=ERR"), ProjectorStatus::Failure);
        assert_eq!(p.parse_status("POWR=OK"), ProjectorStatus::Unknown);
    }

    #[test]
    fn test_lg_ack_matches_direction() {
        let p = ProjectorProtocolType::Rs232.descriptor();
        assert!(p.is_ack("a 01 OK01x", ProjectorStatus::On));
        assert!(!p.is_ack("a 01 OK01x", ProjectorStatus::Off));
        assert_eq!(p.parse_status("a 01 OK00x"), ProjectorStatus::Off);
        assert_eq!(p.parse_status("a 01 NG01x"), ProjectorStatus::Failure);
        assert_eq!(p.parse_status("garbage"), ProjectorStatus::Unknown);
    }

    #[test]
    fn test_ports_and_commands() {
        assert_eq!(ProjectorProtocolType::Rs232.descriptor().port, 9761);
        assert_eq!(ProjectorProtocolType::PjLink.descriptor().port, 4352);
        assert_eq!(ProjectorProtocolType::PjTalk.descriptor().port, 53484);
        for t in [
            ProjectorProtocolType::Rs232,
            ProjectorProtocolType::PjLink,
            ProjectorProtocolType::PjTalk,
        ] {
            let p = t.descriptor();
            for cmd in [p.on_command, p.off_command, p.status_command] {
                assert!(cmd.ends_with('\r'));
            }
        }
    }

    #[test]
    fn test_protocol_type_parsing() {
        assert_eq!("PJLink".parse::<ProjectorProtocolType>().unwrap(), ProjectorProtocolType::PjLink);
        assert_eq!("sony".parse::<ProjectorProtocolType>().unwrap(), ProjectorProtocolType::PjTalk);
        assert_eq!("lg".parse::<ProjectorProtocolType>().unwrap(), ProjectorProtocolType::Rs232);
        assert!("hdmi".parse::<ProjectorProtocolType>().is_err());

        let t: ProjectorProtocolType = serde_json::from_str("\"pjtalk\"").unwrap();
        assert_eq!(t, ProjectorProtocolType::PjTalk);
        assert_eq!(t.to_string(), "pjtalk");
    }
}
