//! Relay command table
//!
//! Raw on/off strings for every relay channel plus the board-wide `status`
//! and `all_channels` actions, loaded once from a JSON object:
//!
//! ```json
//! {
//!   "channel_1":    { "on": ":FE050000FF00FE\r\n", "off": ":FE0500000000FD\r\n" },
//!   "status":       { "on": ":FE0100000010F1\r\n", "off": "" },
//!   "all_channels": { "on": ":FE0F00000010020000E1\r\n", "off": ":FE0F0000001002FFFFE3\r\n" }
//! }
//! ```
//!
//! The literal two-character escapes `\r` and `\n` are expanded to CR/LF at
//! load time. The table is immutable afterwards.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use errors::{GatewayError, GatewayResult};

const STATUS_KEY: &str = "status";
const ALL_CHANNELS_KEY: &str = "all_channels";
const LEGACY_ALL_CHANNELS_KEY: &str = "all-channels";

/// One on/off command pair
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Command {
    #[serde(default)]
    pub on: String,
    #[serde(default)]
    pub off: String,
}

impl Command {
    pub fn new(on: impl Into<String>, off: impl Into<String>) -> Self {
        Self {
            on: on.into(),
            off: off.into(),
        }
    }

    /// Bytes for the requested direction; `on` releases the lock
    pub fn payload(&self, on: bool) -> &[u8] {
        if on {
            self.on.as_bytes()
        } else {
            self.off.as_bytes()
        }
    }

    fn expanded(self) -> Self {
        Self {
            on: expand_escapes(&self.on),
            off: expand_escapes(&self.off),
        }
    }
}

/// Expand literal `\r` and `\n` sequences into CR and LF
pub fn expand_escapes(raw: &str) -> String {
    raw.replace("\\r", "\r").replace("\\n", "\n")
}

/// Immutable lookup from command key to on/off pair
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    entries: HashMap<String, Command>,
}

impl CommandTable {
    /// Build from already-keyed entries, normalising legacy keys
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Command)>,
        K: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(key, command)| (normalize_key(key.into()), command.expanded()))
            .collect();
        Self { entries }
    }

    /// Parse the JSON form
    pub fn from_json_str(json: &str) -> GatewayResult<Self> {
        let raw: HashMap<String, Command> = serde_json::from_str(json)
            .map_err(|e| GatewayError::Configuration(format!("Invalid command table: {e}")))?;
        Ok(Self::from_entries(raw))
    }

    /// Load the JSON file at `path`
    pub fn load(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Configuration(format!(
                "Cannot read command table {}: {e}",
                path.display()
            ))
        })?;
        let table = Self::from_json_str(&json)?;
        info!(
            "Loaded {} relay commands from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    /// Command for relay channel `channel` (1-based within a board)
    pub fn channel(&self, channel: u16) -> GatewayResult<&Command> {
        self.get(&format!("channel_{channel}"))
    }

    /// Board status query; its `on` string is the query
    pub fn status(&self) -> GatewayResult<&Command> {
        self.get(STATUS_KEY)
    }

    /// Board-wide all-channels command
    pub fn all_channels(&self) -> GatewayResult<&Command> {
        self.get(ALL_CHANNELS_KEY)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&self, key: &str) -> GatewayResult<&Command> {
        let command = self
            .entries
            .get(key)
            .ok_or_else(|| GatewayError::MissingCommand(key.to_string()))?;
        debug!("Resolved command {key}");
        Ok(command)
    }
}

fn normalize_key(key: String) -> String {
    if key == LEGACY_ALL_CHANNELS_KEY {
        return ALL_CHANNELS_KEY.to_string();
    }
    match key.strip_prefix("channel-") {
        Some(n) => format!("channel_{n}"),
        None => key,
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use errors::ErrorKind;
    use std::io::Write;

    const TABLE: &str = r#"{
        "channel_1": { "on": "on1\\r\\n", "off": "off1\\r\\n" },
        "channel-2": { "on": "on2\r", "off": "off2\r" },
        "status": { "on": "stat\\r\\n" },
        "all-channels": { "on": "allon\\r\\n", "off": "alloff\\r\\n" }
    }"#;

    #[test]
    fn test_escapes_expanded_at_load() {
        let table = CommandTable::from_json_str(TABLE).unwrap();
        let cmd = table.channel(1).unwrap();
        assert_eq!(cmd.payload(true), b"on1\r\n");
        assert_eq!(cmd.payload(false), b"off1\r\n");
        assert_eq!(table.status().unwrap().on, "stat\r\n");
        assert_eq!(table.status().unwrap().off, "");
    }

    #[test]
    fn test_legacy_keys_are_accepted() {
        let table = CommandTable::from_json_str(TABLE).unwrap();
        assert_eq!(table.channel(2).unwrap().on, "on2\r");
        assert_eq!(table.all_channels().unwrap().off, "alloff\r\n");
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_missing_entry_is_configuration_error() {
        let table = CommandTable::from_json_str(TABLE).unwrap();
        let err = table.channel(16).unwrap_err();
        assert!(matches!(err, GatewayError::MissingCommand(ref k) if k == "channel_16"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TABLE.as_bytes()).unwrap();

        let table = CommandTable::load(file.path()).unwrap();
        assert!(!table.is_empty());

        let err = CommandTable::load("/nonexistent/commands.json").unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = CommandTable::from_json_str("[1, 2]").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("Invalid command table"));
    }
}
