//! Shared types for the inventory gateway

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Placeholder for a location, device or facility that has not been observed
pub const UNKNOWN: &str = "UNKNOWN";

/// Facility assigned to readers that were never given one
pub const DEFAULT_FACILITY_ID: &str = "DEFAULT_FACILITY";

/// Behavior ids containing this marker put a reader in deep scan
const DEEP_SCAN_MARKER: &str = "DeepScan";

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Reader role flags. A reader may combine roles; POS is checked first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderRoles {
    /// Point-of-sale reader: departs tags, never originates them
    #[serde(default)]
    pub pos: bool,
    /// Exit-sensor reader: promotes tags it owns to EXITING
    #[serde(default)]
    pub exit: bool,
}

impl ReaderRoles {
    pub const ORDINARY: ReaderRoles = ReaderRoles { pos: false, exit: false };
    pub const POS: ReaderRoles = ReaderRoles { pos: true, exit: false };
    pub const EXIT: ReaderRoles = ReaderRoles { pos: false, exit: true };

    #[inline]
    pub fn is_ordinary(&self) -> bool {
        !self.pos && !self.exit
    }
}

impl std::fmt::Display for ReaderRoles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.pos, self.exit) {
            (false, false) => write!(f, "ordinary"),
            (true, false) => write!(f, "pos"),
            (false, true) => write!(f, "exit"),
            (true, true) => write!(f, "pos+exit"),
        }
    }
}

/// Everything the engine needs to know about the reader that produced a batch
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderContext {
    pub device_id: String,
    pub facility_id: String,
    pub roles: ReaderRoles,
    /// Reads strictly below this floor (dBm x 10) are dropped
    pub min_rssi_dbm10x: i32,
    /// Id of the behavior the reader is currently running, if known
    pub behavior_id: Option<String>,
    /// Optional per-antenna location alias overrides
    pub antenna_aliases: HashMap<u16, String>,
}

impl ReaderContext {
    pub fn new(device_id: &str, facility_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            facility_id: facility_id.to_string(),
            roles: ReaderRoles::ORDINARY,
            min_rssi_dbm10x: i32::MIN,
            behavior_id: None,
            antenna_aliases: HashMap::new(),
        }
    }

    pub fn with_roles(mut self, roles: ReaderRoles) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_min_rssi(mut self, min_rssi_dbm10x: i32) -> Self {
        self.min_rssi_dbm10x = min_rssi_dbm10x;
        self
    }

    pub fn with_behavior(mut self, behavior_id: &str) -> Self {
        self.behavior_id = Some(behavior_id.to_string());
        self
    }

    pub fn with_alias(mut self, antenna_id: u16, alias: &str) -> Self {
        self.antenna_aliases.insert(antenna_id, alias.to_string());
        self
    }

    #[inline]
    pub fn is_pos(&self) -> bool {
        self.roles.pos
    }

    #[inline]
    pub fn is_exit(&self) -> bool {
        self.roles.exit
    }

    /// Long-dwell diagnostic behaviors are recognised by naming convention only
    pub fn is_deep_scan(&self) -> bool {
        self.behavior_id.as_deref().is_some_and(|id| id.contains(DEEP_SCAN_MARKER))
    }

    /// Location id for one of this reader's antennas
    pub fn alias(&self, antenna_id: u16) -> String {
        match self.antenna_aliases.get(&antenna_id) {
            Some(alias) => alias.clone(),
            None => format!("{}-{}", self.device_id, antenna_id),
        }
    }
}

/// A single tag observation reported by a reader antenna
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRead {
    pub epc: String,
    #[serde(default)]
    pub tid: Option<String>,
    #[serde(default)]
    pub antenna_id: u16,
    /// Read time (epoch ms)
    pub last_read_on: u64,
    /// Signal strength in tenths of dBm
    pub rssi: i32,
}

impl TagRead {
    pub fn new(epc: &str, antenna_id: u16, rssi: i32, last_read_on: u64) -> Self {
        Self { epc: epc.to_string(), tid: None, antenna_id, last_read_on, rssi }
    }

    pub fn with_tid(mut self, tid: &str) -> Self {
        self.tid = Some(tid.to_string());
        self
    }

    /// Signal strength in dBm
    #[inline]
    pub fn rssi_dbm(&self) -> f64 {
        f64::from(self.rssi) / 10.0
    }
}
