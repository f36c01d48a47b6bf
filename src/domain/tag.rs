//! Tag record - the authoritative per-tag location and lifecycle state

use crate::domain::history::WaypointHistory;
use crate::domain::stats::ReadStats;
use crate::domain::types::{ReaderContext, TagRead, UNKNOWN};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// A new antenna must see a tag more than this many times before it can take over
pub const RELOCATION_BURN_IN_READS: u64 = 2;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagState {
    #[default]
    Unknown,
    Present,
    Exiting,
    DepartedExit,
    DepartedPos,
}

impl TagState {
    pub const ALL: [TagState; 5] = [
        TagState::Unknown,
        TagState::Present,
        TagState::Exiting,
        TagState::DepartedExit,
        TagState::DepartedPos,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TagState::Unknown => "UNKNOWN",
            TagState::Present => "PRESENT",
            TagState::Exiting => "EXITING",
            TagState::DepartedExit => "DEPARTED_EXIT",
            TagState::DepartedPos => "DEPARTED_POS",
        }
    }

    pub fn abbrev(&self) -> &'static str {
        match self {
            TagState::Unknown => "U",
            TagState::Present => "P",
            TagState::Exiting => "E",
            TagState::DepartedExit => "DX",
            TagState::DepartedPos => "DP",
        }
    }
}

impl std::fmt::Display for TagState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state together with the timestamps its transitions capture.
///
/// Replaced as a whole on every transition so the state and its timestamps
/// can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lifecycle {
    pub state: TagState,
    pub last_arrived: u64,
    pub last_departed: u64,
}

impl Lifecycle {
    /// Enter `state` at time `at`, capturing the matching transition timestamp
    #[must_use]
    pub fn enter(self, state: TagState, at: u64) -> Lifecycle {
        match state {
            TagState::Present => Lifecycle { state, last_arrived: at, ..self },
            TagState::DepartedExit | TagState::DepartedPos => {
                Lifecycle { state, last_departed: at, ..self }
            }
            TagState::Unknown | TagState::Exiting => Lifecycle { state, ..self },
        }
    }
}

/// Decides how much stronger a new antenna must be before a tag relocates
pub trait LocationWeigher {
    /// `last_read_ms` is when the tag was last confirmed at its current location
    fn weight(&self, last_read_ms: u64, reader: &ReaderContext) -> f64;
}

/// Weigher that only compares mean signal strength
pub struct NoWeight;

impl LocationWeigher for NoWeight {
    fn weight(&self, _last_read_ms: u64, _reader: &ReaderContext) -> f64 {
        0.0
    }
}

/// Fields of a tag captured before a read is applied
#[derive(Debug, Clone, PartialEq)]
pub struct TagSnapshot {
    pub location: String,
    pub device_location: String,
    pub facility: String,
    pub last_read: u64,
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone)]
pub struct Tag {
    epc: String,
    tid: Option<String>,
    location: String,
    device_location: String,
    facility: String,
    last_read: u64,
    lifecycle: Lifecycle,
    stats: BTreeMap<String, ReadStats>,
    history: WaypointHistory,
}

impl Tag {
    pub fn new(epc: &str) -> Self {
        Self::with_history_size(epc, crate::domain::history::DEFAULT_HISTORY_SIZE)
    }

    pub fn with_history_size(epc: &str, history_size: usize) -> Self {
        Self {
            epc: epc.to_string(),
            tid: None,
            location: UNKNOWN.to_string(),
            device_location: UNKNOWN.to_string(),
            facility: UNKNOWN.to_string(),
            last_read: 0,
            lifecycle: Lifecycle::default(),
            stats: BTreeMap::new(),
            history: WaypointHistory::new(history_size),
        }
    }

    pub fn epc(&self) -> &str {
        &self.epc
    }

    pub fn tid(&self) -> Option<&str> {
        self.tid.as_deref()
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn device_location(&self) -> &str {
        &self.device_location
    }

    pub fn facility(&self) -> &str {
        &self.facility
    }

    pub fn last_read(&self) -> u64 {
        self.last_read
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn state(&self) -> TagState {
        self.lifecycle.state
    }

    pub fn last_arrived(&self) -> u64 {
        self.lifecycle.last_arrived
    }

    pub fn last_departed(&self) -> u64 {
        self.lifecycle.last_departed
    }

    pub fn stats(&self) -> &BTreeMap<String, ReadStats> {
        &self.stats
    }

    pub fn history(&self) -> &WaypointHistory {
        &self.history
    }

    /// Replace the lifecycle as one value
    pub fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
    }

    pub fn snapshot(&self) -> TagSnapshot {
        TagSnapshot {
            location: self.location.clone(),
            device_location: self.device_location.clone(),
            facility: self.facility.clone(),
            last_read: self.last_read,
            lifecycle: self.lifecycle,
        }
    }

    /// True when this antenna already reported a read at exactly this time
    pub fn is_repeat(&self, reader: &ReaderContext, read: &TagRead) -> bool {
        self.stats
            .get(&reader.alias(read.antenna_id))
            .is_some_and(|stats| stats.n() > 0 && stats.last_read() == read.last_read_on)
    }

    /// Apply one read: fold it into the antenna statistics and decide whether
    /// the tag relocates. Returns true when the location changed.
    pub fn update(
        &mut self,
        reader: &ReaderContext,
        read: &TagRead,
        weigher: &dyn LocationWeigher,
    ) -> bool {
        let alias = reader.alias(read.antenna_id);

        self.last_read = self.last_read.max(read.last_read_on);

        let new_stats = self.stats.entry(alias.clone()).or_default();
        new_stats.update(read.last_read_on, read.rssi_dbm());
        let new_n = new_stats.n();
        let new_mean = new_stats.rssi_mean_dbm();

        if let Some(tid) = &read.tid {
            self.tid = Some(tid.clone());
        }

        if self.location == alias {
            return false;
        }

        let relocate = match self.stats.get(&self.location) {
            // Never confirmed at its current location (first read or restored)
            None => true,
            Some(current) => {
                new_n > RELOCATION_BURN_IN_READS
                    && new_mean > current.rssi_mean_dbm() + weigher.weight(current.last_read(), reader)
            }
        };

        if relocate {
            self.location = alias;
            self.device_location = reader.device_id.clone();
            self.facility = reader.facility_id.clone();
            self.history.add(&self.location, self.last_read);
        }
        relocate
    }

    pub fn to_record(&self) -> TagRecord {
        TagRecord {
            epc: self.epc.clone(),
            tid: self.tid.clone(),
            state: self.lifecycle.state,
            location: self.location.clone(),
            device_location: self.device_location.clone(),
            facility: self.facility.clone(),
            last_read: self.last_read,
        }
    }

    /// Rebuild a tag from a persisted record. Statistics and waypoints start
    /// empty; a transient EXITING state comes back as PRESENT.
    pub fn from_record(record: TagRecord, history_size: usize) -> Self {
        let mut tag = Tag::with_history_size(&record.epc, history_size);
        tag.tid = record.tid;
        tag.lifecycle.state = match record.state {
            TagState::Exiting => TagState::Present,
            other => other,
        };
        tag.location = record.location;
        tag.device_location = record.device_location;
        tag.facility = record.facility;
        tag.last_read = record.last_read;
        tag
    }

    /// `epc, tid, state, location, elapsed, facility`
    pub fn detail_line(&self, now: u64) -> String {
        format!(
            "{}, {}, {}, {}, {}, {}",
            self.epc,
            self.tid.as_deref().unwrap_or("null"),
            self.lifecycle.state.abbrev(),
            self.location,
            format_elapsed(now.saturating_sub(self.last_read)),
            self.facility
        )
    }

    /// One summary row per antenna that has seen this tag
    pub fn stats_summary_lines(&self, now: u64) -> Vec<String> {
        self.stats
            .iter()
            .map(|(alias, stats)| {
                let r = stats.in_dbm();
                format!(
                    "{}, {}, {}, {}, {}, {}, {:2}, {:6.1}, {:9.1}, {:6.1}, {:6.1}, {:8.0}, {:8.0}",
                    self.epc,
                    self.tid.as_deref().unwrap_or("null"),
                    self.lifecycle.state.abbrev(),
                    format_elapsed(now.saturating_sub(r.last_read)),
                    if self.location == *alias { "@" } else { " " },
                    alias,
                    r.n,
                    r.mean,
                    r.std_dev,
                    r.min,
                    r.max,
                    stats.read_interval_mean(),
                    stats.read_interval_std_dev()
                )
            })
            .collect()
    }

    /// One detail row per antenna with both dBm and mW results
    pub fn stats_detail_lines(&self, now: u64) -> Vec<String> {
        self.stats
            .iter()
            .map(|(alias, stats)| {
                let db = stats.in_dbm();
                let mw = stats.in_milliwatts();
                format!(
                    "{},{},{},{},{},{},{},{},{},{:.1},{:.1},{:.1},{:.1},{:.14},{:.14},{:.14},{:.14},{:.1},{:.1}",
                    self.epc,
                    self.tid.as_deref().unwrap_or("null"),
                    self.lifecycle.state.abbrev(),
                    now,
                    db.last_read,
                    format_elapsed(now.saturating_sub(db.last_read)),
                    if self.location == *alias { "@" } else { " " },
                    alias,
                    db.n,
                    db.mean,
                    db.std_dev,
                    db.min,
                    db.max,
                    mw.mean,
                    mw.std_dev,
                    mw.min,
                    mw.max,
                    stats.read_interval_mean(),
                    stats.read_interval_std_dev()
                )
            })
            .collect()
    }

    /// `epc, tid, state, loc, ts, loc, ts, ...`
    pub fn waypoints_line(&self) -> String {
        let mut line = format!(
            "{}, {}, {}",
            self.epc,
            self.tid.as_deref().unwrap_or("null"),
            self.lifecycle.state.abbrev()
        );
        for wp in self.history.iter() {
            let _ = write!(line, ", {}, {}", wp.location, wp.timestamp);
        }
        line
    }
}

pub const STATS_SUMMARY_CSV_HDR: &str = "epc, tid, state, elapsed, location-ind, sensor, count, \
     mean-dBm, stddev-dBm, min-dBm, max-dBm, mean-readInt, stddev-readInt";

pub const STATS_DETAIL_CSV_HDR: &str = "epc,tid,state,cur-time,last-read,elapsed,\
     location-ind,sensor,count,mean-dBm,stddev-dBm,min-dBm,max-dBm,\
     mean-mW,stddev-mW,min-mW,max-mW,mean-readInt,stddev-readInt";

/// Persisted form of a tag; enough to rebuild it in degraded form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRecord {
    pub epc: String,
    #[serde(default)]
    pub tid: Option<String>,
    pub state: TagState,
    pub location: String,
    #[serde(default = "unknown_string")]
    pub device_location: String,
    #[serde(default = "unknown_string")]
    pub facility: String,
    pub last_read: u64,
}

fn unknown_string() -> String {
    UNKNOWN.to_string()
}

/// Format an elapsed duration as `HH:MM:SS.mmm`
pub fn format_elapsed(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    let millis = ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}
