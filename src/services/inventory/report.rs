//! Read-only views of the registry: summaries, tag info, statistics and text reports

use super::InventoryEngine;
use crate::domain::stats::StatsResults;
use crate::domain::tag::{Tag, TagState, STATS_DETAIL_CSV_HDR, STATS_SUMMARY_CSV_HDR};
use crate::domain::types::epoch_ms;
use crate::error::{InventoryError, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Last-seen age buckets, in reporting order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TimeBucket {
    #[serde(rename = "within_last_01_min")]
    WithinLast01Min,
    #[serde(rename = "from_01_to_05_min")]
    From01To05Min,
    #[serde(rename = "from_05_to_30_min")]
    From05To30Min,
    #[serde(rename = "from_30_to_60_min")]
    From30To60Min,
    #[serde(rename = "from_60_min_to_24_hr")]
    From60MinTo24Hr,
    #[serde(rename = "more_than_24_hr")]
    MoreThan24Hr,
}

impl TimeBucket {
    pub const ALL: [TimeBucket; 6] = [
        TimeBucket::WithinLast01Min,
        TimeBucket::From01To05Min,
        TimeBucket::From05To30Min,
        TimeBucket::From30To60Min,
        TimeBucket::From60MinTo24Hr,
        TimeBucket::MoreThan24Hr,
    ];

    /// Exclusive upper bound in milliseconds
    fn upper_ms(&self) -> u64 {
        match self {
            TimeBucket::WithinLast01Min => 60_000,
            TimeBucket::From01To05Min => 5 * 60_000,
            TimeBucket::From05To30Min => 30 * 60_000,
            TimeBucket::From30To60Min => 60 * 60_000,
            TimeBucket::From60MinTo24Hr => 24 * 60 * 60_000,
            TimeBucket::MoreThan24Hr => u64::MAX,
        }
    }

    pub fn of(elapsed_ms: u64) -> TimeBucket {
        Self::ALL
            .into_iter()
            .find(|bucket| elapsed_ms < bucket.upper_ms())
            .unwrap_or(TimeBucket::MoreThan24Hr)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeBucket::WithinLast01Min => "within_last_01_min",
            TimeBucket::From01To05Min => "from_01_to_05_min",
            TimeBucket::From05To30Min => "from_05_to_30_min",
            TimeBucket::From30To60Min => "from_30_to_60_min",
            TimeBucket::From60MinTo24Hr => "from_60_min_to_24_hr",
            TimeBucket::MoreThan24Hr => "more_than_24_hr",
        }
    }
}

/// EPC filter. The pattern is a regular expression in which a bare `*`
/// stands for `.*`, anchored to the whole EPC. No pattern (or an empty one)
/// matches everything.
#[derive(Debug, Clone)]
pub struct EpcPattern {
    source: Option<String>,
    regex: Option<Regex>,
}

impl EpcPattern {
    pub fn new(pattern: Option<&str>) -> Result<Self> {
        let Some(source) = pattern.filter(|p| !p.is_empty()) else {
            return Ok(Self::all());
        };
        let regex = Regex::new(&format!("^(?:{})$", expand_wildcards(source))).map_err(|e| {
            InventoryError::InvalidArgument(format!("bad EPC pattern {source:?}: {e}"))
        })?;
        Ok(Self { source: Some(source.to_string()), regex: Some(regex) })
    }

    pub fn all() -> Self {
        Self { source: None, regex: None }
    }

    pub fn matches(&self, epc: &str) -> bool {
        self.regex.as_ref().map_or(true, |re| re.is_match(epc))
    }
}

/// `*` not already preceded by `.` becomes `.*`
fn expand_wildcards(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut prev = None;
    for c in pattern.chars() {
        if c == '*' && prev != Some('.') {
            out.push('.');
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

impl PartialEq for EpcPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for EpcPattern {}

impl std::fmt::Display for EpcPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.source.as_deref().unwrap_or("*"))
    }
}

/// Counts per lifecycle state, per last-seen bucket, and the current read rate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventorySummary {
    pub total_tags: usize,
    pub tag_state_summary: BTreeMap<TagState, usize>,
    pub tag_read_summary: BTreeMap<TimeBucket, usize>,
    pub reads_per_second: f64,
}

impl InventorySummary {
    pub fn state_count(&self, state: TagState) -> usize {
        self.tag_state_summary.get(&state).copied().unwrap_or(0)
    }

    pub fn bucket_count(&self, bucket: TimeBucket) -> usize {
        self.tag_read_summary.get(&bucket).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagInfo {
    pub epc: String,
    pub tid: Option<String>,
    pub state: TagState,
    pub location: String,
    pub last_read: u64,
    pub facility: String,
}

impl From<&Tag> for TagInfo {
    fn from(tag: &Tag) -> Self {
        Self {
            epc: tag.epc().to_string(),
            tid: tag.tid().map(str::to_string),
            state: tag.state(),
            location: tag.location().to_string(),
            last_read: tag.last_read(),
            facility: tag.facility().to_string(),
        }
    }
}

/// Per-antenna statistics (dBm) of every matching tag
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsReport {
    /// epc → location alias → results
    pub tags: BTreeMap<String, BTreeMap<String, StatsResults>>,
    /// Every location alias seen by any matching tag
    pub locations: BTreeSet<String>,
}

impl InventoryEngine {
    pub fn summary(&self) -> InventorySummary {
        self.summary_at(epoch_ms())
    }

    pub fn summary_at(&self, now: u64) -> InventorySummary {
        let mut states: BTreeMap<TagState, usize> =
            TagState::ALL.iter().map(|s| (*s, 0)).collect();
        let mut buckets: BTreeMap<TimeBucket, usize> =
            TimeBucket::ALL.iter().map(|b| (*b, 0)).collect();

        let total_tags = {
            let registry = self.registry.lock();
            for tag in registry.tags.values() {
                *states.entry(tag.state()).or_default() += 1;
                *buckets.entry(TimeBucket::of(now.saturating_sub(tag.last_read()))).or_default() += 1;
            }
            registry.tags.len()
        };

        InventorySummary {
            total_tags,
            tag_state_summary: states,
            tag_read_summary: buckets,
            reads_per_second: self.metrics.reads_per_sec(),
        }
    }

    /// Copies of every matching tag, sorted by EPC
    pub fn tags_matching(&self, pattern: &EpcPattern) -> Vec<Tag> {
        let registry = self.registry.lock();
        registry.sorted().into_iter().filter(|t| pattern.matches(t.epc())).cloned().collect()
    }

    pub fn tag_info(&self, pattern: &EpcPattern) -> Vec<TagInfo> {
        let registry = self.registry.lock();
        registry.sorted().into_iter().filter(|t| pattern.matches(t.epc())).map(TagInfo::from).collect()
    }

    pub fn stats_matching(&self, pattern: &EpcPattern) -> StatsReport {
        let mut report = StatsReport::default();
        let registry = self.registry.lock();
        for tag in registry.tags.values().filter(|t| pattern.matches(t.epc())) {
            let per_location: BTreeMap<String, StatsResults> =
                tag.stats().iter().map(|(alias, stats)| (alias.clone(), stats.in_dbm())).collect();
            report.locations.extend(per_location.keys().cloned());
            report.tags.insert(tag.epc().to_string(), per_location);
        }
        report
    }

    /// EPCs currently EXITING, per facility
    pub fn exiting_tags(&self) -> BTreeMap<String, Vec<String>> {
        let registry = self.registry.lock();
        registry
            .exiting
            .iter()
            .map(|(facility, epcs)| (facility.clone(), epcs.iter().cloned().collect()))
            .collect()
    }

    /// Header plus one summary row per (tag, antenna)
    pub fn stats_summary_csv(&self, pattern: &EpcPattern, now: u64) -> Vec<String> {
        let mut lines = vec![STATS_SUMMARY_CSV_HDR.to_string()];
        let registry = self.registry.lock();
        for tag in registry.sorted().into_iter().filter(|t| pattern.matches(t.epc())) {
            lines.extend(tag.stats_summary_lines(now));
        }
        lines
    }

    /// Detail rows without a header; recordings call this repeatedly for one file
    pub fn stats_detail_rows(&self, pattern: &EpcPattern, now: u64) -> Vec<String> {
        let registry = self.registry.lock();
        registry
            .sorted()
            .into_iter()
            .filter(|t| pattern.matches(t.epc()))
            .flat_map(|t| t.stats_detail_lines(now))
            .collect()
    }

    pub fn stats_detail_csv(&self, pattern: &EpcPattern, now: u64) -> Vec<String> {
        let mut lines = vec![STATS_DETAIL_CSV_HDR.to_string()];
        lines.extend(self.stats_detail_rows(pattern, now));
        lines
    }

    pub fn waypoint_lines(&self, pattern: &EpcPattern) -> Vec<String> {
        let registry = self.registry.lock();
        registry
            .sorted()
            .into_iter()
            .filter(|t| pattern.matches(t.epc()))
            .map(Tag::waypoints_line)
            .collect()
    }

    pub fn detail_lines(&self, pattern: &EpcPattern, now: u64) -> Vec<String> {
        let registry = self.registry.lock();
        registry
            .sorted()
            .into_iter()
            .filter(|t| pattern.matches(t.epc()))
            .map(|t| t.detail_line(now))
            .collect()
    }
}
