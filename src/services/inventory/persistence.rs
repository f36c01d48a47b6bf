//! Inventory cache, CSV snapshots and stats files
//!
//! Every writer copies what it needs out of the registry first and does its
//! file I/O after the lock is released.

use super::report::EpcPattern;
use super::{InventoryEngine, StatsRecording};
use crate::domain::tag::{Tag, TagRecord, STATS_DETAIL_CSV_HDR};
use crate::domain::types::epoch_ms;
use crate::error::{InventoryError, Result};
use crate::io::files::{ensure_dir, remove_if_exists, write_atomically};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const CACHE_FILE: &str = "current_inventory.json";

const SNAPSHOT_CSV_HDR: &str = "Facility,Epc,State,Last Seen,Location";

/// Cache document. Older gateways grouped records by facility under `inventory`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct InventoryCache {
    #[serde(default)]
    tags: Vec<TagRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    inventory: BTreeMap<String, Vec<TagRecord>>,
}

impl InventoryCache {
    fn into_records(self) -> Vec<TagRecord> {
        if !self.tags.is_empty() {
            return self.tags;
        }
        self.inventory
            .into_iter()
            .flat_map(|(facility, records)| {
                records.into_iter().map(move |mut record| {
                    record.facility = facility.clone();
                    record
                })
            })
            .collect()
    }
}

/// Outcome of `snapshot_to_file`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    Written(PathBuf),
    NoInventory,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Snapshot::Written(path) => write!(f, "{}", path.display()),
            Snapshot::NoInventory => f.write_str("NO_INVENTORY"),
        }
    }
}

/// Local time stamp used in generated file names, millisecond resolution
fn file_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// `<dir>/<prefix>_<timestamp>.csv`, with a counter suffix if that name is taken
fn timestamped_path(dir: &Path, prefix: &str) -> PathBuf {
    let stamp = file_timestamp();
    let mut path = dir.join(format!("{prefix}_{stamp}.csv"));
    let mut suffix = 1u32;
    while path.exists() {
        path = dir.join(format!("{prefix}_{stamp}_{suffix}.csv"));
        suffix += 1;
    }
    path
}

/// Delete regular files in `dir` last modified before `cutoff`
fn delete_older_than(dir: &Path, cutoff: SystemTime) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let mut deleted = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        if meta.modified().is_ok_and(|modified| modified < cutoff) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!(file = %path.display(), "snapshot_deleted");
                    deleted += 1;
                }
                Err(e) => warn!(file = %path.display(), error = %e, "snapshot_delete_failed"),
            }
        }
    }
    deleted
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut body = lines.join("\n");
    body.push('\n');
    write_atomically(path, body.as_bytes())
}

impl InventoryEngine {
    pub fn cache_path(&self) -> PathBuf {
        self.config.cache_dir().join(CACHE_FILE)
    }

    /// Write the cache, or remove it when the inventory is empty. Returns the record count.
    pub fn persist(&self) -> Result<usize> {
        let cache = InventoryCache {
            tags: self.registry.lock().tags.values().map(Tag::to_record).collect(),
            inventory: BTreeMap::new(),
        };
        let path = self.cache_path();

        if cache.tags.is_empty() {
            remove_if_exists(&path)?;
            debug!(file = %path.display(), "inventory_cache_removed");
            return Ok(0);
        }

        write_atomically(&path, &serde_json::to_vec_pretty(&cache)?)?;
        info!(file = %path.display(), tags = %cache.tags.len(), "inventory_persisted");
        Ok(cache.tags.len())
    }

    /// Load the cache into the registry. A missing cache restores nothing.
    pub fn restore(&self) -> Result<usize> {
        let path = self.cache_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let records = serde_json::from_str::<InventoryCache>(&content)?.into_records();
        let history_size = self.config.waypoint_history_size();

        let count = records.len();
        {
            let mut registry = self.registry.lock();
            for record in records {
                let tag = Tag::from_record(record, history_size);
                registry.tags.insert(tag.epc().to_string(), tag);
            }
        }
        info!(file = %path.display(), tags = %count, "inventory_restored");
        Ok(count)
    }

    /// Write a CSV of the whole inventory, pruning snapshots past retention first
    pub fn snapshot_to_file(&self) -> Result<Snapshot> {
        let dir = self.config.snapshot_dir();
        let retention = Duration::from_secs(self.config.snapshot_retention_days() * 86_400);
        if let Some(cutoff) = SystemTime::now().checked_sub(retention) {
            delete_older_than(dir, cutoff);
        }

        let mut rows: Vec<TagRecord> =
            self.registry.lock().tags.values().map(Tag::to_record).collect();
        if rows.is_empty() {
            warn!("snapshot_no_inventory");
            return Ok(Snapshot::NoInventory);
        }
        rows.sort_by(|a, b| (&a.facility, &a.epc).cmp(&(&b.facility, &b.epc)));

        let mut lines = Vec::with_capacity(rows.len() + 1);
        lines.push(SNAPSHOT_CSV_HDR.to_string());
        lines.extend(rows.iter().map(|r| {
            format!("{},{},{},{},{}", r.facility, r.epc, r.state, r.last_read, r.location)
        }));

        let path = timestamped_path(dir, "gw_inventory");
        write_lines(&path, &lines)?;
        info!(file = %path.display(), tags = %rows.len(), "snapshot_written");
        Ok(Snapshot::Written(path))
    }

    /// Write the stats detail of matching tags to a new CSV under the stats dir
    pub fn snapshot_stats(&self, pattern: &EpcPattern) -> Result<PathBuf> {
        let lines = self.stats_detail_csv(pattern, epoch_ms());
        let path = timestamped_path(self.config.stats_dir(), "stats_snap");
        write_lines(&path, &lines)?;
        info!(file = %path.display(), pattern = %pattern, "stats_snapshot_written");
        Ok(path)
    }

    /// Write the waypoint trail of matching tags to a new CSV under the stats dir
    pub fn snapshot_waypoints(&self, pattern: &EpcPattern) -> Result<PathBuf> {
        let lines = self.waypoint_lines(pattern);
        let path = timestamped_path(self.config.stats_dir(), "waypoints_snap");
        write_lines(&path, &lines)?;
        info!(file = %path.display(), pattern = %pattern, "waypoints_snapshot_written");
        Ok(path)
    }

    /// Snapshot, then drop every tag and exiting set and remove the cache
    pub fn unload_all(&self) -> Result<Snapshot> {
        let snapshot = self.snapshot_to_file()?;
        {
            let mut registry = self.registry.lock();
            registry.tags.clear();
            registry.exiting.clear();
        }
        remove_if_exists(&self.cache_path())?;
        info!(snapshot = %snapshot, "inventory_unloaded");
        Ok(snapshot)
    }

    /// Start appending stats detail rows for matching tags to a new CSV file
    /// every `stats_record_interval_secs`. Replaces any recording in progress.
    pub fn start_recording_stats(self: &Arc<Self>, pattern: EpcPattern) -> Result<PathBuf> {
        if let Some(previous) = self.stop_recording_stats() {
            warn!(file = %previous.display(), "stats_recording_replaced");
        }

        let dir = self.config.stats_dir();
        ensure_dir(dir)?;
        let path = timestamped_path(dir, "tag_stats");
        fs::write(&path, format!("{STATS_DETAIL_CSV_HDR}\n"))
            .map_err(|source| InventoryError::Write { path: path.clone(), source })?;

        let period = Duration::from_secs(self.config.stats_record_interval_secs().max(1));
        let weak: Weak<Self> = Arc::downgrade(self);
        let file = path.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = weak.upgrade() else { break };
                let rows = engine.stats_detail_rows(&pattern, epoch_ms());
                if let Err(e) = append_rows(&file, &rows) {
                    error!(file = %file.display(), error = %e, "stats_recording_write_failed");
                }
            }
        });

        info!(file = %path.display(), "stats_recording_started");
        *self.recording.lock() = Some(StatsRecording { path: path.clone(), handle });
        Ok(path)
    }

    /// Stop the recording in progress, returning its file
    pub fn stop_recording_stats(&self) -> Option<PathBuf> {
        let recording = self.recording.lock().take()?;
        // Writes happen between ticks, so aborting never cuts a row short
        recording.handle.abort();
        info!(file = %recording.path.display(), "stats_recording_stopped");
        Some(recording.path)
    }
}

fn append_rows(path: &Path, rows: &[String]) -> std::io::Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for row in rows {
        writeln!(file, "{row}")?;
    }
    Ok(())
}
