//! Event log - appends published event batches to file
//!
//! Batches are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::domain::event::EventBatch;
use crate::services::inventory::EventListener;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Listener that egresses every event batch to a JSONL file
pub struct EventLog {
    file_path: PathBuf,
    /// Serializes appends from concurrent publishers
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        info!(file_path = %file_path.display(), "event_log_initialized");
        Self { file_path, write_lock: Mutex::new(()) }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Write a batch to the event log. Returns true if successful.
    pub fn write_batch(&self, batch: &EventBatch) -> bool {
        let json = batch.to_json();

        match self.append_line(&json) {
            Ok(()) => {
                debug!(
                    events = %batch.len(),
                    sent_on = %batch.sent_on,
                    "event_batch_egressed"
                );
                true
            }
            Err(e) => {
                error!(
                    file = %self.file_path.display(),
                    events = %batch.len(),
                    error = %e,
                    "event_batch_egress_failed"
                );
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.write_lock.lock();

        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

impl EventListener for EventLog {
    fn on_event_batch(&self, batch: &EventBatch) {
        self.write_batch(batch);
    }
}
