//! IO modules - external system interfaces
//!
//! - `event_log` - Published event batches to file (JSONL format)
//! - `files` - Atomic writes and directory helpers for cache and snapshots
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod event_log;
pub mod files;
pub mod prometheus;

// Re-export commonly used types
pub use event_log::EventLog;
