//! Inventory engine - the tag registry and the events derived from it
//!
//! The engine owns:
//! - the registry (EPC → Tag plus the per-facility exiting sets) behind one lock
//! - the location resolver and its active mobility profile
//! - event listeners, called after the registry lock is released
//! - background maintenance tasks (exit aggregation, age-out, persistence,
//!   read-rate sampling, optional stats recording)

mod handlers;
pub mod lifecycle;
mod persistence;
pub mod report;
mod tasks;
#[cfg(test)]
mod tests;

pub use persistence::{Snapshot, CACHE_FILE};
pub use report::{EpcPattern, InventorySummary, StatsReport, TagInfo, TimeBucket};

use crate::domain::event::EventBatch;
use crate::domain::tag::{Tag, TagState};
use crate::infra::config::Config;
use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::services::profiles::{ProfileResult, ProfileStore};
use crate::services::resolver::LocationResolver;
use lifecycle::Thresholds;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

/// Receives every non-empty event batch the engine publishes
pub trait EventListener: Send + Sync {
    fn on_event_batch(&self, batch: &EventBatch);
}

impl<F> EventListener for F
where
    F: Fn(&EventBatch) + Send + Sync,
{
    fn on_event_batch(&self, batch: &EventBatch) {
        self(batch)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Everything guarded by the registry lock
#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) tags: FxHashMap<String, Tag>,
    /// facility id → EPCs currently EXITING there
    pub(crate) exiting: FxHashMap<String, BTreeSet<String>>,
}

impl Registry {
    pub(crate) fn exiting_count(&self) -> usize {
        self.exiting.values().map(BTreeSet::len).sum()
    }

    /// Tags sorted by EPC
    pub(crate) fn sorted(&self) -> Vec<&Tag> {
        let mut tags: Vec<&Tag> = self.tags.values().collect();
        tags.sort_unstable_by(|a, b| a.epc().cmp(b.epc()));
        tags
    }

    /// EXITING ⇔ member of its facility's exiting set
    #[cfg(test)]
    pub(crate) fn exiting_consistent(&self) -> bool {
        let members: BTreeSet<(&str, &str)> = self
            .exiting
            .iter()
            .flat_map(|(facility, epcs)| epcs.iter().map(move |epc| (facility.as_str(), epc.as_str())))
            .collect();
        let exiting: BTreeSet<(&str, &str)> = self
            .tags
            .values()
            .filter(|t| t.state() == TagState::Exiting)
            .map(|t| (t.facility(), t.epc()))
            .collect();
        members == exiting
    }
}

pub(crate) struct StatsRecording {
    pub(crate) path: std::path::PathBuf,
    pub(crate) handle: JoinHandle<()>,
}

pub struct InventoryEngine {
    pub(crate) config: Config,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) resolver: LocationResolver,
    pub(crate) profiles: ProfileStore,
    pub(crate) registry: Mutex<Registry>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn EventListener>)>>,
    next_listener_id: AtomicU64,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) running: AtomicBool,
    pub(crate) recording: Mutex<Option<StatsRecording>>,
}

impl InventoryEngine {
    pub fn new(config: Config, metrics: Arc<Metrics>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            resolver: LocationResolver::new(config.cache_dir()),
            profiles: ProfileStore::new(config.mobility_dir()),
            config,
            metrics,
            registry: Mutex::new(Registry::default()),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            recording: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn resolver(&self) -> &LocationResolver {
        &self.resolver
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    /// Activate a stored or built-in mobility profile by id
    pub fn activate_profile(&self, id: &str) -> ProfileResult {
        self.profiles.activate(id, &self.resolver)
    }

    pub(crate) fn thresholds(&self) -> Thresholds {
        Thresholds {
            pos_departed_ms: self.config.pos_departed_threshold_ms(),
            pos_return_ms: self.config.pos_return_threshold_ms(),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns false if the id was not subscribed
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Hand a batch to every listener. Must be called without the registry lock.
    pub(crate) fn publish(&self, batch: &EventBatch) {
        if batch.is_empty() {
            return;
        }
        self.metrics.record_events(batch);

        // Listeners may call back into the engine, so never hold our own lock either
        let listeners: Vec<Arc<dyn EventListener>> =
            self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event_batch(batch))).is_err() {
                self.metrics.record_listener_failure();
                error!(events = %batch.len(), "event_listener_panicked");
            }
        }
    }

    /// Metrics summary stamped with the current registry sizes
    pub fn metrics_report(&self) -> MetricsSummary {
        let (tags, exiting) = {
            let registry = self.registry.lock();
            (registry.tags.len(), registry.exiting_count())
        };
        self.metrics.report(tags, exiting)
    }

    pub fn tag_count(&self) -> usize {
        self.registry.lock().tags.len()
    }

    /// Current lifecycle state of one tag
    pub fn state_of(&self, epc: &str) -> Option<TagState> {
        self.registry.lock().tags.get(epc).map(Tag::state)
    }

    /// Copy of one tag
    pub fn tag(&self, epc: &str) -> Option<Tag> {
        self.registry.lock().tags.get(epc).cloned()
    }
}
