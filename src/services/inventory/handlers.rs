//! Registry mutations: read batches, exit aggregation, age-out, clear-exiting
//!
//! Each operation runs as one critical section on the registry and collects
//! its events into a batch that is published after the lock is released.

use super::lifecycle::{self, AppliedRead, Effect, Thresholds};
use super::{InventoryEngine, Registry};
use crate::domain::event::{EventBatch, EventItem, TagEvent};
use crate::domain::tag::{LocationWeigher, Tag, TagState};
use crate::domain::types::{epoch_ms, ReaderContext, TagRead};
use crate::error::{InventoryError, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, error, info, warn};

const MS_PER_HOUR: u64 = 3_600_000;

impl Registry {
    /// Apply one read to its tag and carry out the lifecycle decision
    pub(crate) fn apply_read(
        &mut self,
        reader: &ReaderContext,
        read: &TagRead,
        weigher: &dyn LocationWeigher,
        thresholds: &Thresholds,
        history_size: usize,
        batch: &mut EventBatch,
    ) {
        let tag = self
            .tags
            .entry(read.epc.clone())
            .or_insert_with(|| Tag::with_history_size(&read.epc, history_size));

        // Readers re-deliver reads after a reconnect
        if tag.is_repeat(reader, read) {
            debug!(epc = %read.epc, device = %reader.device_id, "repeated_read_skipped");
            return;
        }

        let previous = tag.snapshot();
        tag.update(reader, read, weigher);

        let transition = lifecycle::on_read(
            &AppliedRead {
                roles: reader.roles,
                reader_device: &reader.device_id,
                previous: &previous,
                location: tag.location(),
                device_location: tag.device_location(),
                facility: tag.facility(),
                last_read: tag.last_read(),
            },
            thresholds,
        );
        tag.set_lifecycle(transition.lifecycle);

        for effect in transition.effects {
            match effect {
                Effect::Emit(kind) => {
                    if kind == TagEvent::Departed {
                        info!(epc = %tag.epc(), location = %tag.location(), "tag_departed_pos");
                    }
                    batch.push(EventItem::new(
                        tag.epc(),
                        tag.tid(),
                        tag.location(),
                        tag.facility(),
                        kind,
                        tag.last_read(),
                    ));
                }
                Effect::DepartPrevious => batch.push(EventItem::new(
                    tag.epc(),
                    tag.tid(),
                    &previous.location,
                    &previous.facility,
                    TagEvent::Departed,
                    previous.last_read,
                )),
                Effect::JoinExiting => {
                    self.exiting
                        .entry(tag.facility().to_string())
                        .or_default()
                        .insert(read.epc.clone());
                    debug!(epc = %read.epc, facility = %tag.facility(), "tag_exiting");
                }
                Effect::LeaveExiting => self.exiting.retain(|_, epcs| {
                    epcs.remove(&read.epc);
                    !epcs.is_empty()
                }),
            }
        }

        // An exiting tag that relocates across facilities stays exiting in its new one
        if previous.lifecycle.state == TagState::Exiting
            && tag.state() == TagState::Exiting
            && previous.facility != tag.facility()
        {
            if let Some(epcs) = self.exiting.get_mut(&previous.facility) {
                epcs.remove(&read.epc);
                if epcs.is_empty() {
                    self.exiting.remove(&previous.facility);
                }
            }
            self.exiting.entry(tag.facility().to_string()).or_default().insert(read.epc.clone());
        }
    }

    /// Promote EXITING tags unread since `expiration` to DEPARTED_EXIT
    pub(crate) fn sweep_exiting(&mut self, expiration: u64, now: u64, batch: &mut EventBatch) {
        let tags = &mut self.tags;
        self.exiting.retain(|facility, epcs| {
            epcs.retain(|epc| {
                let Some(tag) = tags.get_mut(epc) else {
                    return false;
                };
                if tag.state() != TagState::Exiting {
                    return false;
                }
                if tag.last_read() < expiration {
                    tag.set_lifecycle(tag.lifecycle().enter(TagState::DepartedExit, now));
                    batch.push(EventItem::new(
                        tag.epc(),
                        tag.tid(),
                        tag.location(),
                        tag.facility(),
                        TagEvent::Departed,
                        tag.last_read(),
                    ));
                    info!(epc = %epc, facility = %facility, "tag_departed_exit");
                    return false;
                }
                true
            });
            !epcs.is_empty()
        });
    }

    /// Remove tags last read strictly before `expiration`
    pub(crate) fn age_out(&mut self, expiration: u64) -> usize {
        let before = self.tags.len();
        self.tags.retain(|_, tag| tag.last_read() >= expiration);
        let tags = &self.tags;
        self.exiting.retain(|_, epcs| {
            epcs.retain(|epc| tags.contains_key(epc));
            !epcs.is_empty()
        });
        before - self.tags.len()
    }

    /// Revert every EXITING tag to PRESENT, keeping its arrival time
    pub(crate) fn clear_exiting(&mut self) -> usize {
        let mut reverted = 0;
        for epcs in self.exiting.values() {
            for epc in epcs {
                if let Some(tag) = self.tags.get_mut(epc) {
                    if tag.state() == TagState::Exiting {
                        let lc = tag.lifecycle();
                        tag.set_lifecycle(lc.enter(TagState::Present, lc.last_arrived));
                        reverted += 1;
                    }
                }
            }
        }
        self.exiting.clear();
        reverted
    }
}

impl InventoryEngine {
    /// Process one read batch from one reader
    pub fn process(&self, reader: &ReaderContext, reads: &[TagRead]) -> Result<EventBatch> {
        self.process_at(reader, reads, epoch_ms())
    }

    /// Process one read batch with the wall clock fixed at `now` (epoch ms)
    pub fn process_at(
        &self,
        reader: &ReaderContext,
        reads: &[TagRead],
        now: u64,
    ) -> Result<EventBatch> {
        if reader.device_id.is_empty() {
            return Err(InventoryError::InvalidArgument("reader has no device id".to_string()));
        }

        let start = Instant::now();
        let weigher = self.resolver.weigher(now);
        let thresholds = self.thresholds();
        let history_size = self.config.waypoint_history_size();

        let mut batch = EventBatch::new(now);
        batch.gateway_id = Some(self.config.site_id().to_string());

        {
            let mut registry = self.registry.lock();
            for read in reads {
                if read.rssi < reader.min_rssi_dbm10x {
                    continue;
                }
                if read.epc.is_empty() {
                    warn!(device = %reader.device_id, "read_without_epc_skipped");
                    continue;
                }
                let applied = catch_unwind(AssertUnwindSafe(|| {
                    registry.apply_read(reader, read, &weigher, &thresholds, history_size, &mut batch)
                }));
                if applied.is_err() {
                    error!(epc = %read.epc, device = %reader.device_id, "read_processing_panicked");
                }
            }
        }

        self.metrics.record_batch(reads.len() as u64, start.elapsed().as_micros() as u64);
        self.publish(&batch);
        Ok(batch)
    }

    /// Run the exit aggregation sweep now
    pub fn aggregate_departed(&self) -> EventBatch {
        self.aggregate_departed_at(epoch_ms())
    }

    pub fn aggregate_departed_at(&self, now: u64) -> EventBatch {
        let expiration = now.saturating_sub(self.config.aggregate_departed_threshold_ms());
        let mut batch = EventBatch::new(now);
        batch.gateway_id = Some(self.config.site_id().to_string());

        self.registry.lock().sweep_exiting(expiration, now, &mut batch);

        self.publish(&batch);
        batch
    }

    /// Remove tags unread for longer than the retention horizon. No events.
    pub fn age_out_now(&self) -> usize {
        self.age_out_at(epoch_ms())
    }

    pub fn age_out_at(&self, now: u64) -> usize {
        let horizon = self.config.ageout_hours().saturating_mul(MS_PER_HOUR);
        let expiration = now.saturating_sub(horizon);
        let removed = self.registry.lock().age_out(expiration);
        self.metrics.record_aged_out(removed as u64);
        info!(removed = %removed, ageout_hours = %self.config.ageout_hours(), "inventory_ageout");
        removed
    }

    /// Revert all EXITING tags to PRESENT; called when the reader schedule changes run state
    pub fn clear_exiting(&self) -> usize {
        let reverted = self.registry.lock().clear_exiting();
        info!(reverted = %reverted, "exiting_cleared");
        reverted
    }
}
