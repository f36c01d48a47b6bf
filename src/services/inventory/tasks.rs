//! Engine lifecycle: start/stop and the periodic maintenance tasks

use super::InventoryEngine;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

impl InventoryEngine {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Restore state and spawn the maintenance tasks. Must run inside a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("inventory_engine_already_running");
            return;
        }
        self.shutdown_tx.send_replace(false);

        self.resolver.restore();
        match self.restore() {
            Ok(count) => debug!(tags = %count, "inventory_cache_loaded"),
            Err(e) => {
                self.metrics.record_persist_failure();
                error!(file = %self.cache_path().display(), error = %e, "inventory_restore_failed");
            }
        }
        self.age_out_now();

        let aggregate_period =
            Duration::from_millis((self.config.aggregate_departed_threshold_ms() / 5).max(1));
        let read_rate_period = Duration::from_secs(self.config.read_rate_interval_secs().max(1));
        let persist_period = Duration::from_secs(self.config.persist_interval_secs().max(1));
        let ageout_period = Duration::from_secs(self.config.ageout_interval_secs().max(1));

        let mut last_sample = Instant::now();
        let handles = vec![
            self.spawn_periodic("aggregate_departed", aggregate_period, |engine| {
                engine.aggregate_departed();
            }),
            self.spawn_periodic("read_rate", read_rate_period, move |engine| {
                let elapsed = last_sample.elapsed().as_secs_f64();
                last_sample = Instant::now();
                let rate = engine.metrics.sample_read_rate(elapsed);
                if rate > 0.0 {
                    info!(reads_per_sec = %format!("{rate:.1}"), "read_rate");
                }
            }),
            self.spawn_periodic("persist", persist_period, |engine| {
                if let Err(e) = engine.persist() {
                    engine.metrics.record_persist_failure();
                    error!(error = %e, "inventory_persist_failed");
                }
            }),
            self.spawn_periodic("ageout", ageout_period, |engine| {
                engine.age_out_now();
            }),
        ];
        self.tasks.lock().extend(handles);

        info!(
            site_id = %self.config.site_id(),
            tags = %self.tag_count(),
            profile = %self.resolver.active().id(),
            aggregate_ms = %aggregate_period.as_millis(),
            "inventory_engine_started"
        );
    }

    /// Signal the tasks, wait for them, then age out and persist once more
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            debug!("inventory_engine_not_running");
            return;
        }
        self.shutdown_tx.send_replace(true);

        let wait = Duration::from_millis(self.config.shutdown_timeout_ms());
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock();
            std::mem::take(&mut *tasks)
        };
        for mut handle in handles {
            if timeout(wait, &mut handle).await.is_err() {
                warn!(timeout_ms = %wait.as_millis(), "inventory_task_shutdown_timeout");
                handle.abort();
            }
        }

        self.stop_recording_stats();
        self.age_out_now();
        match self.persist() {
            Ok(count) => info!(tags = %count, "inventory_engine_stopped"),
            Err(e) => {
                self.metrics.record_persist_failure();
                error!(error = %e, "inventory_persist_failed");
            }
        }
    }

    /// Run `job` every `period` until shutdown. The task holds only a weak
    /// reference, so a dropped engine ends it too.
    fn spawn_periodic<F>(self: &Arc<Self>, name: &'static str, period: Duration, mut job: F) -> JoinHandle<()>
    where
        F: FnMut(&InventoryEngine) + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick is immediate
            ticker.tick().await;
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!(task = name, "inventory_task_stopped");
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        let Some(engine) = weak.upgrade() else { return };
                        if catch_unwind(AssertUnwindSafe(|| job(engine.as_ref()))).is_err() {
                            error!(task = name, "inventory_task_panicked");
                        }
                    }
                }
            }
        })
    }
}
