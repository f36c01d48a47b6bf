//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid contending with the
//! registry lock. Reporting swaps the periodic counters to get a snapshot.
//!
//! NOTE: All atomics use Relaxed ordering intentionally - these are statistical
//! counters only. Do NOT use these atomics for lifecycle decisions.

use crate::domain::event::{EventBatch, TagEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

const EVENT_KINDS: [TagEvent; 4] =
    [TagEvent::Arrival, TagEvent::Moved, TagEvent::Departed, TagEvent::Returned];

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

#[inline]
fn event_index(event: TagEvent) -> usize {
    match event {
        TagEvent::Arrival => 0,
        TagEvent::Moved => 1,
        TagEvent::Departed => 2,
        TagEvent::Returned => 3,
    }
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Total reads ever processed (monotonic)
    reads_total: AtomicU64,
    /// Reads since the last read-rate sample (swapped by the sampler)
    reads_since_sample: AtomicU64,
    /// Current read rate, f64 bits
    reads_per_sec: AtomicU64,
    /// Read batches processed (monotonic)
    batches_total: AtomicU64,
    /// Batches since last report (reset on report)
    batches_since_report: AtomicU64,
    /// Sum of batch latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max batch latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Batch processing latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Emitted events per kind (monotonic)
    events_total: [AtomicU64; 4],
    /// Listener invocations that panicked (monotonic)
    listener_failures: AtomicU64,
    /// Cache or snapshot writes that failed (monotonic)
    persist_failures: AtomicU64,
    /// Tags removed by age-out (monotonic)
    aged_out_total: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            reads_total: AtomicU64::new(0),
            reads_since_sample: AtomicU64::new(0),
            reads_per_sec: AtomicU64::new(0f64.to_bits()),
            batches_total: AtomicU64::new(0),
            batches_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            events_total: std::array::from_fn(|_| AtomicU64::new(0)),
            listener_failures: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            aged_out_total: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record one processed read batch (lock-free)
    #[inline]
    pub fn record_batch(&self, reads: u64, latency_us: u64) {
        self.reads_total.fetch_add(reads, Ordering::Relaxed);
        self.reads_since_sample.fetch_add(reads, Ordering::Relaxed);
        self.batches_total.fetch_add(1, Ordering::Relaxed);
        self.batches_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    /// Count every item of a batch about to be published
    pub fn record_events(&self, batch: &EventBatch) {
        for item in &batch.data {
            self.events_total[event_index(item.event_type)].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Swap the cumulative read counter into the rate gauge
    pub fn sample_read_rate(&self, elapsed_secs: f64) -> f64 {
        let reads = self.reads_since_sample.swap(0, Ordering::Relaxed);
        let rate = if elapsed_secs > 0.0 { reads as f64 / elapsed_secs } else { 0.0 };
        self.reads_per_sec.store(rate.to_bits(), Ordering::Relaxed);
        rate
    }

    #[inline]
    pub fn reads_per_sec(&self) -> f64 {
        f64::from_bits(self.reads_per_sec.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn reads_total(&self) -> u64 {
        self.reads_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn batches_total(&self) -> u64 {
        self.batches_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn events_total(&self, event: TagEvent) -> u64 {
        self.events_total[event_index(event)].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_listener_failure(&self) {
        self.listener_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn listener_failures(&self) -> u64 {
        self.listener_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_aged_out(&self, count: u64) {
        self.aged_out_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn aged_out_total(&self) -> u64 {
        self.aged_out_total.load(Ordering::Relaxed)
    }

    /// Build a summary and reset the periodic counters
    pub fn report(&self, tag_count: usize, exiting_count: usize) -> MetricsSummary {
        let batches = self.batches_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let batches_per_sec = if elapsed.as_secs_f64() > 0.0 {
            batches as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let mut events_total = [0u64; 4];
        for (i, kind) in EVENT_KINDS.iter().enumerate() {
            events_total[i] = self.events_total(*kind);
        }

        MetricsSummary {
            reads_total: self.reads_total(),
            reads_per_sec: self.reads_per_sec(),
            batches_total: self.batches_total(),
            batches_per_sec,
            avg_batch_latency_us: if batches > 0 { latency_sum / batches } else { 0 },
            max_batch_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            events_total,
            listener_failures: self.listener_failures(),
            persist_failures: self.persist_failures(),
            aged_out_total: self.aged_out_total(),
            tag_count,
            exiting_count,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub reads_total: u64,
    pub reads_per_sec: f64,
    pub batches_total: u64,
    pub batches_per_sec: f64,
    pub avg_batch_latency_us: u64,
    pub max_batch_latency_us: u64,
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    /// arrival, moved, departed, returned
    pub events_total: [u64; 4],
    pub listener_failures: u64,
    pub persist_failures: u64,
    pub aged_out_total: u64,
    pub tag_count: usize,
    pub exiting_count: usize,
}

impl MetricsSummary {
    pub fn event_count(&self, event: TagEvent) -> u64 {
        self.events_total[event_index(event)]
    }

    pub fn log(&self) {
        info!(
            reads_total = %self.reads_total,
            reads_per_sec = format!("{:.1}", self.reads_per_sec),
            batches_per_sec = format!("{:.1}", self.batches_per_sec),
            avg_latency_us = %self.avg_batch_latency_us,
            max_latency_us = %self.max_batch_latency_us,
            p99_us = %self.lat_p99_us,
            arrivals = %self.event_count(TagEvent::Arrival),
            moves = %self.event_count(TagEvent::Moved),
            departures = %self.event_count(TagEvent::Departed),
            returns = %self.event_count(TagEvent::Returned),
            tags = %self.tag_count,
            exiting = %self.exiting_count,
            "metrics"
        );
    }
}
