//! Metrics collection for tagplay.
//!
//! Process-wide counters for the data engine. Stores, sweeps and games
//! record into the global instance; the server logs a snapshot on shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global metrics instance.
static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get the global metrics instance.
pub fn get_metrics() -> &'static Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new()))
}

/// Engine metrics collector.
#[derive(Debug)]
pub struct Metrics {
    // === Store Metrics ===
    /// Images added to a live store
    pub images_added: AtomicU64,
    /// Images moved into quarantine
    pub images_quarantined: AtomicU64,
    /// Images restored from quarantine
    pub images_restored: AtomicU64,
    /// Malformed rows skipped while loading
    pub rows_skipped: AtomicU64,
    /// Full file rewrites
    pub checkpoints_total: AtomicU64,

    // === Liveness Metrics ===
    /// URL probes issued
    pub probes_total: AtomicU64,
    /// Probes that judged a URL dead
    pub probe_failures: AtomicU64,
    /// Total probe time in microseconds
    pub probe_time_us_total: AtomicU64,

    // === Game Metrics ===
    /// Votes recorded during rounds
    pub votes_recorded: AtomicU64,
    /// Rounds settled
    pub rounds_settled: AtomicU64,

    // === Import Metrics ===
    /// Bulk import lines processed
    pub imports_processed: AtomicU64,
}

impl Metrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            images_added: AtomicU64::new(0),
            images_quarantined: AtomicU64::new(0),
            images_restored: AtomicU64::new(0),
            rows_skipped: AtomicU64::new(0),
            checkpoints_total: AtomicU64::new(0),

            probes_total: AtomicU64::new(0),
            probe_failures: AtomicU64::new(0),
            probe_time_us_total: AtomicU64::new(0),

            votes_recorded: AtomicU64::new(0),
            rounds_settled: AtomicU64::new(0),

            imports_processed: AtomicU64::new(0),
        }
    }

    /// Record a new live image.
    pub fn record_image_added(&self) {
        self.images_added.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an image moved into quarantine.
    pub fn record_quarantine(&self) {
        self.images_quarantined.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an image restored from quarantine.
    pub fn record_restore(&self) {
        self.images_restored.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a malformed row skipped during load.
    pub fn record_skipped_row(&self) {
        self.rows_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a full rewrite of a store file.
    pub fn record_checkpoint(&self) {
        self.checkpoints_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one liveness probe.
    pub fn record_probe(&self, duration: Duration, valid: bool) {
        self.probes_total.fetch_add(1, Ordering::Relaxed);
        self.probe_time_us_total
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if !valid {
            self.probe_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record `count` votes.
    pub fn record_votes(&self, count: u64) {
        self.votes_recorded.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a settled round.
    pub fn record_round_settled(&self) {
        self.rounds_settled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a processed import line.
    pub fn record_import(&self) {
        self.imports_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            images_added: self.images_added.load(Ordering::Relaxed),
            images_quarantined: self.images_quarantined.load(Ordering::Relaxed),
            images_restored: self.images_restored.load(Ordering::Relaxed),
            rows_skipped: self.rows_skipped.load(Ordering::Relaxed),
            checkpoints_total: self.checkpoints_total.load(Ordering::Relaxed),

            probes_total: self.probes_total.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            probe_failure_rate: self.probe_failure_rate(),
            probe_avg_time_us: self.average_probe_time_us(),

            votes_recorded: self.votes_recorded.load(Ordering::Relaxed),
            rounds_settled: self.rounds_settled.load(Ordering::Relaxed),

            imports_processed: self.imports_processed.load(Ordering::Relaxed),
        }
    }

    /// Calculate average probe time.
    fn average_probe_time_us(&self) -> u64 {
        let total = self.probe_time_us_total.load(Ordering::Relaxed);
        let count = self.probes_total.load(Ordering::Relaxed);
        if count > 0 { total / count } else { 0 }
    }

    /// Share of probes that judged a URL dead.
    fn probe_failure_rate(&self) -> f64 {
        let failures = self.probe_failures.load(Ordering::Relaxed);
        let total = self.probes_total.load(Ordering::Relaxed);
        if total > 0 {
            failures as f64 / total as f64
        } else {
            0.0
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    // Stores
    pub images_added: u64,
    pub images_quarantined: u64,
    pub images_restored: u64,
    pub rows_skipped: u64,
    pub checkpoints_total: u64,

    // Liveness
    pub probes_total: u64,
    pub probe_failures: u64,
    pub probe_failure_rate: f64,
    pub probe_avg_time_us: u64,

    // Games
    pub votes_recorded: u64,
    pub rounds_settled: u64,

    // Import
    pub imports_processed: u64,
}

/// Timer guard for measuring operation duration.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
