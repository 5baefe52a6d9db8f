//! Metrics for the ring distributor.
//!
//! Each worker's [`SharedTokenRing`](crate::distributor::SharedTokenRing)
//! records into its own [`RingMetrics`]:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     RingMetrics                       │
//! │  ┌────────────────────────┐  ┌────────────────────┐  │
//! │  │  Counters              │  │  Gauges            │  │
//! │  │ - publishes            │  │ - version          │  │
//! │  │ - publishes_rejected   │  │ - fence_version    │  │
//! │  │ - phase_advances       │  │ - phase            │  │
//! │  │ - mutations / failed   │  │ - token_count      │  │
//! │  └────────────────────────┘  └────────────────────┘  │
//! └──────────────────────────────────────────────────────┘
//! ```

mod counters;
mod gauges;

pub use counters::Counter;
pub use gauges::Gauge;

/// Counters and gauges of one worker's ring distributor.
#[derive(Debug)]
pub struct RingMetrics {
    /// Snapshots published with `set`. The initial snapshot is not counted.
    pub publishes: Counter,
    /// `set` calls refused: a lower version, a ring that was already
    /// published, or different content under the current version.
    pub publishes_rejected: Counter,
    /// Barrier phases opened by version changes.
    pub phase_advances: Counter,
    /// Mutations run through the distributor.
    pub mutations: Counter,
    /// Mutations that failed in the mutator or while propagating.
    pub mutations_failed: Counter,

    /// Version of the published snapshot.
    pub version: Gauge,
    /// Fence version of this worker.
    pub fence_version: Gauge,
    /// Current barrier phase.
    pub phase: Gauge,
    /// Normal tokens in the published snapshot.
    pub token_count: Gauge,
}

impl RingMetrics {
    pub fn new() -> Self {
        Self {
            publishes: Counter::new(
                "ring_publishes_total",
                "Token ring snapshots published",
            ),
            publishes_rejected: Counter::new(
                "ring_publishes_rejected_total",
                "Token ring publishes rejected by version checks",
            ),
            phase_advances: Counter::new(
                "ring_phase_advances_total",
                "Barrier phases opened by version changes",
            ),
            mutations: Counter::new("ring_mutations_total", "Token ring mutations"),
            mutations_failed: Counter::new(
                "ring_mutations_failed_total",
                "Token ring mutations that failed",
            ),
            version: Gauge::new("ring_version", "Version of the published token ring"),
            fence_version: Gauge::new("ring_fence_version", "Fence version of this worker"),
            phase: Gauge::new("ring_barrier_phase", "Current barrier phase"),
            token_count: Gauge::new(
                "ring_token_count",
                "Normal tokens in the published token ring",
            ),
        }
    }

    /// Record a published snapshot.
    pub fn record_publish(&self, version: u64, tokens: usize, phase: u64) {
        self.publishes.inc();
        self.version.set(version);
        self.token_count.set(tokens as u64);
        self.phase.set(phase);
    }

    /// Record the outcome of a mutation.
    pub fn record_mutation(&self, success: bool) {
        self.mutations.inc();
        if !success {
            self.mutations_failed.inc();
        }
    }

    pub fn snapshot(&self) -> RingMetricsSnapshot {
        RingMetricsSnapshot {
            publishes: self.publishes.get(),
            publishes_rejected: self.publishes_rejected.get(),
            phase_advances: self.phase_advances.get(),
            mutations: self.mutations.get(),
            mutations_failed: self.mutations_failed.get(),
            version: self.version.get(),
            fence_version: self.fence_version.get(),
            phase: self.phase.get(),
            token_count: self.token_count.get(),
        }
    }

    /// Format metrics in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        macro_rules! add_metric {
            ($kind:literal, $metric:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $metric.name(),
                    $metric.help(),
                    $metric.name(),
                    $kind,
                    $metric.name(),
                    $metric.get()
                ));
            };
        }

        add_metric!("counter", self.publishes);
        add_metric!("counter", self.publishes_rejected);
        add_metric!("counter", self.phase_advances);
        add_metric!("counter", self.mutations);
        add_metric!("counter", self.mutations_failed);

        add_metric!("gauge", self.version);
        add_metric!("gauge", self.fence_version);
        add_metric!("gauge", self.phase);
        add_metric!("gauge", self.token_count);

        output
    }
}

impl Default for RingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time copy of [`RingMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RingMetricsSnapshot {
    pub publishes: u64,
    pub publishes_rejected: u64,
    pub phase_advances: u64,
    pub mutations: u64,
    pub mutations_failed: u64,
    pub version: u64,
    pub fence_version: u64,
    pub phase: u64,
    pub token_count: u64,
}

impl RingMetricsSnapshot {
    /// Fraction of mutations that failed.
    pub fn mutation_failure_rate(&self) -> f64 {
        if self.mutations == 0 {
            0.0
        } else {
            self.mutations_failed as f64 / self.mutations as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_metrics() {
        let metrics = RingMetrics::new();
        metrics.record_publish(3, 12, 1);
        metrics.record_mutation(true);
        metrics.record_mutation(false);

        let snap = metrics.snapshot();
        assert_eq!(snap.publishes, 1);
        assert_eq!(snap.version, 3);
        assert_eq!(snap.token_count, 12);
        assert_eq!(snap.phase, 1);
        assert_eq!(snap.mutations, 2);
        assert_eq!(snap.mutations_failed, 1);
        assert!((snap.mutation_failure_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = RingMetrics::new();
        metrics.fence_version.set(4);
        let output = metrics.to_prometheus();
        assert!(output.contains("# TYPE ring_publishes_total counter"));
        assert!(output.contains("ring_fence_version 4"));
    }

    #[test]
    fn test_empty_failure_rate() {
        assert_eq!(RingMetricsSnapshot::default().mutation_failure_rate(), 0.0);
    }
}
