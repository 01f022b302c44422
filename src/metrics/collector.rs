use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use super::system::SystemGauges;
use super::{LatencySample, OpKind};

// ─── Configuration ───────────────────────────────────────────────

/// How many individual operation records we keep for the live feed
const MAX_RECENT_SAMPLES: usize = 200;

/// Aggregate timeline resolution (one point per window)
const TIMELINE_WINDOW_MS: u64 = 500;

/// HdrHistogram range: 1 μs → 10 min, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 600_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe metrics engine shared by every worker of a phase.
/// Workers call `record()`, the reporting path calls `snapshot()`.
///
/// All state sits behind one lock so related counters (bytes vs.
/// latency totals) are always read together.
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

/// Running totals for one operation kind. Latency fields cover
/// successful operations only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OpAggregate {
    pub count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_bytes: u64,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
    pub total_latency: Duration,
}

impl OpAggregate {
    fn add(&mut self, sample: &LatencySample) {
        self.count += 1;
        if !sample.is_success() {
            self.error_count += 1;
            return;
        }

        self.success_count += 1;
        self.total_bytes += sample.bytes.unwrap_or(0);
        self.total_latency += sample.latency;
        self.min = Some(self.min.map_or(sample.latency, |m| m.min(sample.latency)));
        self.max = Some(self.max.map_or(sample.latency, |m| m.max(sample.latency)));
    }

    /// Mean latency of the successful operations so far.
    pub fn mean(&self) -> Option<Duration> {
        (self.success_count > 0)
            .then(|| self.total_latency / self.success_count as u32)
    }
}

/// A single entry in the live operation feed.
#[derive(Debug, Clone, Serialize)]
pub struct SampleRecord {
    pub timestamp_ms: u64,
    pub kind: OpKind,
    pub latency_us: u64,
    pub bytes: Option<u64>,
    pub success: bool,
}

/// One aggregated point on the timeline (per 500 ms window).
#[derive(Debug, Clone, Serialize)]
pub struct TimelinePoint {
    pub timestamp_ms: u64,
    pub avg_latency_us: f64,
    pub count: u64,
}

/// A bucket in the latency distribution histogram.
#[derive(Debug, Clone, Serialize)]
pub struct DistBucket {
    pub range_start_us: u64,
    pub range_end_us: u64,
    pub count: u64,
}

/// Consistent point-in-time copy of the collector state.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorSnapshot {
    pub per_kind: BTreeMap<OpKind, OpAggregate>,

    // Counters across all kinds
    pub total_operations: u64,
    pub total_errors: u64,
    pub total_bytes: u64,
    pub sample_count: usize,
    pub ops_per_sec: f64,
    pub elapsed_secs: f64,

    /// Label of the phase currently feeding the collector
    pub phase: Option<String>,

    pub gauges: Option<SystemGauges>,

    // Visual data
    pub recent_samples: Vec<SampleRecord>,
    pub timeline: Vec<TimelinePoint>,
    pub distribution: Vec<DistBucket>,
}

impl CollectorSnapshot {
    pub fn aggregate(&self, kind: OpKind) -> Option<&OpAggregate> {
        self.per_kind.get(&kind)
    }
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    // Ordered samples of the current phase
    samples: Vec<LatencySample>,

    per_kind: BTreeMap<OpKind, OpAggregate>,

    // Successful latencies for the distribution chart
    latency_hist: Histogram<u64>,

    // Rolling window of recent individual operations
    recent_samples: VecDeque<SampleRecord>,

    // Timeline aggregation
    timeline: Vec<TimelinePoint>,
    current_window: Option<WindowAccumulator>,

    // Latest system gauges pushed by the sampler
    gauges: Option<SystemGauges>,

    // Fixed on the first record of a phase, never moved afterwards
    start_time: Option<Instant>,
    // Latest feed timestamp; keeps the feed and timeline monotonic
    last_ms: u64,

    phase: Option<String>,
}

/// Running totals for the current 500 ms timeline window.
struct WindowAccumulator {
    window_start_ms: u64,
    latency_sum: u64,
    count: u64,
}

impl WindowAccumulator {
    fn point(&self) -> TimelinePoint {
        TimelinePoint {
            timestamp_ms: self.window_start_ms,
            avg_latency_us: self.latency_sum as f64 / self.count as f64,
            count: self.count,
        }
    }
}

// ─── MetricsCollector impl ───────────────────────────────────────

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Record one completed operation. `error` is `Some` when it failed;
    /// the latency is kept either way.
    pub fn record(
        &self,
        kind: OpKind,
        started: Instant,
        finished: Instant,
        bytes: Option<u64>,
        error: Option<String>,
    ) {
        self.record_sample(LatencySample::new(kind, started, finished, bytes, error));
    }

    pub fn record_sample(&self, sample: LatencySample) {
        self.inner.lock().record(sample);
    }

    /// Latest system gauges, replacing the previous reading.
    pub fn update_gauges(&self, gauges: SystemGauges) {
        self.inner.lock().gauges = Some(gauges);
    }

    /// Phase boundary: hand back every sample recorded so far and start
    /// the next phase from empty aggregates. Gauges are carried over.
    pub fn take_samples(&self) -> Vec<LatencySample> {
        let mut inner = self.inner.lock();
        let gauges = inner.gauges.take();
        let old = std::mem::replace(&mut *inner, Inner::new());
        inner.gauges = gauges;
        old.samples
    }

    /// Tag what is recorded from now on with `label` in snapshots.
    /// Cleared again by the next `take_samples`.
    pub fn begin_phase(&self, label: &str) {
        self.inner.lock().phase = Some(label.to_owned());
    }

    /// Wipe all data, gauges included.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::new();
    }

    pub fn snapshot(&self) -> CollectorSnapshot {
        self.inner.lock().snapshot()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn new() -> Self {
        Self {
            samples: Vec::new(),
            per_kind: BTreeMap::new(),
            latency_hist: Histogram::<u64>::new_with_bounds(
                HIST_LOW, HIST_HIGH, HIST_SIGFIG,
            )
            .expect("histogram creation"),
            recent_samples: VecDeque::with_capacity(MAX_RECENT_SAMPLES + 1),
            timeline: Vec::with_capacity(1024),
            current_window: None,
            gauges: None,
            start_time: None,
            last_ms: 0,
            phase: None,
        }
    }

    fn record(&mut self, sample: LatencySample) {
        let start = *self.start_time.get_or_insert(sample.started);
        // A sample recorded after a later-finishing one lands at the
        // current position rather than rewinding the timeline
        let elapsed_ms = (sample.finished().saturating_duration_since(start).as_millis() as u64)
            .max(self.last_ms);
        self.last_ms = elapsed_ms;
        let latency_us = (sample.latency.as_micros() as u64).max(1);

        self.per_kind.entry(sample.kind).or_default().add(&sample);

        if sample.is_success() {
            self.latency_hist.saturating_record(latency_us);
            self.push_to_timeline(elapsed_ms, latency_us);
        }

        // ── Live operation feed ─────────────────────────────────
        self.recent_samples.push_back(SampleRecord {
            timestamp_ms: elapsed_ms,
            kind: sample.kind,
            latency_us,
            bytes: sample.bytes,
            success: sample.is_success(),
        });
        if self.recent_samples.len() > MAX_RECENT_SAMPLES {
            self.recent_samples.pop_front();
        }

        self.samples.push(sample);
    }

    /// Bucket the sample into the current 500 ms window, or roll over.
    fn push_to_timeline(&mut self, elapsed_ms: u64, latency_us: u64) {
        let window_start = (elapsed_ms / TIMELINE_WINDOW_MS) * TIMELINE_WINDOW_MS;

        match &mut self.current_window {
            // Same window, accumulate
            Some(w) if w.window_start_ms == window_start => {
                w.latency_sum += latency_us;
                w.count += 1;
            }
            // New window: finalize the old one
            _ => {
                if let Some(old) = self.current_window.take() {
                    self.timeline.push(old.point());
                }
                self.current_window = Some(WindowAccumulator {
                    window_start_ms: window_start,
                    latency_sum: latency_us,
                    count: 1,
                });
            }
        }
    }

    fn snapshot(&self) -> CollectorSnapshot {
        let elapsed_secs = self
            .start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let mut total_operations = 0;
        let mut total_errors = 0;
        let mut total_bytes = 0;
        let mut total_success = 0;
        for agg in self.per_kind.values() {
            total_operations += agg.count;
            total_errors += agg.error_count;
            total_bytes += agg.total_bytes;
            total_success += agg.success_count;
        }

        let ops_per_sec = if elapsed_secs > 0.0 {
            total_success as f64 / elapsed_secs
        } else {
            0.0
        };

        // Include the current (partial) window in the timeline
        let mut timeline = self.timeline.clone();
        if let Some(w) = &self.current_window {
            timeline.push(w.point());
        }

        CollectorSnapshot {
            per_kind: self.per_kind.clone(),
            total_operations,
            total_errors,
            total_bytes,
            sample_count: self.samples.len(),
            ops_per_sec,
            elapsed_secs,
            phase: self.phase.clone(),
            gauges: self.gauges.clone(),
            recent_samples: self.recent_samples.iter().cloned().collect(),
            timeline,
            distribution: Self::compute_distribution(&self.latency_hist),
        }
    }

    // ── Distribution histogram for the bar chart ────────────────

    /// Pre-defined bucket boundaries (μs). Covers round trips to a
    /// remote object store, from sub-millisecond to multi-second.
    const DIST_BOUNDARIES: &'static [u64] = &[
        500, 1_000, 2_500, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000,
        500_000, 1_000_000, 2_500_000, 5_000_000, 10_000_000, 60_000_000,
    ];

    fn compute_distribution(hist: &Histogram<u64>) -> Vec<DistBucket> {
        if hist.len() == 0 {
            return Vec::new();
        }

        let bounds = Self::DIST_BOUNDARIES;
        let mut counts = vec![0u64; bounds.len() + 1]; // +1 for overflow

        for iv in hist.iter_recorded() {
            let val = iv.value_iterated_to();
            // first boundary >= val, clamped to the overflow bucket
            let idx = match bounds.binary_search(&val) {
                Ok(i) | Err(i) => i,
            };
            counts[idx.min(bounds.len())] += iv.count_at_value();
        }

        let mut result = Vec::with_capacity(counts.len());
        let mut prev = 0u64;
        for (i, &boundary) in bounds.iter().enumerate() {
            if counts[i] > 0 {
                result.push(DistBucket {
                    range_start_us: prev,
                    range_end_us: boundary,
                    count: counts[i],
                });
            }
            prev = boundary;
        }
        if counts[bounds.len()] > 0 {
            result.push(DistBucket {
                range_start_us: prev,
                range_end_us: hist.max(),
                count: counts[bounds.len()],
            });
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn aggregates_track_min_max_and_errors() {
        let c = MetricsCollector::new();
        let t0 = Instant::now();
        c.record(OpKind::Put, t0, t0 + ms(20), Some(100), None);
        c.record(OpKind::Put, t0, t0 + ms(5), Some(100), None);
        c.record(OpKind::Put, t0, t0 + ms(90), Some(100), Some("timeout".into()));
        c.record(OpKind::Get, t0, t0 + ms(7), Some(100), None);

        let snap = c.snapshot();
        let put = snap.aggregate(OpKind::Put).unwrap();
        assert_eq!(put.count, 3);
        assert_eq!(put.success_count, 2);
        assert_eq!(put.error_count, 1);
        assert_eq!(put.total_bytes, 200);
        assert_eq!(put.min, Some(ms(5)));
        assert_eq!(put.max, Some(ms(20)));
        assert_eq!(put.mean(), Some(Duration::from_micros(12_500)));

        assert_eq!(snap.total_operations, 4);
        assert_eq!(snap.total_errors, 1);
        assert_eq!(snap.sample_count, 4);
        assert!(snap.aggregate(OpKind::List).is_none());
    }

    #[test]
    fn take_samples_drains_and_resets() {
        let c = MetricsCollector::new();
        let t0 = Instant::now();
        c.update_gauges(SystemGauges::default());
        c.record(OpKind::Delete, t0, t0 + ms(1), None, None);
        c.record(OpKind::Delete, t0, t0 + ms(2), None, None);

        let taken = c.take_samples();
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].latency, ms(1));

        let snap = c.snapshot();
        assert_eq!(snap.sample_count, 0);
        assert_eq!(snap.total_operations, 0);
        assert!(snap.per_kind.is_empty());
        assert!(snap.gauges.is_some());
        assert!(c.take_samples().is_empty());
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let c = Arc::new(MetricsCollector::new());
        let handles: Vec<_> = (0..100)
            .map(|i| {
                let c = c.clone();
                std::thread::spawn(move || {
                    let t0 = Instant::now();
                    c.record(OpKind::Put, t0, t0 + ms(i % 7 + 1), Some(1), None);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = c.snapshot();
        assert_eq!(snap.sample_count, 100);
        assert_eq!(snap.total_operations, 100);
        assert_eq!(snap.total_bytes, 100);
    }

    #[test]
    fn distribution_buckets_successes() {
        let c = MetricsCollector::new();
        let t0 = Instant::now();
        c.record(OpKind::Get, t0, t0 + Duration::from_micros(300), None, None);
        c.record(OpKind::Get, t0, t0 + ms(3), None, None);
        c.record(OpKind::Get, t0, t0 + ms(4), None, None);
        c.record(OpKind::Get, t0, t0 + ms(4), None, Some("nope".into()));

        let dist = c.snapshot().distribution;
        let total: u64 = dist.iter().map(|b| b.count).sum();
        assert_eq!(total, 3);
        assert_eq!(dist[0].range_end_us, 500);
        assert_eq!(dist[0].count, 1);
    }

    #[test]
    fn timeline_never_rewinds_when_records_arrive_out_of_order() {
        let c = MetricsCollector::new();
        let t0 = Instant::now();
        // slow op started later but is recorded first
        c.record(OpKind::Put, t0 + ms(100), t0 + ms(700), None, None);
        c.record(OpKind::Put, t0, t0 + ms(200), None, None);
        c.record(OpKind::Put, t0 + ms(650), t0 + ms(1_200), None, None);

        let snap = c.snapshot();
        let windows: Vec<u64> = snap.timeline.iter().map(|p| p.timestamp_ms).collect();
        assert!(windows.windows(2).all(|w| w[0] < w[1]), "timeline {windows:?}");
        assert_eq!(snap.timeline[0].count, 2);

        let feed: Vec<u64> = snap.recent_samples.iter().map(|r| r.timestamp_ms).collect();
        assert!(feed.windows(2).all(|w| w[0] <= w[1]), "feed {feed:?}");
        assert_eq!(feed, vec![600, 600, 1_100]);
    }

    #[test]
    fn phase_label_lives_until_the_boundary() {
        let c = MetricsCollector::new();
        assert_eq!(c.snapshot().phase, None);
        c.begin_phase("Write (Size: 1 bytes)");
        assert_eq!(c.snapshot().phase.as_deref(), Some("Write (Size: 1 bytes)"));
        c.take_samples();
        assert_eq!(c.snapshot().phase, None);
    }

    #[test]
    fn reset_clears_everything() {
        let c = MetricsCollector::new();
        let t0 = Instant::now();
        c.update_gauges(SystemGauges::default());
        c.record(OpKind::List, t0, t0 + ms(1), None, None);
        c.reset();
        let snap = c.snapshot();
        assert_eq!(snap.sample_count, 0);
        assert!(snap.gauges.is_none());
        assert!(snap.timeline.is_empty());
    }
}
