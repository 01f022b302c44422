use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::LatencySample;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// How a percentile is read from the sorted latencies.
///
/// `NearestRank` reads `sorted[floor((n - 1) * p)]` directly and is the
/// default. `Linear` interpolates between that rank and the next one.
/// The two disagree on the same data, so a run sticks to one of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PercentilePolicy {
    #[default]
    NearestRank,
    Linear,
}

impl PercentilePolicy {
    /// Percentile `p` (0.0 ..= 1.0) of an ascending, non-empty slice.
    pub fn pick(self, sorted: &[Duration], p: f64) -> Duration {
        debug_assert!(!sorted.is_empty());
        let last = sorted.len() - 1;
        let rank = last as f64 * p.clamp(0.0, 1.0);
        let lo = (rank.floor() as usize).min(last);

        match self {
            PercentilePolicy::NearestRank => sorted[lo],
            PercentilePolicy::Linear => {
                let hi = (lo + 1).min(last);
                let frac = rank - lo as f64;
                let lo_ns = sorted[lo].as_nanos() as f64;
                let hi_ns = sorted[hi].as_nanos() as f64;
                Duration::from_nanos((lo_ns + (hi_ns - lo_ns) * frac).round() as u64)
            }
        }
    }
}

/// Summary statistics for one operation label over one phase.
/// Latency figures cover successful operations only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStatistics {
    pub label: String,
    pub total_operations: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_bytes: u64,
    pub min: Duration,
    pub mean: Duration,
    pub max: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    /// Wall-clock window the throughput figures are measured over
    pub elapsed: Duration,
    /// `None` when the window is zero-length
    pub ops_per_sec: Option<f64>,
    /// Only when the payload size is known
    pub gb_per_sec: Option<f64>,
    pub policy: PercentilePolicy,
}

/// Result of summarizing a sample set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Summary {
    /// No successful operation to compute latencies from
    NoData { label: String, error_count: u64 },
    Stats(OperationStatistics),
}

impl Summary {
    pub fn label(&self) -> &str {
        match self {
            Summary::NoData { label, .. } => label,
            Summary::Stats(s) => &s.label,
        }
    }

    pub fn stats(&self) -> Option<&OperationStatistics> {
        match self {
            Summary::Stats(s) => Some(s),
            Summary::NoData { .. } => None,
        }
    }

    pub fn error_count(&self) -> u64 {
        match self {
            Summary::NoData { error_count, .. } => *error_count,
            Summary::Stats(s) => s.error_count,
        }
    }

    pub fn has_data(&self) -> bool {
        matches!(self, Summary::Stats(_))
    }
}

/// Summarize `samples` with the nearest-rank policy, measuring throughput
/// over the window from the earliest start to the latest finish.
pub fn summarize(
    samples: &[LatencySample],
    label: &str,
    payload_size: Option<u64>,
) -> Summary {
    let elapsed = observed_window(samples).unwrap_or_default();
    summarize_over(
        samples,
        label,
        payload_size,
        elapsed,
        PercentilePolicy::NearestRank,
    )
}

/// Summarize `samples` over an externally measured wall-clock window.
/// The input is left untouched; sorting happens on a copy.
pub fn summarize_over(
    samples: &[LatencySample],
    label: &str,
    payload_size: Option<u64>,
    elapsed: Duration,
    policy: PercentilePolicy,
) -> Summary {
    let total_operations = samples.len() as u64;

    let mut sorted: Vec<Duration> = samples
        .iter()
        .filter(|s| s.is_success())
        .map(|s| s.latency)
        .collect();
    let success_count = sorted.len() as u64;
    let error_count = total_operations - success_count;

    if sorted.is_empty() {
        return Summary::NoData {
            label: label.to_owned(),
            error_count,
        };
    }

    sorted.sort_unstable();

    let total_latency: Duration = sorted.iter().sum();
    let mean = total_latency / sorted.len() as u32;

    let total_bytes: u64 = samples
        .iter()
        .filter(|s| s.is_success())
        .filter_map(|s| s.bytes)
        .sum();

    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (secs > 0.0).then(|| success_count as f64 / secs);
    let gb_per_sec = match payload_size {
        Some(size) if size > 0 && secs > 0.0 => {
            Some(size as f64 * success_count as f64 / secs / GIB)
        }
        _ => None,
    };

    Summary::Stats(OperationStatistics {
        label: label.to_owned(),
        total_operations,
        success_count,
        error_count,
        total_bytes,
        min: sorted[0],
        mean,
        max: sorted[sorted.len() - 1],
        p90: policy.pick(&sorted, 0.90),
        p95: policy.pick(&sorted, 0.95),
        p99: policy.pick(&sorted, 0.99),
        elapsed,
        ops_per_sec,
        gb_per_sec,
        policy,
    })
}

/// Earliest start to latest finish across all samples, failed ones included.
fn observed_window(samples: &[LatencySample]) -> Option<Duration> {
    let first: Instant = samples.iter().map(|s| s.started).min()?;
    let last: Instant = samples.iter().map(LatencySample::finished).max()?;
    Some(last.saturating_duration_since(first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::OpKind;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn samples(latencies_ms: &[u64]) -> Vec<LatencySample> {
        let t0 = Instant::now();
        latencies_ms
            .iter()
            .map(|&l| LatencySample::new(OpKind::Put, t0, t0 + ms(l), Some(1024), None))
            .collect()
    }

    #[test]
    fn five_sample_scenario() {
        let set = samples(&[10, 20, 30, 40, 50]);
        let summary =
            summarize_over(&set, "Write", None, ms(100), PercentilePolicy::NearestRank);
        let stats = summary.stats().expect("has data");

        assert_eq!(stats.min, ms(10));
        assert_eq!(stats.mean, ms(30));
        assert_eq!(stats.max, ms(50));
        // floor(4 * 0.9) = 3
        assert_eq!(stats.p90, ms(40));
        assert_eq!(stats.p95, ms(40));
        assert_eq!(stats.p99, ms(40));
        assert!((stats.ops_per_sec.unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(stats.gb_per_sec, None);
        assert_eq!(stats.total_bytes, 5 * 1024);
    }

    #[test]
    fn linear_policy_interpolates() {
        let set = samples(&[10, 20, 30, 40, 50]);
        let summary = summarize_over(&set, "Write", None, ms(100), PercentilePolicy::Linear);
        let stats = summary.stats().unwrap();
        // rank 3.6 → 40 + 0.6 * 10
        assert_eq!(stats.p90, ms(46));
        assert_eq!(stats.policy, PercentilePolicy::Linear);
    }

    #[test]
    fn empty_input_is_no_data() {
        let summary = summarize(&[], "Read", Some(1024));
        assert_eq!(
            summary,
            Summary::NoData {
                label: "Read".into(),
                error_count: 0
            }
        );
        assert!(!summary.has_data());
    }

    #[test]
    fn only_failures_is_no_data_with_error_count() {
        let t0 = Instant::now();
        let set = vec![
            LatencySample::new(OpKind::Get, t0, t0 + ms(3), None, Some("boom".into())),
            LatencySample::new(OpKind::Get, t0, t0 + ms(4), None, Some("boom".into())),
        ];
        let summary = summarize(&set, "Read", None);
        assert_eq!(summary.error_count(), 2);
        assert!(summary.stats().is_none());
    }

    #[test]
    fn zero_window_has_no_throughput() {
        let t0 = Instant::now();
        let set = vec![LatencySample::new(OpKind::Get, t0, t0, Some(1), None)];
        let stats = summarize(&set, "Read", Some(1)).stats().cloned().unwrap();
        assert_eq!(stats.ops_per_sec, None);
        assert_eq!(stats.gb_per_sec, None);
    }

    #[test]
    fn gb_per_sec_uses_payload_size() {
        let set = samples(&[100, 100]);
        let stats = summarize_over(&set, "Write", Some(1 << 30), ms(1000), Default::default())
            .stats()
            .cloned()
            .unwrap();
        assert!((stats.gb_per_sec.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn window_derived_from_samples() {
        let t0 = Instant::now();
        let set = vec![
            LatencySample::new(OpKind::Put, t0, t0 + ms(40), None, None),
            LatencySample::new(OpKind::Put, t0 + ms(60), t0 + ms(100), None, None),
        ];
        let stats = summarize(&set, "Write", None).stats().cloned().unwrap();
        assert_eq!(stats.elapsed, ms(100));
        assert!((stats.ops_per_sec.unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn single_sample_all_percentiles_equal() {
        let set = samples(&[7]);
        let stats = summarize(&set, "Write", None).stats().cloned().unwrap();
        assert_eq!(stats.min, ms(7));
        assert_eq!(stats.p90, ms(7));
        assert_eq!(stats.p99, ms(7));
        assert_eq!(stats.mean, ms(7));
    }
}
