use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Summary, SystemGauges};
use crate::phase_runner::{OpFailure, PhaseOutcome, PhaseSpec};

/// Everything known about one finished phase, ready to print or persist.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub label: String,
    pub phase: PhaseSpec,
    pub summary: Summary,
    pub failures: Vec<OpFailure>,
    pub cancelled: u64,
    pub gauges: Option<SystemGauges>,
    pub finished_at: DateTime<Utc>,
}

impl PhaseReport {
    pub fn new(phase: PhaseSpec, outcome: PhaseOutcome, gauges: Option<SystemGauges>) -> Self {
        Self {
            label: phase.label.clone(),
            phase,
            summary: outcome.summary,
            failures: outcome.failures,
            cancelled: outcome.cancelled,
            gauges,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(&self) -> bool {
        !self.failures.is_empty()
    }

    /// File name the report is persisted under, e.g. `metrics_put_1mb.json`.
    pub fn file_name(&self) -> String {
        format!("metrics_{}.json", slug(&self.label))
    }

    /// Write the report as pretty JSON into `dir`, creating it if needed.
    pub fn persist(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

impl fmt::Display for PhaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_summary(&self.summary, self.phase.payload_size()))?;
        if self.cancelled > 0 {
            writeln!(f, "{} operations cancelled at deadline", self.cancelled)?;
        }
        if let Some(g) = &self.gauges {
            writeln!(
                f,
                "System: cpu={:.1}% mem={:.1}% net={:.2} MB/s",
                g.cpu_usage_pct, g.memory_used_pct, g.network_mb_per_sec
            )?;
            if let (Some(conns), Some(retrans)) = (g.tcp_active_connections, g.tcp_retransmits) {
                writeln!(f, "TCP: {conns} established, {retrans} retransmits")?;
            }
        }
        Ok(())
    }
}

/// Render the fixed-order statistics block for one summary.
pub fn render_summary(summary: &Summary, payload_size: Option<u64>) -> String {
    let mut out = String::new();

    let stats = match summary {
        Summary::NoData { label, error_count } => {
            let _ = writeln!(out, "\nNo valid latencies for {label}");
            if *error_count > 0 {
                let _ = writeln!(out, "{error_count} operations failed");
            }
            return out;
        }
        Summary::Stats(s) => s,
    };

    let _ = writeln!(out, "\n{} Metrics:", stats.label);
    let _ = writeln!(out, "Min Latency: {:.2} ms", as_ms(stats.min));
    let _ = writeln!(out, "Average Latency: {:.2} ms", as_ms(stats.mean));
    let _ = writeln!(out, "P90 Latency: {:.2} ms", as_ms(stats.p90));
    let _ = writeln!(out, "P95 Latency: {:.2} ms", as_ms(stats.p95));
    let _ = writeln!(out, "P99 Latency: {:.2} ms", as_ms(stats.p99));
    match stats.ops_per_sec {
        Some(v) => {
            let _ = writeln!(out, "Throughput: {v:.2} ops/sec");
        }
        None => {
            let _ = writeln!(out, "Throughput: n/a ops/sec");
        }
    }
    if payload_size.is_some_and(|s| s > 0) {
        match stats.gb_per_sec {
            Some(v) => {
                let _ = writeln!(out, "Throughput: {v:.6} GB/sec");
            }
            None => {
                let _ = writeln!(out, "Throughput: n/a GB/sec");
            }
        }
    }
    if stats.error_count > 0 {
        let _ = writeln!(out, "{} operations failed", stats.error_count);
    }

    out
}

fn as_ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1e6
}

fn slug(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{summarize_over, LatencySample, OpKind, PercentilePolicy};
    use std::time::Instant;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn block_has_fixed_field_order() {
        let t0 = Instant::now();
        let set: Vec<_> = [10, 20, 30, 40, 50]
            .iter()
            .map(|&l| LatencySample::new(OpKind::Put, t0, t0 + ms(l), Some(1024), None))
            .chain(std::iter::once(LatencySample::new(
                OpKind::Put,
                t0,
                t0 + ms(1),
                Some(1024),
                Some("denied".into()),
            )))
            .collect();
        let summary = summarize_over(
            &set,
            "Write (Size: 1024 bytes)",
            Some(1024),
            ms(100),
            PercentilePolicy::NearestRank,
        );
        let text = render_summary(&summary, Some(1024));

        let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines[0], "Write (Size: 1024 bytes) Metrics:");
        assert_eq!(lines[1], "Min Latency: 10.00 ms");
        assert_eq!(lines[2], "Average Latency: 30.00 ms");
        assert_eq!(lines[3], "P90 Latency: 40.00 ms");
        assert_eq!(lines[4], "P95 Latency: 40.00 ms");
        assert_eq!(lines[5], "P99 Latency: 40.00 ms");
        assert_eq!(lines[6], "Throughput: 50.00 ops/sec");
        assert!(lines[7].starts_with("Throughput: ") && lines[7].ends_with(" GB/sec"));
        assert_eq!(lines[8], "1 operations failed");
    }

    #[test]
    fn no_data_never_prints_numbers() {
        let summary = Summary::NoData {
            label: "Read".into(),
            error_count: 3,
        };
        let text = render_summary(&summary, Some(10));
        assert!(text.contains("No valid latencies for Read"));
        assert!(text.contains("3 operations failed"));
        assert!(!text.contains("NaN"));
        assert!(!text.contains("ms"));
    }

    #[test]
    fn slug_is_file_safe() {
        assert_eq!(slug("Write (Size: 1024 bytes)"), "write_size_1024_bytes");
        assert_eq!(slug("PUT 1MB"), "put_1mb");
    }
}
