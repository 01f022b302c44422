use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::BenchError;
use crate::metrics::PercentilePolicy;
use crate::phase_runner::{PhaseOp, PhaseSpec};

const KB: u64 = 1024;
const MB: u64 = 1024 * 1024;

// ─── Command line ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process store, no network
    Memory,
    /// One directory per bucket under --fs-root
    Fs,
    /// Redis at --redis-url
    Redis,
}

#[derive(Debug, Parser)]
#[command(
    name = "objstore-bench",
    about = "Latency and throughput benchmark for object storage backends"
)]
pub struct Args {
    /// Storage backend to drive
    #[arg(long, value_enum, default_value_t = Backend::Memory)]
    pub backend: Backend,

    #[arg(long, default_value = "redis://127.0.0.1:6379/")]
    pub redis_url: String,

    /// Key namespace used by the Redis backend
    #[arg(long, default_value = "objbench")]
    pub redis_namespace: String,

    #[arg(long, default_value = "./bench-data")]
    pub fs_root: PathBuf,

    /// Simulated round trip for the memory backend (ms)
    #[arg(long)]
    pub memory_latency_ms: Option<u64>,

    /// JSON benchmark plan; command-line values override it
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// Object sizes in bytes, comma separated
    #[arg(long, value_delimiter = ',')]
    pub sizes: Option<Vec<u64>>,

    /// Objects per size
    #[arg(long)]
    pub objects: Option<usize>,

    /// Operations in flight per phase
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Listing rounds per size (0 disables)
    #[arg(long)]
    pub list_rounds: Option<usize>,

    /// Extra buckets for the bucket-operation phases (0 disables)
    #[arg(long)]
    pub bucket_ops: Option<usize>,

    /// Run an unreported warm-up phase first
    #[arg(long)]
    pub warmup: bool,

    /// Pause between phases (seconds)
    #[arg(long)]
    pub cooldown_secs: Option<u64>,

    /// Abort in-flight operations of a phase after this many seconds
    #[arg(long)]
    pub phase_deadline_secs: Option<u64>,

    /// Persist one JSON report per phase into this directory
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub percentile: Option<PercentileArg>,

    /// Serve the live collector view on this address
    #[arg(long)]
    pub serve: Option<SocketAddr>,

    /// Skip host CPU / memory / network sampling
    #[arg(long)]
    pub no_system_gauges: bool,

    /// -v for debug, -vv for trace
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PercentileArg {
    NearestRank,
    Linear,
}

impl From<PercentileArg> for PercentilePolicy {
    fn from(p: PercentileArg) -> Self {
        match p {
            PercentileArg::NearestRank => PercentilePolicy::NearestRank,
            PercentileArg::Linear => PercentilePolicy::Linear,
        }
    }
}

// ─── Benchmark plan ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchPlan {
    /// Object sizes in bytes; each gets its own PUT / GET / DELETE phases
    #[serde(default = "default_sizes")]
    pub sizes: Vec<u64>,

    #[serde(default = "default_object_count")]
    pub object_count: usize,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_list_rounds")]
    pub list_rounds: usize,

    #[serde(default)]
    pub bucket_ops: usize,

    #[serde(default)]
    pub warmup: bool,

    #[serde(default = "default_warmup_objects")]
    pub warmup_objects: usize,

    #[serde(default)]
    pub cooldown_secs: u64,

    #[serde(default)]
    pub phase_deadline_secs: Option<u64>,

    #[serde(default = "default_bucket_prefix")]
    pub bucket_prefix: String,

    #[serde(default)]
    pub results_dir: Option<PathBuf>,

    #[serde(default)]
    pub percentile: PercentilePolicy,

    #[serde(default = "default_true")]
    pub system_gauges: bool,

    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Attempts for client construction and bucket creation
    #[serde(default = "default_setup_attempts")]
    pub setup_attempts: u32,
}

fn default_sizes() -> Vec<u64> {
    vec![KB, MB, 10 * MB]
}
fn default_object_count() -> usize {
    50
}
fn default_concurrency() -> usize {
    1
}
fn default_list_rounds() -> usize {
    10
}
fn default_warmup_objects() -> usize {
    10
}
fn default_bucket_prefix() -> String {
    "objbench".into()
}
fn default_true() -> bool {
    true
}
fn default_sample_interval_ms() -> u64 {
    1000
}
fn default_setup_attempts() -> u32 {
    3
}

impl Default for BenchPlan {
    fn default() -> Self {
        // Same defaults as an empty JSON plan
        Self {
            sizes: default_sizes(),
            object_count: default_object_count(),
            concurrency: default_concurrency(),
            list_rounds: default_list_rounds(),
            bucket_ops: 0,
            warmup: false,
            warmup_objects: default_warmup_objects(),
            cooldown_secs: 0,
            phase_deadline_secs: None,
            bucket_prefix: default_bucket_prefix(),
            results_dir: None,
            percentile: PercentilePolicy::default(),
            system_gauges: true,
            sample_interval_ms: default_sample_interval_ms(),
            setup_attempts: default_setup_attempts(),
        }
    }
}

impl BenchPlan {
    /// Plan file (if any) with command-line overrides applied, validated.
    pub fn load(args: &Args) -> Result<Self, BenchError> {
        let mut plan = match &args.plan {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    BenchError::Config(format!("cannot read plan {}: {e}", path.display()))
                })?;
                Self::from_json(&raw)?
            }
            None => Self::default(),
        };
        plan.apply_args(args);
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_json(raw: &str) -> Result<Self, BenchError> {
        serde_json::from_str(raw).map_err(|e| BenchError::Config(format!("bad plan: {e}")))
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(sizes) = &args.sizes {
            self.sizes = sizes.clone();
        }
        if let Some(v) = args.objects {
            self.object_count = v;
        }
        if let Some(v) = args.concurrency {
            self.concurrency = v;
        }
        if let Some(v) = args.list_rounds {
            self.list_rounds = v;
        }
        if let Some(v) = args.bucket_ops {
            self.bucket_ops = v;
        }
        if args.warmup {
            self.warmup = true;
        }
        if let Some(v) = args.cooldown_secs {
            self.cooldown_secs = v;
        }
        if let Some(v) = args.phase_deadline_secs {
            self.phase_deadline_secs = Some(v);
        }
        if let Some(dir) = &args.results_dir {
            self.results_dir = Some(dir.clone());
        }
        if let Some(p) = args.percentile {
            self.percentile = p.into();
        }
        if args.no_system_gauges {
            self.system_gauges = false;
        }
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        if self.sizes.is_empty() {
            return Err(BenchError::Config("at least one object size is required".into()));
        }
        if self.object_count == 0 || self.object_count > 100_000 {
            return Err(BenchError::Config(
                "object_count must be between 1 and 100000".into(),
            ));
        }
        if self.concurrency == 0 || self.concurrency > 1_000 {
            return Err(BenchError::Config(
                "concurrency must be between 1 and 1000".into(),
            ));
        }
        if self.bucket_ops > 1_000 {
            return Err(BenchError::Config("bucket_ops must be at most 1000".into()));
        }
        if self.phase_deadline_secs == Some(0) {
            return Err(BenchError::Config(
                "phase_deadline_secs must be at least 1".into(),
            ));
        }
        if self.bucket_prefix.is_empty()
            || !self
                .bucket_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(BenchError::Config(
                "bucket_prefix must be lowercase letters, digits and '-'".into(),
            ));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn phase_deadline(&self) -> Option<Duration> {
        self.phase_deadline_secs.map(Duration::from_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(100))
    }

    /// Unreported phase priming connections before measurement.
    pub fn warmup_phase(&self) -> Option<PhaseSpec> {
        if !self.warmup || self.warmup_objects == 0 {
            return None;
        }
        let size = self.sizes.iter().copied().min().unwrap_or(MB);
        Some(
            PhaseSpec::new(PhaseOp::Put, size, self.warmup_objects, self.concurrency)
                .with_label("Warm-up")
                .with_key_prefix("warmup/"),
        )
    }

    /// Every reported phase of the run, in execution order.
    pub fn phases(&self) -> Vec<PhaseSpec> {
        let mut phases = Vec::new();
        let (n, c) = (self.object_count, self.concurrency);

        for &size in &self.sizes {
            phases.push(PhaseSpec::new(PhaseOp::Put, size, n, c));
            phases.push(PhaseSpec::new(PhaseOp::Get, size, n, c));
            if self.list_rounds > 0 {
                let spec = PhaseSpec::new(PhaseOp::List, size, self.list_rounds, c);
                let label = format!("Object Listing (Size: {size} bytes)");
                phases.push(spec.with_label(label));
            }
            phases.push(PhaseSpec::new(PhaseOp::Delete, size, n, c));
        }

        if self.bucket_ops > 0 {
            phases.push(PhaseSpec::new(PhaseOp::CreateBuckets, 0, self.bucket_ops, c));
            if self.list_rounds > 0 {
                phases.push(PhaseSpec::new(PhaseOp::ListBuckets, 0, self.list_rounds, c));
            }
            phases.push(PhaseSpec::new(PhaseOp::DeleteBuckets, 0, self.bucket_ops, c));
        }

        phases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["objstore-bench"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn empty_plan_matches_default() {
        assert_eq!(BenchPlan::from_json("{}").unwrap(), BenchPlan::default());
    }

    #[test]
    fn cli_overrides_plan() {
        let mut plan = BenchPlan::from_json(r#"{"object_count": 5, "sizes": [1]}"#).unwrap();
        plan.apply_args(&args(&[
            "--sizes",
            "10,20",
            "--concurrency",
            "8",
            "--percentile",
            "linear",
        ]));
        assert_eq!(plan.sizes, vec![10, 20]);
        assert_eq!(plan.object_count, 5);
        assert_eq!(plan.concurrency, 8);
        assert_eq!(plan.percentile, PercentilePolicy::Linear);
        plan.validate().unwrap();
    }

    #[test]
    fn validation_rejects_bad_values() {
        let plan = BenchPlan {
            concurrency: 0,
            ..BenchPlan::default()
        };
        assert!(matches!(plan.validate(), Err(BenchError::Config(_))));

        let plan = BenchPlan {
            bucket_prefix: "Bad_Prefix".into(),
            ..BenchPlan::default()
        };
        assert!(plan.validate().is_err());

        let plan = BenchPlan {
            sizes: vec![],
            ..BenchPlan::default()
        };
        assert!(plan.validate().is_err());
    }

    #[test]
    fn phases_follow_sizes() {
        let plan = BenchPlan {
            sizes: vec![KB, MB],
            list_rounds: 0,
            ..BenchPlan::default()
        };
        let ops: Vec<_> = plan.phases().iter().map(|p| (p.op, p.object_size)).collect();
        assert_eq!(
            ops,
            vec![
                (PhaseOp::Put, KB),
                (PhaseOp::Get, KB),
                (PhaseOp::Delete, KB),
                (PhaseOp::Put, MB),
                (PhaseOp::Get, MB),
                (PhaseOp::Delete, MB),
            ]
        );
    }

    #[test]
    fn bucket_phases_when_enabled() {
        let plan = BenchPlan {
            sizes: vec![KB],
            bucket_ops: 3,
            list_rounds: 2,
            ..BenchPlan::default()
        };
        let phases = plan.phases();
        let tail: Vec<_> = phases.iter().rev().take(3).map(|p| p.op).collect();
        assert_eq!(
            tail,
            vec![PhaseOp::DeleteBuckets, PhaseOp::ListBuckets, PhaseOp::CreateBuckets]
        );
        assert_eq!(phases[2].label, "Object Listing (Size: 1024 bytes)");
        assert_eq!(phases[2].object_count, 2);
    }

    #[test]
    fn warmup_uses_smallest_size() {
        let plan = BenchPlan {
            sizes: vec![MB, KB],
            warmup: true,
            ..BenchPlan::default()
        };
        let w = plan.warmup_phase().unwrap();
        assert_eq!(w.object_size, KB);
        assert_eq!(w.label, "Warm-up");
        assert_eq!(w.key_prefix, "warmup/");
        assert!(BenchPlan::default().warmup_phase().is_none());
    }
}
