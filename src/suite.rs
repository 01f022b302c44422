use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::BenchPlan;
use crate::error::BenchError;
use crate::metrics::{MetricsCollector, PhaseReport, SystemSampler};
use crate::phase_runner::PhaseRunner;
use crate::storage::{with_retry, ObjectStore};

/// What a finished run produced.
#[derive(Debug)]
pub struct SuiteResult {
    pub bucket: String,
    pub reports: Vec<PhaseReport>,
}

impl SuiteResult {
    /// Phases in which at least one operation failed.
    pub fn failed_phases(&self) -> Vec<&PhaseReport> {
        self.reports.iter().filter(|r| r.failed()).collect()
    }
}

/// Written next to the phase reports, describing the run itself.
#[derive(Debug, Serialize)]
struct RunManifest<'a> {
    backend: &'a str,
    bucket: &'a str,
    plan: &'a BenchPlan,
    os: &'static str,
    arch: &'static str,
    cpus: usize,
    started_at: DateTime<Utc>,
}

/// Execute the whole plan against `store` in a fresh, transient bucket.
///
/// Bucket creation is the only fatal step. Operation failures end up in
/// the reports; cleanup problems are logged and otherwise ignored.
pub async fn run(
    plan: &BenchPlan,
    store: Arc<dyn ObjectStore>,
    collector: Arc<MetricsCollector>,
) -> Result<SuiteResult, BenchError> {
    let bucket = format!("{}-{}", plan.bucket_prefix, uuid::Uuid::new_v4().simple());

    // ── 1. Transient bucket ─────────────────────────────────────
    println!("Creating bucket: {bucket}");
    with_retry("create bucket", plan.setup_attempts, Duration::from_secs(1), || {
        store.create_bucket(&bucket)
    })
    .await
    .map_err(|e| BenchError::Setup(format!("bucket {bucket}: {e}")))?;

    if let Some(dir) = &plan.results_dir {
        write_manifest(dir, store.name(), &bucket, plan);
    }

    // ── 2. Host gauges ──────────────────────────────────────────
    let sampler = plan
        .system_gauges
        .then(|| SystemSampler::spawn(collector.clone(), plan.sample_interval()));

    let runner = PhaseRunner::new(store.clone(), collector.clone()).with_policy(plan.percentile);

    // ── 3. Warm-up ──────────────────────────────────────────────
    if let Some(warmup) = plan.warmup_phase() {
        println!("\nPerforming warm-up...");
        let outcome = runner.run(&bucket, &warmup, deadline(plan)).await;
        if outcome.failed() {
            tracing::warn!("warm-up: {} operations failed", outcome.failures.len());
        }
        delete_all_objects(store.as_ref(), &bucket).await;
        tokio::time::sleep(plan.cooldown()).await;
    }

    // ── 4. Measured phases ──────────────────────────────────────
    let phases = plan.phases();
    let total = phases.len();
    let mut reports = Vec::with_capacity(total);

    for (i, spec) in phases.into_iter().enumerate() {
        println!(
            "\nRunning {}: {} operations, {} concurrent",
            spec.label, spec.object_count, spec.concurrency
        );

        let outcome = runner.run(&bucket, &spec, deadline(plan)).await;
        let gauges = collector.snapshot().gauges;
        let report = PhaseReport::new(spec, outcome, gauges);
        print!("{report}");

        if let Some(dir) = &plan.results_dir {
            match report.persist(dir) {
                Ok(path) => tracing::debug!(path = %path.display(), "report written"),
                Err(e) => tracing::warn!(error = %e, "failed to write metrics"),
            }
        }
        reports.push(report);

        if i + 1 < total && !plan.cooldown().is_zero() {
            tokio::time::sleep(plan.cooldown()).await;
        }
    }

    // ── 5. Teardown ─────────────────────────────────────────────
    if let Some(s) = sampler {
        s.stop().await;
    }
    cleanup(store.as_ref(), &bucket).await;

    Ok(SuiteResult { bucket, reports })
}

fn deadline(plan: &BenchPlan) -> Option<Instant> {
    plan.phase_deadline().map(|d| Instant::now() + d)
}

fn write_manifest(dir: &Path, backend: &str, bucket: &str, plan: &BenchPlan) {
    let manifest = RunManifest {
        backend,
        bucket,
        plan,
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        cpus: std::thread::available_parallelism().map_or(1, |n| n.get()),
        started_at: Utc::now(),
    };
    let written = std::fs::create_dir_all(dir).and_then(|_| {
        let json = serde_json::to_vec_pretty(&manifest)?;
        std::fs::write(dir.join("run.json"), json)
    });
    if let Err(e) = written {
        tracing::warn!(error = %e, "failed to write run manifest");
    }
}

/// Best effort: remove leftover objects, extra buckets, then the bucket.
pub async fn cleanup(store: &dyn ObjectStore, bucket: &str) {
    println!("\nCleaning up bucket: {bucket}");
    delete_all_objects(store, bucket).await;

    let extra_prefix = format!("{bucket}-");
    match store.list_buckets().await {
        Ok(names) => {
            for name in names.iter().filter(|n| n.starts_with(&extra_prefix)) {
                delete_all_objects(store, name).await;
                if let Err(e) = store.delete_bucket(name).await {
                    tracing::warn!(bucket = %name, error = %e, "failed to delete bucket");
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to list buckets during cleanup"),
    }

    if let Err(e) = store.delete_bucket(bucket).await {
        tracing::warn!(bucket = %bucket, error = %e, "failed to delete bucket");
    }
}

async fn delete_all_objects(store: &dyn ObjectStore, bucket: &str) {
    let keys = match store.list_objects(bucket, None).await {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!(bucket = %bucket, error = %e, "failed to list objects for cleanup");
            return;
        }
    };
    if keys.is_empty() {
        return;
    }
    if let Err(e) = store.delete_objects(bucket, &keys).await {
        tracing::warn!(
            bucket = %bucket,
            count = keys.len(),
            error = %e,
            "failed to delete objects"
        );
    }
}
