use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::metrics::{summarize_over, MetricsCollector, OpKind, PercentilePolicy, Summary};
use crate::storage::{ObjectStore, StorageError};

// ─── Phase description ───────────────────────────────────────────

/// What every operation of a phase does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseOp {
    Put,
    Get,
    Delete,
    /// `object_count` listings of the phase's key prefix
    List,
    /// `object_count` extra buckets named `<bucket>-<i>`
    CreateBuckets,
    DeleteBuckets,
    ListBuckets,
}

impl PhaseOp {
    pub fn kind(self) -> OpKind {
        match self {
            PhaseOp::Put => OpKind::Put,
            PhaseOp::Get => OpKind::Get,
            PhaseOp::Delete => OpKind::Delete,
            PhaseOp::List => OpKind::List,
            PhaseOp::CreateBuckets => OpKind::CreateBucket,
            PhaseOp::DeleteBuckets => OpKind::DeleteBucket,
            PhaseOp::ListBuckets => OpKind::ListBuckets,
        }
    }
}

/// One contiguous block of a run that produces one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub label: String,
    pub op: PhaseOp,
    /// Bytes per object (PUT/GET phases)
    pub object_size: u64,
    /// Number of operations issued
    pub object_count: usize,
    /// Maximum operations in flight
    pub concurrency: usize,
    pub key_prefix: String,
}

impl PhaseSpec {
    pub fn new(op: PhaseOp, object_size: u64, object_count: usize, concurrency: usize) -> Self {
        let label = match op {
            PhaseOp::Put => format!("Write (Size: {object_size} bytes)"),
            PhaseOp::Get => format!("Read (Size: {object_size} bytes)"),
            PhaseOp::Delete => format!("Delete (Size: {object_size} bytes)"),
            PhaseOp::List => "Object Listing".to_owned(),
            PhaseOp::CreateBuckets => "Bucket Creation".to_owned(),
            PhaseOp::DeleteBuckets => "Bucket Deletion".to_owned(),
            PhaseOp::ListBuckets => "Bucket Listing".to_owned(),
        };
        Self {
            label,
            op,
            object_size,
            object_count,
            concurrency: concurrency.max(1),
            key_prefix: format!("size-{object_size}/"),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Object key of the `i`-th operation.
    pub fn key(&self, i: usize) -> String {
        format!("{}key_{i}", self.key_prefix)
    }

    /// Payload size for GB/sec throughput, when the phase moves data.
    pub fn payload_size(&self) -> Option<u64> {
        match self.op {
            PhaseOp::Put | PhaseOp::Get if self.object_size > 0 => Some(self.object_size),
            _ => None,
        }
    }
}

// ─── Phase results ───────────────────────────────────────────────

/// A single failed operation, kept for the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpFailure {
    pub kind: OpKind,
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub summary: Summary,
    pub failures: Vec<OpFailure>,
    /// Operations aborted at the deadline; these produce no sample
    pub cancelled: u64,
    /// Wall-clock window from first dispatch to the barrier
    pub elapsed: Duration,
}

impl PhaseOutcome {
    pub fn failed(&self) -> bool {
        !self.failures.is_empty()
    }
}

enum Completion {
    Done,
    Failed(OpFailure),
    Cancelled,
}

// ─── Runner ──────────────────────────────────────────────────────

/// Drives phases against one store, feeding a shared collector.
pub struct PhaseRunner {
    store: Arc<dyn ObjectStore>,
    collector: Arc<MetricsCollector>,
    policy: PercentilePolicy,
    seed: u64,
}

impl PhaseRunner {
    pub fn new(store: Arc<dyn ObjectStore>, collector: Arc<MetricsCollector>) -> Self {
        Self {
            store,
            collector,
            policy: PercentilePolicy::default(),
            seed: 1000,
        }
    }

    pub fn with_policy(mut self, policy: PercentilePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Seed for the payload generator, so runs move identical bytes.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    /// Run `spec` against `bucket` with at most `spec.concurrency`
    /// operations in flight and wait for every one of them.
    ///
    /// Operations still running at `deadline` are aborted and leave no
    /// sample behind; operations not yet dispatched are not started.
    pub async fn run(
        &self,
        bucket: &str,
        spec: &PhaseSpec,
        deadline: Option<Instant>,
    ) -> PhaseOutcome {
        let leftover = self.collector.take_samples();
        if !leftover.is_empty() {
            tracing::debug!(count = leftover.len(), "discarding samples recorded outside a phase");
        }
        self.collector.begin_phase(&spec.label);

        // A deserialized spec may carry zero
        let concurrency = spec.concurrency.max(1);

        let payload: Arc<Vec<u8>> = Arc::new(match spec.op {
            PhaseOp::Put => generate_payload(self.seed, spec.object_size as usize),
            _ => Vec::new(),
        });

        tracing::info!(
            phase = %spec.label,
            op = %spec.op.kind(),
            count = spec.object_count,
            concurrency,
            "phase started"
        );

        let sem = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        let mut cancelled = 0u64;
        let phase_start = Instant::now();

        for i in 0..spec.object_count {
            // Acquire before spawning so at most `concurrency` tasks exist
            let permit = match deadline {
                Some(d) => {
                    match tokio::time::timeout_at(d.into(), sem.clone().acquire_owned()).await {
                        Ok(Ok(p)) => p,
                        _ => {
                            cancelled += (spec.object_count - i) as u64;
                            break;
                        }
                    }
                }
                None => match sem.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let store = self.store.clone();
            let collector = self.collector.clone();
            let payload = payload.clone();
            let bucket = bucket.to_owned();
            let op = spec.op;
            let key = match op {
                PhaseOp::CreateBuckets | PhaseOp::DeleteBuckets => format!("{bucket}-{i}"),
                PhaseOp::List => spec.key_prefix.clone(),
                PhaseOp::ListBuckets => String::new(),
                _ => spec.key(i),
            };

            tasks.spawn(async move {
                let _permit = permit;
                let started = Instant::now();
                let call = execute(store.as_ref(), op, &bucket, &key, &payload);
                let result = match deadline {
                    Some(d) => match tokio::time::timeout_at(d.into(), call).await {
                        Ok(r) => r,
                        Err(_) => return Completion::Cancelled,
                    },
                    None => call.await,
                };
                let finished = Instant::now();

                match result {
                    Ok(bytes) => {
                        collector.record(op.kind(), started, finished, bytes, None);
                        Completion::Done
                    }
                    Err(e) => {
                        let error = e.to_string();
                        tracing::warn!(
                            op = %op.kind(),
                            key = %key,
                            error = %error,
                            "operation failed"
                        );
                        collector.record(op.kind(), started, finished, None, Some(error.clone()));
                        Completion::Failed(OpFailure {
                            kind: op.kind(),
                            key,
                            error,
                        })
                    }
                }
            });
        }

        // Barrier: nothing from the next phase starts before this drains
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Completion::Done) => {}
                Ok(Completion::Failed(f)) => failures.push(f),
                Ok(Completion::Cancelled) => cancelled += 1,
                Err(e) => tracing::warn!(error = %e, "phase worker panicked"),
            }
        }
        let elapsed = phase_start.elapsed();

        let samples = self.collector.take_samples();
        let summary = summarize_over(
            &samples,
            &spec.label,
            spec.payload_size(),
            elapsed,
            self.policy,
        );

        if !failures.is_empty() {
            tracing::warn!(phase = %spec.label, "{} operations failed", failures.len());
        }
        if cancelled > 0 {
            tracing::warn!(phase = %spec.label, cancelled, "operations cancelled at deadline");
        }
        tracing::info!(
            phase = %spec.label,
            elapsed_ms = elapsed.as_millis() as u64,
            "phase finished"
        );

        PhaseOutcome {
            summary,
            failures,
            cancelled,
            elapsed,
        }
    }
}

/// Issue one storage call. Returns the bytes moved, when meaningful.
async fn execute(
    store: &dyn ObjectStore,
    op: PhaseOp,
    bucket: &str,
    key: &str,
    payload: &[u8],
) -> Result<Option<u64>, StorageError> {
    match op {
        PhaseOp::Put => {
            store.put_object(bucket, key, payload).await?;
            Ok(Some(payload.len() as u64))
        }
        PhaseOp::Get => {
            let body = store.get_object(bucket, key).await?;
            Ok(Some(body.len() as u64))
        }
        PhaseOp::Delete => store.delete_object(bucket, key).await.map(|_| None),
        PhaseOp::List => store.list_objects(bucket, Some(key)).await.map(|_| None),
        PhaseOp::CreateBuckets => store.create_bucket(key).await.map(|_| None),
        PhaseOp::DeleteBuckets => store.delete_bucket(key).await.map(|_| None),
        PhaseOp::ListBuckets => store.list_buckets().await.map(|_| None),
    }
}

/// Random object body, deterministic for a given seed.
pub fn generate_payload(seed: u64, size: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut buf = vec![0u8; size];
    rng.fill(&mut buf[..]);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_labels_follow_op() {
        assert_eq!(
            PhaseSpec::new(PhaseOp::Put, 1024, 50, 1).label,
            "Write (Size: 1024 bytes)"
        );
        assert_eq!(PhaseSpec::new(PhaseOp::ListBuckets, 0, 10, 1).label, "Bucket Listing");
    }

    #[test]
    fn payload_size_only_for_data_phases() {
        assert_eq!(PhaseSpec::new(PhaseOp::Put, 10, 1, 1).payload_size(), Some(10));
        assert_eq!(PhaseSpec::new(PhaseOp::Get, 10, 1, 1).payload_size(), Some(10));
        assert_eq!(PhaseSpec::new(PhaseOp::Delete, 10, 1, 1).payload_size(), None);
        assert_eq!(PhaseSpec::new(PhaseOp::Put, 0, 1, 1).payload_size(), None);
    }

    #[test]
    fn zero_concurrency_is_raised_to_one() {
        assert_eq!(PhaseSpec::new(PhaseOp::Put, 1, 1, 0).concurrency, 1);
    }

    #[test]
    fn keys_share_the_prefix() {
        let spec = PhaseSpec::new(PhaseOp::Put, 1024, 3, 1);
        assert_eq!(spec.key(2), "size-1024/key_2");
    }

    #[test]
    fn payload_is_deterministic() {
        let a = generate_payload(7, 64);
        let b = generate_payload(7, 64);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, generate_payload(8, 64));
    }
}
