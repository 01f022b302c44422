pub mod collector;
pub mod percentiles;
pub mod report;
pub mod stream;
pub mod system;

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub use collector::{CollectorSnapshot, MetricsCollector, OpAggregate};
pub use percentiles::{
    summarize, summarize_over, OperationStatistics, PercentilePolicy, Summary,
};
pub use report::PhaseReport;
pub use system::{SystemGauges, SystemSampler};

/// Kind of storage call a sample was measured for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpKind {
    Put,
    Get,
    Delete,
    #[serde(rename = "DELETE_OBJECTS")]
    DeleteBatch,
    List,
    CreateBucket,
    DeleteBucket,
    ListBuckets,
}

impl OpKind {
    pub const ALL: [OpKind; 8] = [
        OpKind::Put,
        OpKind::Get,
        OpKind::Delete,
        OpKind::DeleteBatch,
        OpKind::List,
        OpKind::CreateBucket,
        OpKind::DeleteBucket,
        OpKind::ListBuckets,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Put => "PUT",
            OpKind::Get => "GET",
            OpKind::Delete => "DELETE",
            OpKind::DeleteBatch => "DELETE_OBJECTS",
            OpKind::List => "LIST",
            OpKind::CreateBucket => "CREATE_BUCKET",
            OpKind::DeleteBucket => "DELETE_BUCKET",
            OpKind::ListBuckets => "LIST_BUCKETS",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single timing observation recorded when an operation completes.
/// This is the "write" side: phase workers create these and push them in.
#[derive(Debug, Clone)]
pub struct LatencySample {
    pub kind: OpKind,
    /// When the call was issued
    pub started: Instant,
    /// Wall time until the call returned (ns resolution)
    pub latency: Duration,
    /// Payload size moved by the call, when meaningful
    pub bytes: Option<u64>,
    /// `Some` when the call returned an error
    pub error: Option<String>,
}

impl LatencySample {
    /// Build a sample from the two instants bracketing a call.
    /// A `finished` earlier than `started` yields zero latency.
    pub fn new(
        kind: OpKind,
        started: Instant,
        finished: Instant,
        bytes: Option<u64>,
        error: Option<String>,
    ) -> Self {
        Self {
            kind,
            started,
            latency: finished.saturating_duration_since(started),
            bytes,
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn finished(&self) -> Instant {
        self.started + self.latency
    }
}
