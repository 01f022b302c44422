use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::{Stream, StreamExt};

use super::collector::CollectorSnapshot;
use super::MetricsCollector;

const PUSH_INTERVAL: Duration = Duration::from_millis(500);

// ─── GET /api/metrics ────────────────────────────────────────────

pub async fn get_metrics(
    State(metrics): State<Arc<MetricsCollector>>,
) -> Json<CollectorSnapshot> {
    Json(metrics.snapshot())
}

// ─── GET /api/metrics/stream ─────────────────────────────────────

/// Server-Sent Events feed of collector snapshots.
///
/// Checked every 500 ms. An event is sent when samples arrived or the
/// phase changed; with host gauges enabled every tick is sent. Events
/// are named `phase` on a phase change and `snapshot` otherwise, and
/// carry an increasing id.
pub async fn metrics_stream(
    State(metrics): State<Arc<MetricsCollector>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let ticks = IntervalStream::new(tokio::time::interval(PUSH_INTERVAL));
    let mut tracker = ChangeTracker::default();

    let stream = ticks.filter_map(move |_| tracker.next_event(metrics.snapshot()).map(Ok));

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Remembers what the last pushed snapshot looked like.
#[derive(Default)]
struct ChangeTracker {
    seq: u64,
    last: Option<(usize, Option<String>)>,
}

impl ChangeTracker {
    fn next_event(&mut self, snapshot: CollectorSnapshot) -> Option<Event> {
        let key = (snapshot.sample_count, snapshot.phase.clone());
        let phase_changed = self.last.as_ref().map_or(true, |(_, p)| *p != key.1);
        if self.last.as_ref() == Some(&key) && snapshot.gauges.is_none() {
            return None;
        }
        self.last = Some(key);
        self.seq += 1;

        let name = if phase_changed { "phase" } else { "snapshot" };
        match Event::default()
            .event(name)
            .id(self.seq.to_string())
            .json_data(&snapshot)
        {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode snapshot event");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::OpKind;
    use std::time::Instant;

    #[test]
    fn idle_collector_is_pushed_once() {
        let c = MetricsCollector::new();
        let mut tracker = ChangeTracker::default();
        assert!(tracker.next_event(c.snapshot()).is_some());
        assert!(tracker.next_event(c.snapshot()).is_none());
        assert_eq!(tracker.seq, 1);
    }

    #[test]
    fn new_samples_and_phases_are_pushed() {
        let c = MetricsCollector::new();
        let mut tracker = ChangeTracker::default();
        tracker.next_event(c.snapshot());

        c.begin_phase("Read (Size: 8 bytes)");
        assert!(tracker.next_event(c.snapshot()).is_some());

        let t0 = Instant::now();
        c.record(OpKind::Get, t0, t0 + Duration::from_millis(2), Some(8), None);
        assert!(tracker.next_event(c.snapshot()).is_some());
        assert!(tracker.next_event(c.snapshot()).is_none());
        assert_eq!(tracker.seq, 3);
    }
}
