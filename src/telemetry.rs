//! Bounded in-memory telemetry buffer.
//!
//! The router records one [`TelemetryEvent`] per request. The adaptive
//! controller drains the buffer once per tuning cycle. The buffer is a ring
//! of fixed capacity: when full, the oldest event is dropped and counted.
//!
//! `record` holds the lock for one `push_back` (plus at most one
//! `pop_front`) and never awaits, so it is safe to call from any task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::routing::{RoutingDecision, ServedBy};

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// First-choice path answered.
    Success,
    /// Remote timed out and no fallback produced a result.
    Timeout,
    /// No path produced a result.
    Error,
    /// The first-choice path failed and the fallback answered.
    FallbackSuccess,
    /// The caller cancelled before a result was produced.
    Cancelled,
}

impl Outcome {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::Error => "error",
            Self::FallbackSuccess => "fallback-success",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Quality signal attached to a served result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSignal {
    /// The answer was good enough.
    Positive,
    /// The answer was poor.
    Negative,
}

/// One request, start to finish.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    /// Request id, also returned to the caller.
    pub request_id: Uuid,
    /// The routing decision, with the threshold snapshot it used.
    pub decision: RoutingDecision,
    /// Which path actually produced the answer.
    pub served_by: ServedBy,
    /// Wall-clock time spent in the router.
    pub latency: Duration,
    /// How the request ended.
    pub outcome: Outcome,
    /// Optional quality signal.
    pub feedback: Option<FeedbackSignal>,
    /// Kind of the remote failure, if the remote backend was called and
    /// failed during this request.
    pub remote_failure: Option<&'static str>,
    /// When the event was recorded.
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    ring: Mutex<VecDeque<(Instant, TelemetryEvent)>>,
    capacity: usize,
    dropped: AtomicU64,
}

/// Shared, bounded telemetry ring. Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct TelemetryCollector {
    inner: Arc<Inner>,
}

impl TelemetryCollector {
    /// Create a collector holding at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                ring: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Append an event, dropping the oldest one if the ring is full.
    pub fn record(&self, event: TelemetryEvent) {
        let evicted = {
            let mut ring = self.inner.ring.lock();
            let evicted = if ring.len() >= self.inner.capacity {
                ring.pop_front().is_some()
            } else {
                false
            };
            ring.push_back((Instant::now(), event));
            evicted
        };
        if evicted {
            let total = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            // log the first drop and then every 1000th to avoid flooding
            if total == 1 || total % 1_000 == 0 {
                warn!(dropped_total = total, capacity = self.inner.capacity, "telemetry buffer full; dropping oldest events");
            }
        }
    }

    /// Remove every buffered event and return those recorded within
    /// `window` of now, oldest first.
    pub fn drain(&self, window: Duration) -> Vec<TelemetryEvent> {
        let drained = std::mem::take(&mut *self.inner.ring.lock());
        let now = Instant::now();
        drained
            .into_iter()
            .filter(|(at, _)| now.saturating_duration_since(*at) <= window)
            .map(|(_, event)| event)
            .collect()
    }

    /// Events currently buffered.
    pub fn len(&self) -> usize {
        self.inner.ring.lock().len()
    }

    /// `true` when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered events.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Total events dropped because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}
