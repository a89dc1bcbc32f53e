//! Process-wide routing threshold state.
//!
//! [`ThresholdConfig`] is an immutable snapshot. The router loads the
//! current snapshot once per decision and keeps the `Arc` in its
//! [`RoutingDecision`](super::RoutingDecision), so later swaps never change
//! how a past decision reads. Only the
//! [`ThresholdController`](super::ThresholdController) publishes new
//! snapshots, through [`ThresholdHandle::update`].

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the adaptive routing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Complexity score at or above which queries go to the remote path.
    pub complexity_threshold: f64,
    /// TTL applied to new cache entries.
    #[serde(with = "duration_secs")]
    pub cache_ttl: Duration,
    /// Timeout applied to each remote analysis call.
    #[serde(with = "duration_millis")]
    pub remote_timeout: Duration,
    /// Incremented on every published update; `0` for the initial snapshot.
    pub generation: u64,
    /// When the controller last changed this config.
    pub last_adjusted: Option<DateTime<Utc>>,
}

impl ThresholdConfig {
    /// Initial snapshot built from static configuration.
    pub fn initial(complexity_threshold: f64, cache_ttl: Duration, remote_timeout: Duration) -> Self {
        Self {
            complexity_threshold,
            cache_ttl,
            remote_timeout,
            generation: 0,
            last_adjusted: None,
        }
    }
}

/// Shared, lock-free handle to the current [`ThresholdConfig`].
///
/// Cloning the handle shares the same underlying slot.
#[derive(Debug, Clone)]
pub struct ThresholdHandle {
    slot: Arc<ArcSwap<ThresholdConfig>>,
}

impl ThresholdHandle {
    /// Wrap an initial snapshot.
    pub fn new(initial: ThresholdConfig) -> Self {
        Self {
            slot: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Load the snapshot currently in effect. Never blocks.
    pub fn snapshot(&self) -> Arc<ThresholdConfig> {
        self.slot.load_full()
    }

    /// Read–compute–swap. `f` receives the current snapshot and returns the
    /// replacement; it may be called more than once under contention, so it
    /// must be pure. Generation and timestamp are stamped here.
    ///
    /// Returns the snapshot that was published.
    pub fn update<F>(&self, f: F) -> Arc<ThresholdConfig>
    where
        F: Fn(&ThresholdConfig) -> ThresholdConfig,
    {
        let now = Utc::now();
        let mut published = None;
        self.slot.rcu(|current| {
            let mut next = f(current.as_ref());
            next.generation = current.generation + 1;
            next.last_adjusted = Some(now);
            let next = Arc::new(next);
            published = Some(Arc::clone(&next));
            next
        });
        published.unwrap_or_else(|| self.snapshot())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initial() -> ThresholdConfig {
        ThresholdConfig::initial(5.0, Duration::from_secs(300), Duration::from_millis(2_000))
    }

    #[test]
    fn test_initial_snapshot_generation_zero() {
        let handle = ThresholdHandle::new(initial());
        let snap = handle.snapshot();
        assert_eq!(snap.generation, 0);
        assert!(snap.last_adjusted.is_none());
        assert!((snap.complexity_threshold - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_update_bumps_generation_and_stamps_time() {
        let handle = ThresholdHandle::new(initial());
        let published = handle.update(|c| ThresholdConfig {
            complexity_threshold: c.complexity_threshold + 0.5,
            ..c.clone()
        });
        assert_eq!(published.generation, 1);
        assert!(published.last_adjusted.is_some());
        assert_eq!(*handle.snapshot(), *published);
    }

    #[test]
    fn test_old_snapshot_unchanged_after_swap() {
        let handle = ThresholdHandle::new(initial());
        let before = handle.snapshot();
        handle.update(|c| ThresholdConfig {
            complexity_threshold: 9.0,
            ..c.clone()
        });
        assert!((before.complexity_threshold - 5.0).abs() < f64::EPSILON);
        assert!((handle.snapshot().complexity_threshold - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clones_share_slot() {
        let a = ThresholdHandle::new(initial());
        let b = a.clone();
        a.update(|c| ThresholdConfig {
            complexity_threshold: 6.0,
            ..c.clone()
        });
        assert!((b.snapshot().complexity_threshold - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_updates_each_bump_generation() {
        let handle = ThresholdHandle::new(initial());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let h = handle.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        h.update(|c| c.clone());
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(handle.snapshot().generation, 200);
    }

    #[test]
    fn test_serde_uses_plain_numbers_for_durations() {
        let json = serde_json::to_value(initial()).unwrap();
        assert_eq!(json["cache_ttl"], 300);
        assert_eq!(json["remote_timeout"], 2_000);
        let back: ThresholdConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, initial());
    }
}
