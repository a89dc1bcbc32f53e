//! Adaptive threshold controller.
//!
//! Runs off the request path on its own timer. Each cycle:
//!
//! 1. drains the [`TelemetryCollector`] and keeps the configured window
//! 2. reduces it to [`WindowStats`]
//! 3. computes a bounded threshold / TTL delta
//! 4. publishes the new [`ThresholdConfig`] with a single swap
//!
//! ## Policy
//!
//! - Remote failing too often (`> failure_ceiling`): raise the threshold
//!   so fewer queries go remote.
//! - Remote healthy (`<= failure_ceiling / 2`) but rule-based answers just
//!   below the threshold draw too much negative feedback: lower it.
//! - Cache hit rate high: extend the TTL. Very low: shrink it.
//!
//! Every move is one `step`, clamped to the configured bounds.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics;
use crate::telemetry::{FeedbackSignal, Outcome, TelemetryCollector, TelemetryEvent};

use super::config::AdaptiveConfig;
use super::router::ServedBy;
use super::threshold::{ThresholdConfig, ThresholdHandle};

/// Aggregates over one telemetry window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowStats {
    /// Events considered.
    pub samples: u64,
    /// Requests where the remote path was attempted.
    pub remote_attempts: u64,
    /// Of those, how many failed.
    pub remote_failures: u64,
    /// Requests that consulted the cache.
    pub cache_lookups: u64,
    /// Of those, how many hit.
    pub cache_hits: u64,
    /// Rule-based answers scoring within the band below the threshold.
    pub near_threshold_samples: u64,
    /// Of those, how many carried negative feedback.
    pub near_threshold_negative: u64,
    /// Mean latency of requests served by the rule engine first.
    pub mean_rule_latency: Option<Duration>,
    /// Mean latency of requests served by the remote backend first.
    pub mean_remote_latency: Option<Duration>,
    /// Mean latency of cache hits.
    pub mean_cache_latency: Option<Duration>,
}

impl WindowStats {
    /// Reduce a window of events. `near_band` is the width of the band just
    /// below each decision's own threshold.
    pub fn from_events(events: &[TelemetryEvent], near_band: f64) -> Self {
        let mut stats = Self::default();
        let mut rule = LatencyAcc::default();
        let mut remote = LatencyAcc::default();
        let mut cache = LatencyAcc::default();

        for e in events {
            if e.outcome == Outcome::Cancelled {
                continue;
            }
            stats.samples += 1;
            stats.cache_lookups += 1;

            match e.served_by {
                ServedBy::CacheHit => {
                    stats.cache_hits += 1;
                    cache.add(e.latency);
                }
                ServedBy::RemoteMl => {
                    stats.remote_attempts += 1;
                    remote.add(e.latency);
                }
                ServedBy::RuleUnsupportedThenRemoteMl => {
                    stats.remote_attempts += 1;
                }
                ServedBy::RemoteFailedThenRuleBased => {
                    stats.remote_attempts += 1;
                    stats.remote_failures += 1;
                }
                ServedBy::RuleBased => {
                    rule.add(e.latency);
                    if is_near_threshold(e, near_band) {
                        if let Some(signal) = e.feedback {
                            stats.near_threshold_samples += 1;
                            if signal == FeedbackSignal::Negative {
                                stats.near_threshold_negative += 1;
                            }
                        }
                    }
                }
                ServedBy::None => {
                    // the remote call may come after an unsupported rule
                    // lookup, so the decision path says nothing here
                    if e.remote_failure.is_some() {
                        stats.remote_attempts += 1;
                        stats.remote_failures += 1;
                    }
                }
            }
        }

        stats.mean_rule_latency = rule.mean();
        stats.mean_remote_latency = remote.mean();
        stats.mean_cache_latency = cache.mean();
        stats
    }

    /// Remote failures over remote attempts; `0.0` with no attempts.
    pub fn remote_failure_rate(&self) -> f64 {
        ratio(self.remote_failures, self.remote_attempts)
    }

    /// Cache hits over lookups; `0.0` with no lookups.
    pub fn cache_hit_rate(&self) -> f64 {
        ratio(self.cache_hits, self.cache_lookups)
    }

    /// Negative feedback over near-threshold rule-based samples.
    pub fn near_threshold_negative_rate(&self) -> f64 {
        ratio(self.near_threshold_negative, self.near_threshold_samples)
    }
}

fn is_near_threshold(e: &TelemetryEvent, band: f64) -> bool {
    let Some(score) = e.decision.score.as_ref() else {
        return false;
    };
    let threshold = e.decision.threshold.complexity_threshold;
    score.score < threshold && score.score >= threshold - band
}

fn ratio(n: u64, d: u64) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

#[derive(Default)]
struct LatencyAcc {
    total: Duration,
    count: u32,
}

impl LatencyAcc {
    fn add(&mut self, d: Duration) {
        self.total += d;
        self.count += 1;
    }

    fn mean(&self) -> Option<Duration> {
        (self.count > 0).then(|| self.total / self.count)
    }
}

/// What a tuning cycle changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Adjustment {
    /// Threshold before the cycle.
    pub previous_threshold: f64,
    /// Threshold after the cycle.
    pub threshold: f64,
    /// Cache TTL before the cycle.
    pub previous_cache_ttl: Duration,
    /// Cache TTL after the cycle.
    pub cache_ttl: Duration,
    /// Generation of the published snapshot.
    pub generation: u64,
    /// Stats the decision was based on.
    pub stats: WindowStats,
}

/// Periodic controller over the shared [`ThresholdHandle`].
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Clone)]
pub struct ThresholdController {
    config: AdaptiveConfig,
    thresholds: ThresholdHandle,
    telemetry: TelemetryCollector,
}

impl ThresholdController {
    /// Create a controller.
    pub fn new(
        config: AdaptiveConfig,
        thresholds: ThresholdHandle,
        telemetry: TelemetryCollector,
    ) -> Self {
        Self {
            config,
            thresholds,
            telemetry,
        }
    }

    /// The controller configuration.
    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Run one observe → compute → commit cycle.
    ///
    /// Returns `None` when nothing changed (including when disabled).
    pub fn run_cycle(&self) -> Option<Adjustment> {
        let events = self.telemetry.drain(self.config.window());
        let stats = WindowStats::from_events(&events, self.config.near_threshold_band);

        if !self.config.enabled {
            debug!(samples = stats.samples, "adaptive tuning disabled; skipping cycle");
            return None;
        }

        let threshold_delta = self.threshold_delta(&stats);
        let ttl_delta = self.ttl_delta(&stats);
        let current = self.thresholds.snapshot();
        let proposed = self.apply(&current, threshold_delta, ttl_delta);

        if (proposed.complexity_threshold - current.complexity_threshold).abs() < f64::EPSILON
            && proposed.cache_ttl == current.cache_ttl
        {
            debug!(
                samples = stats.samples,
                remote_failure_rate = stats.remote_failure_rate(),
                cache_hit_rate = stats.cache_hit_rate(),
                "adaptive cycle: no change"
            );
            return None;
        }

        let published = self
            .thresholds
            .update(|c| self.apply(c, threshold_delta, ttl_delta));
        let prev = current;

        metrics::set_threshold(published.complexity_threshold);
        info!(
            from = prev.complexity_threshold,
            to = published.complexity_threshold,
            ttl_from_secs = prev.cache_ttl.as_secs(),
            ttl_to_secs = published.cache_ttl.as_secs(),
            generation = published.generation,
            samples = stats.samples,
            remote_failure_rate = stats.remote_failure_rate(),
            near_threshold_negative_rate = stats.near_threshold_negative_rate(),
            cache_hit_rate = stats.cache_hit_rate(),
            "routing threshold adjusted"
        );

        Some(Adjustment {
            previous_threshold: prev.complexity_threshold,
            threshold: published.complexity_threshold,
            previous_cache_ttl: prev.cache_ttl,
            cache_ttl: published.cache_ttl,
            generation: published.generation,
            stats,
        })
    }

    /// Spawn the interval loop. Missed ticks are skipped; the first cycle
    /// runs one interval after spawning.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.interval();
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("threshold controller stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_cycle();
                    }
                }
            }
        })
    }

    fn threshold_delta(&self, stats: &WindowStats) -> f64 {
        let cfg = &self.config;
        let enough_remote = stats.remote_attempts >= cfg.min_samples;
        let failure_rate = stats.remote_failure_rate();

        if enough_remote && failure_rate > cfg.failure_ceiling {
            return cfg.step;
        }
        let remote_healthy = enough_remote && failure_rate <= cfg.failure_ceiling / 2.0;
        if remote_healthy
            && stats.near_threshold_samples >= cfg.min_samples
            && stats.near_threshold_negative_rate() > cfg.poor_feedback_rate
        {
            return -cfg.step;
        }
        0.0
    }

    fn ttl_delta(&self, stats: &WindowStats) -> i64 {
        let cfg = &self.config;
        let step = cfg.ttl_step_secs as i64;
        let hit_rate = stats.cache_hit_rate();
        if stats.cache_lookups > 0 && hit_rate >= cfg.ttl_extend_hit_rate {
            step
        } else if stats.cache_lookups >= cfg.min_samples && hit_rate < cfg.ttl_shrink_hit_rate {
            -step
        } else {
            0
        }
    }

    fn apply(&self, current: &ThresholdConfig, threshold_delta: f64, ttl_delta: i64) -> ThresholdConfig {
        let cfg = &self.config;
        // max/min rather than clamp: an unvalidated config with inverted
        // bounds must not panic the controller task
        let threshold = (current.complexity_threshold + threshold_delta)
            .max(cfg.min_threshold)
            .min(cfg.max_threshold);
        let ttl_secs = (current.cache_ttl.as_secs() as i64 + ttl_delta)
            .max(cfg.ttl_min_secs as i64)
            .min(cfg.ttl_max_secs as i64);
        ThresholdConfig {
            complexity_threshold: threshold,
            cache_ttl: Duration::from_secs(ttl_secs as u64),
            ..current.clone()
        }
    }
}
