//! Query routing.
//!
//! [`QueryRouter`] is the single entry point for callers. Per request it:
//!
//! 1. builds a [`Query`] (normalized text + fingerprint)
//! 2. consults the [`CacheStore`]; a live entry is returned as `cache-hit`
//! 3. scores the query and loads the current [`ThresholdConfig`] snapshot
//! 4. picks the first path: `score >= threshold` goes remote, otherwise
//!    rule-based (a score equal to the threshold goes remote)
//! 5. runs the fallback state machine, each path at most once
//! 6. writes cacheable successes through to the cache
//! 7. records one [`TelemetryEvent`]
//!
//! ```text
//!   TryRemote ──fail──▶ TryLocal ──unsupported──▶ Unavailable
//!   TryLocal ──unsupported──▶ TryRemote ──fail──▶ Unavailable
//! ```
//!
//! The only suspension point is the remote call, which is raced against the
//! caller's [`CancellationToken`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::analysis::AnalysisResult;
use crate::cache::{CacheLookup, CacheStore};
use crate::config::RouterConfig;
use crate::metrics;
use crate::query::{Query, QueryContext};
use crate::remote::{HttpTransport, RemoteAnalysisClient, RemoteFailure};
use crate::rules::{PatternRuleEngine, RuleEngine, Unsupported};
use crate::telemetry::{FeedbackSignal, Outcome, TelemetryCollector, TelemetryEvent};
use crate::RouterError;

use super::scorer::{ComplexityScore, ComplexityScorer};
use super::threshold::{ThresholdConfig, ThresholdHandle};

// ── Decision types ─────────────────────────────────────────────────────

/// Which path a decision selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutePath {
    /// In-process rule engine.
    RuleBased,
    /// Remote statistical/ML backend.
    RemoteMl,
    /// Served from the result cache.
    CacheHit,
}

impl RoutePath {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RuleBased => "rule-based",
            Self::RemoteMl => "remote-ml",
            Self::CacheHit => "cache-hit",
        }
    }
}

/// Which path actually produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServedBy {
    /// Cached result.
    #[serde(rename = "cache-hit")]
    CacheHit,
    /// Rule engine, first choice.
    #[serde(rename = "rule-based")]
    RuleBased,
    /// Remote backend, first choice.
    #[serde(rename = "remote-ml")]
    RemoteMl,
    /// Remote failed; the rule engine answered.
    #[serde(rename = "remote-ml-failed-then-rule-based")]
    RemoteFailedThenRuleBased,
    /// The rule engine had no rule; the remote backend answered.
    #[serde(rename = "rule-unsupported-then-remote-ml")]
    RuleUnsupportedThenRemoteMl,
    /// Nothing answered.
    #[serde(rename = "none")]
    None,
}

impl ServedBy {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CacheHit => "cache-hit",
            Self::RuleBased => "rule-based",
            Self::RemoteMl => "remote-ml",
            Self::RemoteFailedThenRuleBased => "remote-ml-failed-then-rule-based",
            Self::RuleUnsupportedThenRemoteMl => "rule-unsupported-then-remote-ml",
            Self::None => "none",
        }
    }
}

/// Immutable record of one routing decision.
///
/// `threshold` is the snapshot the decision was made with; later swaps
/// never change it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    /// Selected first path.
    pub path: RoutePath,
    /// Complexity score; `None` on a cache hit since scoring is skipped.
    pub score: Option<ComplexityScore>,
    /// Threshold snapshot in effect when deciding.
    pub threshold: Arc<ThresholdConfig>,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
}

/// Successful result of [`QueryRouter::process`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    /// The analysis result.
    pub result: AnalysisResult,
    /// The routing decision.
    pub decision: RoutingDecision,
    /// Which path produced `result`.
    pub served_by: ServedBy,
    /// Request id, matching the telemetry event.
    pub request_id: Uuid,
    /// Time spent in the router.
    pub latency: Duration,
}

// ── Fallback state machine ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    TryRemote,
    TryLocal,
    Unavailable,
}

enum RemoteAttempt {
    Answered(AnalysisResult),
    Failed(RemoteFailure),
    Cancelled,
}

enum Resolution {
    Served {
        result: AnalysisResult,
        producer: RoutePath,
        served_by: ServedBy,
        fallback: bool,
        remote_failure: Option<&'static str>,
    },
    Exhausted {
        remote: Option<RemoteFailure>,
        unsupported: Option<Unsupported>,
    },
    Cancelled,
}

// ── Router ─────────────────────────────────────────────────────────────

/// Hybrid query router.
///
/// `Send + Sync`; share it behind an `Arc` and call [`process`](Self::process)
/// from as many tasks as needed.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use hybrid_query_router::{
///     CacheStore, ComplexityScorer, PatternRuleEngine, QueryContext, QueryRouter,
///     TelemetryCollector, ThresholdConfig, ThresholdHandle, WeightTable,
/// };
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// rt.block_on(async {
///     let router = QueryRouter::new(
///         ComplexityScorer::new(WeightTable::default()),
///         CacheStore::new(1024),
///         ThresholdHandle::new(ThresholdConfig::initial(
///             5.0,
///             Duration::from_secs(300),
///             Duration::from_millis(2_000),
///         )),
///         Arc::new(PatternRuleEngine::new().unwrap()),
///         TelemetryCollector::new(1024),
///     );
///     let out = router
///         .process("show population", QueryContext::new("state:27", "choropleth"))
///         .await
///         .unwrap();
///     assert_eq!(out.served_by.as_str(), "rule-based");
/// });
/// ```
pub struct QueryRouter {
    scorer: ComplexityScorer,
    cache: CacheStore,
    thresholds: ThresholdHandle,
    rules: Arc<dyn RuleEngine>,
    remote: Option<RemoteAnalysisClient>,
    telemetry: TelemetryCollector,
    ml_enabled: bool,
    implicit_feedback_floor: f64,
}

impl std::fmt::Debug for QueryRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRouter")
            .field("scorer", &self.scorer)
            .field("thresholds", &self.thresholds.snapshot())
            .field("remote", &self.remote.is_some())
            .field("ml_enabled", &self.ml_enabled)
            .field("implicit_feedback_floor", &self.implicit_feedback_floor)
            .finish()
    }
}

/// Default confidence below which rule-based answers count as poor.
pub const DEFAULT_IMPLICIT_FEEDBACK_FLOOR: f64 = 0.5;

impl QueryRouter {
    /// Create a router with no remote backend.
    ///
    /// Attach one with [`with_remote`](Self::with_remote).
    pub fn new(
        scorer: ComplexityScorer,
        cache: CacheStore,
        thresholds: ThresholdHandle,
        rules: Arc<dyn RuleEngine>,
        telemetry: TelemetryCollector,
    ) -> Self {
        Self {
            scorer,
            cache,
            thresholds,
            rules,
            remote: None,
            telemetry,
            ml_enabled: true,
            implicit_feedback_floor: DEFAULT_IMPLICIT_FEEDBACK_FLOOR,
        }
    }

    /// Build every component from a [`RouterConfig`].
    ///
    /// When `remote_base_url` is set an [`HttpTransport`] is attached.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Config`] if the rule patterns or the HTTP
    /// client cannot be built.
    pub fn from_config(config: &RouterConfig) -> Result<Self, RouterError> {
        let mut router = Self::new(
            ComplexityScorer::new(config.weights.clone()),
            CacheStore::new(config.cache_capacity),
            ThresholdHandle::new(config.to_threshold_config()),
            Arc::new(PatternRuleEngine::new()?),
            TelemetryCollector::new(config.telemetry_capacity),
        )
        .with_ml_enabled(config.ml_enabled)
        .with_implicit_feedback_floor(config.implicit_feedback_floor);

        if let Some(url) = config.remote_base_url.as_deref() {
            let transport = HttpTransport::new(url)?;
            router.remote = Some(RemoteAnalysisClient::new(Arc::new(transport)));
        }
        Ok(router)
    }

    /// Attach a remote analysis client.
    pub fn with_remote(mut self, client: RemoteAnalysisClient) -> Self {
        self.remote = Some(client);
        self
    }

    /// Enable or disable the remote path. Disabled means never invoked.
    pub fn with_ml_enabled(mut self, enabled: bool) -> Self {
        self.ml_enabled = enabled;
        self
    }

    /// Rule-based results below this confidence are recorded as negative
    /// feedback.
    pub fn with_implicit_feedback_floor(mut self, floor: f64) -> Self {
        self.implicit_feedback_floor = floor.clamp(0.0, 1.0);
        self
    }

    /// `true` when the remote path may be invoked.
    pub fn remote_enabled(&self) -> bool {
        self.ml_enabled && self.remote.is_some()
    }

    /// The result cache.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// The shared threshold handle.
    pub fn thresholds(&self) -> &ThresholdHandle {
        &self.thresholds
    }

    /// The telemetry collector.
    pub fn telemetry(&self) -> &TelemetryCollector {
        &self.telemetry
    }

    /// The complexity scorer.
    pub fn scorer(&self) -> &ComplexityScorer {
        &self.scorer
    }

    /// Route and answer one query.
    ///
    /// # Errors
    ///
    /// - [`RouterError::InvalidQuery`] for empty text
    /// - [`RouterError::AnalysisUnavailable`] when every permitted path failed
    pub async fn process(
        &self,
        raw: &str,
        context: QueryContext,
    ) -> Result<ProcessOutcome, RouterError> {
        self.process_with_cancel(raw, context, &CancellationToken::new())
            .await
    }

    /// Like [`process`](Self::process), abandoning the remote call when
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`process`](Self::process), plus [`RouterError::Cancelled`].
    pub async fn process_with_cancel(
        &self,
        raw: &str,
        context: QueryContext,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, RouterError> {
        let query = Query::new(raw, context)?;
        self.process_query(&query, cancel).await
    }

    /// Route an already-built [`Query`].
    ///
    /// # Errors
    ///
    /// As [`process_with_cancel`](Self::process_with_cancel).
    pub async fn process_query(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, RouterError> {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        let key = query.fingerprint();

        let lookup = if query.is_session_bound() {
            debug!(%request_id, key = %key, "session-bound query bypasses cache");
            CacheLookup::Miss
        } else {
            self.cache.get(key)
        };
        if let CacheLookup::Hit(hit) = lookup {
            debug!(
                %request_id,
                key = %key,
                produced_by = hit.produced_by.as_str(),
                hits = hit.hit_count,
                "cache hit"
            );
            let decision = RoutingDecision {
                path: RoutePath::CacheHit,
                score: None,
                threshold: self.thresholds.snapshot(),
                decided_at: Utc::now(),
            };
            return Ok(self.finish(
                request_id,
                decision,
                ServedBy::CacheHit,
                Outcome::Success,
                None,
                None,
                hit.result,
                started,
            ));
        }

        let score = self.scorer.score(query)?;
        let snapshot = self.thresholds.snapshot();
        let path = if self.remote_enabled() && score.score >= snapshot.complexity_threshold {
            RoutePath::RemoteMl
        } else {
            RoutePath::RuleBased
        };
        debug!(
            %request_id,
            key = %key,
            score = score.score,
            threshold = snapshot.complexity_threshold,
            generation = snapshot.generation,
            path = path.as_str(),
            "routing decision"
        );
        let decision = RoutingDecision {
            path,
            score: Some(score),
            threshold: Arc::clone(&snapshot),
            decided_at: Utc::now(),
        };

        match self.resolve(query, path, &snapshot, cancel).await {
            Resolution::Served {
                result,
                producer,
                served_by,
                fallback,
                remote_failure,
            } => {
                if result.cacheability.is_cacheable() {
                    self.cache
                        .put(key.clone(), &result, producer, snapshot.cache_ttl);
                }
                let feedback = (producer == RoutePath::RuleBased).then(|| {
                    if result.confidence < self.implicit_feedback_floor {
                        FeedbackSignal::Negative
                    } else {
                        FeedbackSignal::Positive
                    }
                });
                let outcome = if fallback {
                    Outcome::FallbackSuccess
                } else {
                    Outcome::Success
                };
                Ok(self.finish(
                    request_id,
                    decision,
                    served_by,
                    outcome,
                    feedback,
                    remote_failure,
                    result,
                    started,
                ))
            }
            Resolution::Exhausted {
                remote,
                unsupported,
            } => {
                let outcome = if remote.as_ref().is_some_and(RemoteFailure::is_timeout) {
                    Outcome::Timeout
                } else {
                    Outcome::Error
                };
                self.record(
                    request_id,
                    decision,
                    ServedBy::None,
                    outcome,
                    None,
                    remote.as_ref().map(RemoteFailure::kind),
                    started,
                );
                Err(RouterError::unavailable(describe_exhausted(
                    remote.as_ref(),
                    unsupported.as_ref(),
                )))
            }
            Resolution::Cancelled => {
                debug!(%request_id, key = %key, "request cancelled during remote analysis");
                self.record(
                    request_id,
                    decision,
                    ServedBy::None,
                    Outcome::Cancelled,
                    None,
                    None,
                    started,
                );
                Err(RouterError::Cancelled)
            }
        }
    }

    /// Run the fallback state machine starting from `first`.
    async fn resolve(
        &self,
        query: &Query,
        first: RoutePath,
        snapshot: &ThresholdConfig,
        cancel: &CancellationToken,
    ) -> Resolution {
        let mut stage = match first {
            RoutePath::RemoteMl => Stage::TryRemote,
            _ => Stage::TryLocal,
        };
        let mut remote_tried = false;
        let mut local_tried = false;
        let mut remote_failure = None;
        let mut unsupported = None;

        loop {
            stage = match stage {
                Stage::TryRemote => {
                    remote_tried = true;
                    match self.call_remote(query, snapshot.remote_timeout, cancel).await {
                        RemoteAttempt::Answered(result) => {
                            return Resolution::Served {
                                result,
                                producer: RoutePath::RemoteMl,
                                served_by: if local_tried {
                                    ServedBy::RuleUnsupportedThenRemoteMl
                                } else {
                                    ServedBy::RemoteMl
                                },
                                fallback: local_tried,
                                remote_failure: None,
                            };
                        }
                        RemoteAttempt::Cancelled => return Resolution::Cancelled,
                        RemoteAttempt::Failed(failure) => {
                            warn!(
                                key = %query.fingerprint(),
                                kind = failure.kind(),
                                error = %failure,
                                "remote analysis failed"
                            );
                            remote_failure = Some(failure);
                            if local_tried {
                                Stage::Unavailable
                            } else {
                                Stage::TryLocal
                            }
                        }
                    }
                }
                Stage::TryLocal => {
                    local_tried = true;
                    match self.rules.evaluate(query) {
                        Ok(result) => {
                            return Resolution::Served {
                                result,
                                producer: RoutePath::RuleBased,
                                served_by: if remote_tried {
                                    ServedBy::RemoteFailedThenRuleBased
                                } else {
                                    ServedBy::RuleBased
                                },
                                fallback: remote_tried,
                                remote_failure: remote_failure.as_ref().map(RemoteFailure::kind),
                            };
                        }
                        Err(e) => {
                            debug!(key = %query.fingerprint(), reason = %e.reason, "rule engine unsupported");
                            unsupported = Some(e);
                            if !remote_tried && self.remote_enabled() {
                                Stage::TryRemote
                            } else {
                                Stage::Unavailable
                            }
                        }
                    }
                }
                Stage::Unavailable => {
                    return Resolution::Exhausted {
                        remote: remote_failure,
                        unsupported,
                    };
                }
            };
        }
    }

    async fn call_remote(
        &self,
        query: &Query,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> RemoteAttempt {
        let Some(client) = self.remote.as_ref().filter(|_| self.ml_enabled) else {
            return RemoteAttempt::Failed(RemoteFailure::Unavailable(
                "remote analysis disabled".to_string(),
            ));
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => RemoteAttempt::Cancelled,
            reply = client.analyze(query, timeout) => match reply {
                Ok(result) => RemoteAttempt::Answered(result),
                Err(failure) => RemoteAttempt::Failed(failure),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        request_id: Uuid,
        decision: RoutingDecision,
        served_by: ServedBy,
        outcome: Outcome,
        feedback: Option<FeedbackSignal>,
        remote_failure: Option<&'static str>,
        result: AnalysisResult,
        started: Instant,
    ) -> ProcessOutcome {
        let latency = self.record(
            request_id,
            decision.clone(),
            served_by,
            outcome,
            feedback,
            remote_failure,
            started,
        );
        ProcessOutcome {
            result,
            decision,
            served_by,
            request_id,
            latency,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        request_id: Uuid,
        decision: RoutingDecision,
        served_by: ServedBy,
        outcome: Outcome,
        feedback: Option<FeedbackSignal>,
        remote_failure: Option<&'static str>,
        started: Instant,
    ) -> Duration {
        let latency = started.elapsed();
        metrics::record_request(
            served_by.as_str(),
            outcome.as_str(),
            decision.path.as_str(),
            latency,
        );
        self.telemetry.record(TelemetryEvent {
            request_id,
            decision,
            served_by,
            latency,
            outcome,
            feedback,
            remote_failure,
            recorded_at: Utc::now(),
        });
        latency
    }
}

fn describe_exhausted(remote: Option<&RemoteFailure>, unsupported: Option<&Unsupported>) -> String {
    match (remote, unsupported) {
        (Some(RemoteFailure::Timeout { .. }), Some(_)) => {
            "remote analysis timed out and no local rule applies".to_string()
        }
        (Some(f), Some(_)) => format!(
            "remote analysis failed ({}) and no local rule applies",
            f.kind()
        ),
        (Some(f), None) => format!("remote analysis failed ({})", f.kind()),
        (None, Some(_)) => "no local rule applies and remote analysis is disabled".to_string(),
        (None, None) => "no analysis path available".to_string(),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
