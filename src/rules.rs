//! Local rule-based processing.
//!
//! The [`RuleEngine`] trait is the seam the router calls for the local path.
//! [`PatternRuleEngine`] is the default implementation: an ordered list of
//! regex shapes over the normalized query text. The first shape that
//! matches produces the result; no match is [`Unsupported`].
//!
//! Shapes, in match order:
//!
//! | shape       | example                                 | fidelity |
//! |-------------|-----------------------------------------|----------|
//! | rank        | `top 5 counties by median income`       | full     |
//! | count       | `how many hospitals`                    | full     |
//! | compare     | `compare income and rent`               | full     |
//! | aggregate   | `average household size`                | full     |
//! | statistical | `correlation between income and age`    | degraded |
//! | show        | `show population`                       | full     |
//!
//! Statistical requests are answered with a descriptive summary only; they
//! carry [`Fidelity::Degraded`] and low confidence.

use regex::Regex;
use serde_json::{json, Value};
use thiserror::Error;

use crate::analysis::{AnalysisResult, Cacheability, Fidelity};
use crate::query::Query;
use crate::routing::scorer::STATISTICAL_TERMS;
use crate::RouterError;

/// The rule engine has no rule for this query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no rule matches query: {reason}")]
pub struct Unsupported {
    /// Why the query was rejected.
    pub reason: String,
}

impl Unsupported {
    /// Build from any message.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Deterministic local processor.
///
/// Implementations must not block for long and must not perform I/O; the
/// router calls them inline on the request task.
pub trait RuleEngine: Send + Sync {
    /// Produce a result for `query`, or [`Unsupported`] if no rule applies.
    fn evaluate(&self, query: &Query) -> Result<AnalysisResult, Unsupported>;
}

/// Which rule shape answered a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Rank,
    Count,
    Compare,
    Aggregate,
    Statistical,
    Show,
}

impl Shape {
    fn as_str(self) -> &'static str {
        match self {
            Self::Rank => "rank",
            Self::Count => "count",
            Self::Compare => "compare",
            Self::Aggregate => "aggregate",
            Self::Statistical => "statistical_summary",
            Self::Show => "show",
        }
    }

    fn confidence(self) -> f64 {
        match self {
            Self::Show => 0.9,
            Self::Rank | Self::Count => 0.85,
            Self::Aggregate => 0.8,
            Self::Compare => 0.75,
            Self::Statistical => 0.35,
        }
    }
}

const RANK: &str = r"^(?:show |list |what are the )?(?:the )?(top|bottom) (\d{1,3})(?: (.+?))? by (.+)$";
const COUNT: &str = r"^(?:how many|count(?: of)?|number of) (.+?)(?: are there)?(?: in .+)?$";
const COMPARE: &str = r"^compare (.+?) (?:and|with|to|vs|versus) (.+)$";
const AGGREGATE: &str = r"^(?:what is |what's )?(?:the )?(average|mean|median|sum|total) (?:of )?(.+)$";
const CORRELATION: &str = r"(?:correlation|relationship) between (.+?) and (.+?)(?: with .*| in .*)?$";
const SHOW: &str = r"^(?:show|display|map|view|get|list)(?: me)?(?: the)? (.+)$";

/// Default regex-driven [`RuleEngine`].
#[derive(Debug, Clone)]
pub struct PatternRuleEngine {
    rank: Regex,
    count: Regex,
    compare: Regex,
    aggregate: Regex,
    correlation: Regex,
    show: Regex,
}

impl PatternRuleEngine {
    /// Compile the built-in shapes.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Config`] if a pattern fails to compile.
    pub fn new() -> Result<Self, RouterError> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| RouterError::Config(format!("invalid rule pattern: {e}")))
        };
        Ok(Self {
            rank: compile(RANK)?,
            count: compile(COUNT)?,
            compare: compile(COMPARE)?,
            aggregate: compile(AGGREGATE)?,
            correlation: compile(CORRELATION)?,
            show: compile(SHOW)?,
        })
    }

    fn match_shape(&self, text: &str) -> Option<(Shape, Value)> {
        if let Some(c) = self.rank.captures(text) {
            let n: u32 = c.get(2)?.as_str().parse().ok()?;
            return Some((
                Shape::Rank,
                json!({
                    "order": if &c[1] == "top" { "desc" } else { "asc" },
                    "limit": n,
                    "entity": c.get(3).map(|m| m.as_str()),
                    "metric": &c[4],
                }),
            ));
        }
        if let Some(c) = self.count.captures(text) {
            return Some((Shape::Count, json!({ "entity": &c[1] })));
        }
        if let Some(c) = self.compare.captures(text) {
            return Some((Shape::Compare, json!({ "metrics": [&c[1], &c[2]] })));
        }
        if let Some(c) = self.aggregate.captures(text) {
            let op = match &c[1] {
                "mean" => "average",
                "total" => "sum",
                other => other,
            };
            return Some((Shape::Aggregate, json!({ "op": op, "metric": &c[2] })));
        }
        if let Some(c) = self.correlation.captures(text) {
            return Some((
                Shape::Statistical,
                json!({ "requested": "correlation", "metrics": [&c[1], &c[2]] }),
            ));
        }
        let padded = format!(" {text} ");
        if let Some(term) = STATISTICAL_TERMS
            .iter()
            .find(|t| padded.contains(&format!(" {t} ")))
        {
            return Some((Shape::Statistical, json!({ "requested": term })));
        }
        if let Some(c) = self.show.captures(text) {
            return Some((Shape::Show, json!({ "metric": &c[1] })));
        }
        None
    }
}

impl RuleEngine for PatternRuleEngine {
    fn evaluate(&self, query: &Query) -> Result<AnalysisResult, Unsupported> {
        let text = query.normalized();
        let (shape, mut detail) = self
            .match_shape(text)
            .ok_or_else(|| Unsupported::new(format!("no rule shape for '{text}'")))?;

        let ctx = query.context();
        if let Some(obj) = detail.as_object_mut() {
            obj.insert("shape".into(), json!(shape.as_str()));
            obj.insert("geo_scope".into(), json!(ctx.geo_scope));
            if !ctx.selection.is_empty() {
                obj.insert("regions".into(), json!(ctx.selection));
            }
        }

        let fidelity = if shape == Shape::Statistical {
            Fidelity::Degraded
        } else {
            Fidelity::Full
        };

        let cacheability = if query.is_session_bound() {
            Cacheability::SessionSpecific
        } else {
            Cacheability::Deterministic
        };

        Ok(AnalysisResult::new(detail)
            .with_confidence(shape.confidence())
            .with_fidelity(fidelity)
            .with_cacheability(cacheability))
    }
}
