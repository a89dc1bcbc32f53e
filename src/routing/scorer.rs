//! Query complexity scoring.
//!
//! Analyses a [`Query`] and produces a complexity score in the range
//! `0.0..=10.0`. The router compares it against the current threshold:
//!
//! | Score                  | Route                                  |
//! |------------------------|----------------------------------------|
//! | `< threshold`          | Rule engine (in-process, fast)         |
//! | `>= threshold`         | Remote statistical backend             |
//!
//! ## Indicators
//!
//! 1. **Statistical terms**: "correlation", "confidence interval", … counted
//! 2. **Requested parameters**: content words left after removing stop
//!    words, command verbs and indicator vocabulary, counted
//! 3. **Temporal forecast**: "forecast", "next year", "over time", …
//! 4. **Spatial relationships**: "near", "within", "adjacent", "versus", …
//!
//! Each indicator is multiplied by its weight from the injected
//! [`WeightTable`]; the sum is clamped to `[0.0, 10.0]`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::query::Query;
use crate::RouterError;

/// Upper bound of the score range.
pub const MAX_SCORE: f64 = 10.0;

pub(crate) const STATISTICAL_TERMS: &[&str] = &[
    "correlation",
    "correlate",
    "correlated",
    "regression",
    "confidence interval",
    "standard deviation",
    "variance",
    "covariance",
    "significance",
    "statistically significant",
    "p value",
    "hypothesis",
    "anomaly",
    "anomalies",
    "outlier",
    "outliers",
    "cluster analysis",
    "clustering",
    "distribution",
    "r squared",
    "z score",
    "predictive model",
];

const TEMPORAL_TERMS: &[&str] = &[
    "forecast",
    "forecasting",
    "predict",
    "prediction",
    "projection",
    "projected",
    "trend",
    "trends",
    "next year",
    "next quarter",
    "next month",
    "over time",
    "future",
    "growth rate",
];

const SPATIAL_TERMS: &[&str] = &[
    "near",
    "nearby",
    "within",
    "adjacent",
    "neighboring",
    "neighbouring",
    "proximity",
    "distance",
    "radius",
    "hotspot",
    "hotspots",
    "versus",
    "vs",
    "compared to",
    "overlap",
    "intersect",
    "surrounding",
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "of", "in", "on", "for", "to", "and", "or", "with", "by", "between", "per",
    "is", "are", "was", "were", "what", "which", "how", "me", "my", "our", "all", "each", "from",
    "at", "as", "this", "that", "these", "those", "its", "it", "do", "does", "be", "there", "their",
    "top", "bottom", "highest", "lowest", "most", "least", "average", "avg", "mean", "sum",
    "total", "count", "number", "many", "much", "area", "areas", "region", "regions", "here",
];

const COMMAND_VERBS: &[&str] = &[
    "show", "display", "list", "give", "get", "find", "map", "plot", "tell", "compute",
    "calculate", "visualize", "visualise", "compare", "rank", "whats",
];

// ── Weight table ───────────────────────────────────────────────────────

fn default_statistical_weight() -> f64 {
    2.5
}

fn default_parameter_weight() -> f64 {
    1.2
}

fn default_temporal_weight() -> f64 {
    2.0
}

fn default_spatial_weight() -> f64 {
    1.5
}

fn default_advanced_cutoff() -> f64 {
    7.0
}

fn default_max_statistical_terms() -> usize {
    3
}

fn default_max_parameters() -> usize {
    5
}

/// Indicator weights for the [`ComplexityScorer`].
///
/// These are business configuration, loaded from the `[weights]` table of
/// the router config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct WeightTable {
    /// Score added per distinct statistical term.
    #[serde(default = "default_statistical_weight")]
    pub statistical_term: f64,
    /// Score added per requested parameter.
    #[serde(default = "default_parameter_weight")]
    pub parameter: f64,
    /// Score added when temporal-forecast language is present.
    #[serde(default = "default_temporal_weight")]
    pub temporal_forecast: f64,
    /// Score added when multi-entity spatial language is present.
    #[serde(default = "default_spatial_weight")]
    pub spatial_relationship: f64,
    /// Scores at or above this mark `requires_advanced_processing`.
    #[serde(default = "default_advanced_cutoff")]
    pub advanced_cutoff: f64,
    /// Statistical terms beyond this count add nothing.
    #[serde(default = "default_max_statistical_terms")]
    pub max_statistical_terms: usize,
    /// Parameters beyond this count add nothing.
    #[serde(default = "default_max_parameters")]
    pub max_parameters: usize,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            statistical_term: default_statistical_weight(),
            parameter: default_parameter_weight(),
            temporal_forecast: default_temporal_weight(),
            spatial_relationship: default_spatial_weight(),
            advanced_cutoff: default_advanced_cutoff(),
            max_statistical_terms: default_max_statistical_terms(),
            max_parameters: default_max_parameters(),
        }
    }
}

// ── Score types ────────────────────────────────────────────────────────

/// Breakdown of individual indicator contributions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Distinct statistical terms found (before the cap).
    pub statistical_terms: usize,
    /// Contribution from statistical terms.
    pub statistical: f64,
    /// Distinct requested parameters found (before the cap).
    pub parameters: usize,
    /// Contribution from requested parameters.
    pub parameter: f64,
    /// Whether temporal-forecast language was found.
    pub temporal_forecast: bool,
    /// Contribution from temporal-forecast language.
    pub temporal: f64,
    /// Whether multi-entity spatial language was found.
    pub spatial_relationship: bool,
    /// Contribution from spatial language.
    pub spatial: f64,
}

/// Complexity of a single query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityScore {
    /// Clamped score in `[0.0, 10.0]`.
    pub score: f64,
    /// `score >= WeightTable::advanced_cutoff`.
    pub requires_advanced_processing: bool,
    /// Per-indicator contributions.
    pub breakdown: ScoreBreakdown,
}

// ── Scorer ─────────────────────────────────────────────────────────────

/// A query complexity scorer.
///
/// Stateless apart from its weight table; identical input always yields an
/// identical [`ComplexityScore`].
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Clone, Default)]
pub struct ComplexityScorer {
    weights: WeightTable,
}

impl ComplexityScorer {
    /// Create a scorer with the given weight table.
    pub fn new(weights: WeightTable) -> Self {
        Self { weights }
    }

    /// The weight table in use.
    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }

    /// Score a query for complexity.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidQuery`] if the query has no words left
    /// after normalization.
    ///
    /// # Example
    ///
    /// ```rust
    /// use hybrid_query_router::{ComplexityScorer, Query, QueryContext, WeightTable};
    /// let scorer = ComplexityScorer::new(WeightTable::default());
    /// let query = Query::new("show population", QueryContext::new("state:27", "choropleth")).unwrap();
    /// let score = scorer.score(&query).unwrap();
    /// assert!(score.score < 5.0);
    /// ```
    pub fn score(&self, query: &Query) -> Result<ComplexityScore, RouterError> {
        self.score_text(query.normalized())
    }

    /// Score already-normalized text. Exposed for diagnostics and benches.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidQuery`] if `text` has no words.
    pub fn score_text(&self, text: &str) -> Result<ComplexityScore, RouterError> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Err(RouterError::InvalidQuery(
                "query has no words to score".to_string(),
            ));
        }
        let spaced = format!(" {} ", tokens.join(" "));
        let w = &self.weights;

        let statistical_terms = count_phrases(&spaced, STATISTICAL_TERMS);
        let parameters = count_parameters(&tokens);
        let temporal_forecast = count_phrases(&spaced, TEMPORAL_TERMS) > 0;
        let spatial_relationship = count_phrases(&spaced, SPATIAL_TERMS) > 0;

        let statistical = statistical_terms.min(w.max_statistical_terms) as f64 * w.statistical_term;
        let parameter = parameters.min(w.max_parameters) as f64 * w.parameter;
        let temporal = if temporal_forecast {
            w.temporal_forecast
        } else {
            0.0
        };
        let spatial = if spatial_relationship {
            w.spatial_relationship
        } else {
            0.0
        };

        let score = clamp_score(statistical + parameter + temporal + spatial);

        Ok(ComplexityScore {
            score,
            requires_advanced_processing: score >= w.advanced_cutoff,
            breakdown: ScoreBreakdown {
                statistical_terms,
                statistical,
                parameters,
                parameter,
                temporal_forecast,
                temporal,
                spatial_relationship,
                spatial,
            },
        })
    }
}

/// Clamp a raw score to `[0.0, MAX_SCORE]`.
fn clamp_score(raw: f64) -> f64 {
    raw.clamp(0.0, MAX_SCORE)
}

/// Split on anything that is not alphanumeric; apostrophes are dropped so
/// "what's" becomes "whats".
fn tokenize(text: &str) -> Vec<String> {
    text.replace('\'', "")
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Count distinct vocabulary phrases present as whole-word sequences.
fn count_phrases(spaced: &str, vocabulary: &[&str]) -> usize {
    vocabulary
        .iter()
        .filter(|phrase| spaced.contains(&format!(" {phrase} ")))
        .count()
}

/// Count distinct content words: not stop words, not command verbs, not
/// part of any indicator vocabulary, not pure numbers.
fn count_parameters(tokens: &[String]) -> usize {
    let mut seen = BTreeSet::new();
    for token in tokens {
        let t = token.as_str();
        if t.len() < 2
            || t.chars().all(|c| c.is_ascii_digit())
            || STOP_WORDS.contains(&t)
            || COMMAND_VERBS.contains(&t)
            || in_vocabulary(t)
        {
            continue;
        }
        seen.insert(t);
    }
    seen.len()
}

fn in_vocabulary(token: &str) -> bool {
    [STATISTICAL_TERMS, TEMPORAL_TERMS, SPATIAL_TERMS]
        .iter()
        .flat_map(|list| list.iter())
        .any(|phrase| phrase.split(' ').any(|word| word == token))
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryContext;

    fn scorer() -> ComplexityScorer {
        ComplexityScorer::new(WeightTable::default())
    }

    fn query(text: &str) -> Query {
        Query::new(text, QueryContext::new("county:27053", "choropleth")).unwrap()
    }

    // -- clamp -----------------------------------------------------------

    #[test]
    fn test_clamp_score_negative_returns_zero() {
        assert!(clamp_score(-0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clamp_score_above_max_returns_max() {
        assert!((clamp_score(12.5) - MAX_SCORE).abs() < f64::EPSILON);
    }

    // -- simple queries → low score --------------------------------------

    #[test]
    fn test_score_show_population_is_one_parameter() {
        let s = scorer().score(&query("show population")).unwrap();
        assert!((s.score - 1.2).abs() < 1e-9, "got {}", s.score);
        assert_eq!(s.breakdown.parameters, 1);
        assert_eq!(s.breakdown.statistical_terms, 0);
        assert!(!s.requires_advanced_processing);
    }

    #[test]
    fn test_score_top_n_query_stays_low() {
        let s = scorer()
            .score(&query("top 10 zip codes by median income"))
            .unwrap();
        assert!(s.score < 5.0, "got {}", s.score);
    }

    // -- statistical queries → high score --------------------------------

    #[test]
    fn test_score_correlation_with_confidence_interval_is_advanced() {
        let s = scorer()
            .score(&query(
                "correlation between income and age with confidence interval",
            ))
            .unwrap();
        assert!(s.score >= 7.0, "got {}", s.score);
        assert!(s.requires_advanced_processing);
        assert_eq!(s.breakdown.statistical_terms, 2);
        assert_eq!(s.breakdown.parameters, 2);
    }

    #[test]
    fn test_temporal_forecast_detected() {
        let s = scorer()
            .score(&query("forecast housing prices next year"))
            .unwrap();
        assert!(s.breakdown.temporal_forecast);
        assert!((s.breakdown.temporal - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_spatial_relationship_detected() {
        let s = scorer()
            .score(&query("grocery stores within 2 miles of schools"))
            .unwrap();
        assert!(s.breakdown.spatial_relationship);
        assert!(!s.breakdown.temporal_forecast);
    }

    #[test]
    fn test_phrase_match_requires_whole_words() {
        // "nearest" must not trigger "near"
        let s = scorer().score(&query("show nearest hospital")).unwrap();
        assert!(!s.breakdown.spatial_relationship);
    }

    // -- caps and bounds -------------------------------------------------

    #[test]
    fn test_parameter_contribution_is_capped() {
        let s = scorer()
            .score(&query(
                "show income age population households rent vacancy commute education",
            ))
            .unwrap();
        assert!(s.breakdown.parameters > 5);
        assert!((s.breakdown.parameter - 5.0 * 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_score_never_exceeds_max() {
        let text = "forecast regression correlation variance outliers clustering anomaly \
                    near within income age rent vacancy households commute over time";
        let s = scorer().score(&query(text)).unwrap();
        assert!(s.score <= MAX_SCORE);
        assert!(s.score >= 0.0);
    }

    #[test]
    fn test_custom_weights_change_score() {
        let heavy = ComplexityScorer::new(WeightTable {
            parameter: 3.0,
            ..WeightTable::default()
        });
        let s = heavy.score(&query("show population")).unwrap();
        assert!((s.score - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_weights_score_zero() {
        let flat = ComplexityScorer::new(WeightTable {
            statistical_term: 0.0,
            parameter: 0.0,
            temporal_forecast: 0.0,
            spatial_relationship: 0.0,
            ..WeightTable::default()
        });
        let s = flat
            .score(&query("forecast correlation near income"))
            .unwrap();
        assert!(s.score.abs() < f64::EPSILON);
    }

    // -- determinism and errors ------------------------------------------

    #[test]
    fn test_score_is_deterministic() {
        let sc = scorer();
        let q = query("regression of rent on income near transit over time");
        assert_eq!(sc.score(&q).unwrap(), sc.score(&q).unwrap());
    }

    #[test]
    fn test_score_text_empty_is_invalid_query() {
        assert!(matches!(
            scorer().score_text("   "),
            Err(RouterError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_score_text_symbols_only_is_invalid_query() {
        assert!(matches!(
            scorer().score_text("--- ### !!!"),
            Err(RouterError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_weight_table_deserializes_partial() {
        let table: WeightTable = toml::from_str("parameter = 2.0").unwrap();
        assert!((table.parameter - 2.0).abs() < f64::EPSILON);
        assert!((table.statistical_term - 2.5).abs() < f64::EPSILON);
        assert_eq!(table.max_parameters, 5);
    }
}
