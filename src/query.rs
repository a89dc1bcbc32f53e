//! Query model and fingerprinting.
//!
//! A [`Query`] is built once per incoming request and never mutated. Its
//! [`Fingerprint`] is the cache key: a SHA-256 over the normalized text and
//! the context fields that change the answer (geographic scope, analysis
//! hint, map selection). Conversation turn count and session id do not
//! participate.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::RouterError;

/// Caller-supplied context that accompanies the query text.
///
/// The scope and hint strings are opaque to the router.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryContext {
    /// Geographic scope identifier (e.g. a county FIPS code or a saved area id).
    pub geo_scope: String,
    /// Analysis-type hint produced by the upstream visualization classifier.
    pub analysis_hint: String,
    /// Region ids currently selected on the map.
    #[serde(default)]
    pub selection: Vec<String>,
    /// Number of prior turns in the conversation.
    #[serde(default)]
    pub turn_count: u32,
    /// Session the request belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl QueryContext {
    /// Create a context with the two required opaque identifiers.
    pub fn new(geo_scope: impl Into<String>, analysis_hint: impl Into<String>) -> Self {
        Self {
            geo_scope: geo_scope.into(),
            analysis_hint: analysis_hint.into(),
            ..Self::default()
        }
    }

    /// Attach the current map selection.
    pub fn with_selection<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection = regions.into_iter().map(Into::into).collect();
        self
    }

    /// Set the prior conversation turn count.
    pub fn with_turn_count(mut self, turns: u32) -> Self {
        self.turn_count = turns;
        self
    }

    /// Tie the request to a user session.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Words that tie a query to the caller's session.
const SESSION_WORDS: &[&str] = &["my", "mine", "our", "previous", "last", "earlier", "same"];

/// Stable, hex-encoded hash of a query's normalized text and relevant context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint for normalized text plus context.
    pub fn compute(normalized_text: &str, context: &QueryContext) -> Self {
        let mut selection: Vec<&str> = context.selection.iter().map(String::as_str).collect();
        selection.sort_unstable();
        selection.dedup();

        let mut hasher = Sha256::new();
        hasher.update(normalized_text.as_bytes());
        hasher.update([0u8]);
        hasher.update(context.geo_scope.as_bytes());
        hasher.update([0u8]);
        hasher.update(context.analysis_hint.as_bytes());
        for region in selection {
            hasher.update([0u8]);
            hasher.update(region.as_bytes());
        }

        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    /// Return the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to correlate log lines.
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}

/// An immutable analysis query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    raw: String,
    normalized: String,
    fingerprint: Fingerprint,
    context: QueryContext,
}

impl Query {
    /// Normalize `raw`, fingerprint it and bundle it with `context`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidQuery`] if the text is empty or only
    /// whitespace.
    pub fn new(raw: impl Into<String>, context: QueryContext) -> Result<Self, RouterError> {
        let raw = raw.into();
        let normalized = normalize(&raw);
        if normalized.is_empty() {
            return Err(RouterError::InvalidQuery(
                "query text is empty after normalization".to_string(),
            ));
        }
        let fingerprint = Fingerprint::compute(&normalized, &context);
        Ok(Self {
            raw,
            normalized,
            fingerprint,
            context,
        })
    }

    /// The text exactly as the caller supplied it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Lower-cased text with runs of whitespace collapsed to one space.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Cache key for this query.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Caller-supplied context.
    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    /// Return `true` if the text refers to the caller's own state ("my saved
    /// regions") and a session id is attached.
    ///
    /// The session id is not part of the fingerprint, so answers to these
    /// queries must neither be read from nor written to the shared cache.
    pub fn is_session_bound(&self) -> bool {
        self.context.session_id.is_some()
            && self
                .normalized
                .split_whitespace()
                .any(|w| SESSION_WORDS.contains(&w))
    }
}

/// Lower-case and collapse whitespace. Trailing `?`/`.`/`!` are dropped so
/// "show population?" and "Show population" share a cache entry.
pub fn normalize(raw: &str) -> String {
    let joined = raw
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    joined
        .trim_end_matches(['?', '.', '!'])
        .trim_end()
        .to_string()
}
