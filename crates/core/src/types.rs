//! Domain models for recognition results
//!
//! This module contains the value types that flow through the engine:
//! - `IntentResult`: one recognition outcome plus its evidence
//! - `RecognizerKind`: the recognizer family, used by the merge policy
//! - `Slots` / `Metadata`: open maps attached to a result

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sentinel intent for "nothing matched"
pub const UNKNOWN_INTENT: &str = "unknown";

/// Slot name -> extracted value (plain strings for regex fills, any JSON for plugins)
pub type Slots = BTreeMap<String, Value>;

/// Recognizer-specific auxiliary data, opaque to the engine
pub type Metadata = serde_json::Map<String, Value>;

// ============================================================================
// Recognizer Kind
// ============================================================================

/// Family of the recognizer that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognizerKind {
    /// Regex rules; near-authoritative once above the high-confidence threshold
    Pattern,
    /// Weighted keyword tiers
    Keyword,
    /// Anything registered from outside the crate
    Custom,
}

impl RecognizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecognizerKind::Pattern => "pattern",
            RecognizerKind::Keyword => "keyword",
            RecognizerKind::Custom => "custom",
        }
    }
}

// ============================================================================
// Intent Result
// ============================================================================

/// Outcome of one recognition attempt
///
/// `intent == "unknown"` holds exactly when `confidence == 0.0` and
/// `matched_rules` is empty. Recognizers signal "no opinion" with `None`
/// rather than with an unknown result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: String,
    pub confidence: f64,
    /// Name of the producing recognizer
    #[serde(default)]
    pub recognizer: String,
    #[serde(default)]
    pub slots: Slots,
    /// Rule identifiers that justified the result (e.g. `regex_refund_0`)
    #[serde(default)]
    pub matched_rules: Vec<String>,
    /// Capture groups or matched keywords behind the result
    #[serde(default)]
    pub raw_matches: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl IntentResult {
    /// The "nothing matched" result
    pub fn unknown() -> Self {
        Self {
            intent: UNKNOWN_INTENT.to_string(),
            confidence: 0.0,
            recognizer: String::new(),
            slots: Slots::new(),
            matched_rules: Vec::new(),
            raw_matches: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn matched(
        intent: impl Into<String>,
        confidence: f64,
        recognizer: impl Into<String>,
        matched_rules: Vec<String>,
    ) -> Self {
        Self {
            intent: intent.into(),
            confidence,
            recognizer: recognizer.into(),
            slots: Slots::new(),
            matched_rules,
            raw_matches: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_raw_matches(mut self, raw_matches: Vec<String>) -> Self {
        self.raw_matches = raw_matches;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.intent == UNKNOWN_INTENT
    }

    /// True for a usable match: named intent, positive finite confidence, evidence present
    pub fn is_well_formed(&self) -> bool {
        !self.is_unknown()
            && !self.intent.is_empty()
            && self.confidence.is_finite()
            && self.confidence > 0.0
            && !self.matched_rules.is_empty()
    }

    /// Human-readable explanation of how the result was reached
    pub fn reasoning(&self) -> String {
        if self.is_unknown() {
            return "no rule matched".to_string();
        }
        format!(
            "matched by {} as {}, confidence {:.2}",
            self.recognizer, self.intent, self.confidence
        )
    }
}

impl Default for IntentResult {
    fn default() -> Self {
        Self::unknown()
    }
}
