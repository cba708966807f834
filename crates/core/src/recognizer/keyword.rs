//! Weighted keyword recognizer
//!
//! Each intent is scored independently: every primary or secondary keyword
//! found as a substring adds its tier weight, and the total is clamped to
//! 1.0. The highest-scoring intent wins; ties go to the intent declared
//! first.

use anyhow::Result;
use std::sync::Arc;

use super::{Recognizer, KEYWORD_PRIORITY};
use crate::config::{KeywordTiers, RuleSet};
use crate::context::Context;
use crate::types::{IntentResult, RecognizerKind};

pub struct KeywordRecognizer {
    rules: Arc<RuleSet>,
    priority: i32,
}

impl KeywordRecognizer {
    pub const NAME: &'static str = "keyword";

    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self {
            rules,
            priority: KEYWORD_PRIORITY,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Clamped score and the keywords that contributed, primary tier first
fn score(text: &str, tiers: &KeywordTiers) -> (f64, Vec<String>) {
    let mut total = 0.0;
    let mut matched = Vec::new();

    for (words, weight) in [
        (&tiers.primary, tiers.primary_weight),
        (&tiers.secondary, tiers.secondary_weight),
    ] {
        for word in words {
            if text.contains(word.as_str()) {
                total += weight;
                matched.push(word.clone());
            }
        }
    }

    (total.min(1.0), matched)
}

impl Recognizer for KeywordRecognizer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn kind(&self) -> RecognizerKind {
        RecognizerKind::Keyword
    }

    fn parse(&self, text: &str, _context: &Context) -> Result<Option<IntentResult>> {
        let mut best: Option<(&str, f64, Vec<String>)> = None;

        for intent in self.rules.intents() {
            let Some(tiers) = &intent.keywords else {
                continue;
            };
            let (total, matched) = score(text, tiers);
            if total <= 0.0 {
                continue;
            }
            // Strictly greater: an equal later intent never displaces an earlier one
            if best.as_ref().map_or(true, |(_, top, _)| total > *top) {
                best = Some((intent.name.as_str(), total, matched));
            }
        }

        Ok(best.map(|(intent, confidence, matched)| {
            IntentResult::matched(intent, confidence, Self::NAME, vec![format!("keyword_{}", intent)])
                .with_raw_matches(matched)
        }))
    }
}
