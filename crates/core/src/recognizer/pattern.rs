//! Regex intent recognizer
//!
//! Walks intents in declaration order, then each intent's patterns in
//! order, and returns the first match. Ordering in the config encodes
//! curator intent, so this is first-match rather than best-match.

use anyhow::Result;
use std::sync::Arc;

use super::{Recognizer, PATTERN_PRIORITY};
use crate::config::RuleSet;
use crate::context::Context;
use crate::types::{IntentResult, RecognizerKind};

pub struct PatternRecognizer {
    rules: Arc<RuleSet>,
    priority: i32,
}

impl PatternRecognizer {
    pub const NAME: &'static str = "pattern";

    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self {
            rules,
            priority: PATTERN_PRIORITY,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Recognizer for PatternRecognizer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn kind(&self) -> RecognizerKind {
        RecognizerKind::Pattern
    }

    fn parse(&self, text: &str, _context: &Context) -> Result<Option<IntentResult>> {
        let confidence = self.rules.engine().pattern_confidence;

        for intent in self.rules.intents() {
            for (i, regex) in intent.patterns.iter().enumerate() {
                if let Some(caps) = regex.captures(text) {
                    // Groups that did not participate stay as "" so positions line up
                    let groups: Vec<String> = caps
                        .iter()
                        .skip(1)
                        .map(|m| m.map_or_else(String::new, |m| m.as_str().to_string()))
                        .collect();

                    let result = IntentResult::matched(
                        intent.name.clone(),
                        confidence,
                        Self::NAME,
                        vec![format!("regex_{}_{}", intent.name, i)],
                    )
                    .with_raw_matches(groups);
                    return Ok(Some(result));
                }
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recognizer() -> PatternRecognizer {
        let rules = RuleSet::load_dir(crate::config::shipped_config_dir()).unwrap();
        PatternRecognizer::new(Arc::new(rules))
    }

    #[test]
    fn test_refund_pattern_fires() {
        let result = recognizer()
            .parse("退款退款，我不要这个商品了", &Context::new())
            .unwrap()
            .unwrap();
        assert_eq!(result.intent, "refund");
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.recognizer, "pattern");
        assert_eq!(result.matched_rules, vec!["regex_refund_0"]);
        assert!(result.raw_matches.is_empty());
    }

    #[test]
    fn test_capture_groups_become_raw_matches() {
        let result = recognizer()
            .parse("订单号1234567", &Context::new())
            .unwrap()
            .unwrap();
        assert_eq!(result.intent, "query_order");
        assert_eq!(result.matched_rules, vec!["regex_query_order_1"]);
        assert_eq!(result.raw_matches, vec!["1234567"]);
    }

    #[test]
    fn test_unmatched_groups_keep_position() {
        let rules = RuleSet::from_toml_str(
            r#"
            [[intent]]
            name = "query_order"
            patterns = ['(加急)?查订单(\d+)']
            "#,
        )
        .unwrap();
        let result = PatternRecognizer::new(Arc::new(rules))
            .parse("查订单123", &Context::new())
            .unwrap()
            .unwrap();
        assert_eq!(result.raw_matches, vec!["".to_string(), "123".to_string()]);
    }

    #[test]
    fn test_first_declared_intent_wins() {
        // Matches both `取消.*订单` (refund) and `查.*订单.*(\d+)` (query_order);
        // query_order is declared first.
        let result = recognizer()
            .parse("查一下取消的订单123", &Context::new())
            .unwrap()
            .unwrap();
        assert_eq!(result.intent, "query_order");
    }

    #[test]
    fn test_no_match_is_no_opinion() {
        let result = recognizer().parse("不知道说什么", &Context::new()).unwrap();
        assert!(result.is_none());
    }
}
