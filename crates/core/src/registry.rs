//! Ordered recognizer set and the merge policy
//!
//! Recognizers run one after another in priority order, each on a
//! supervised worker with its own deadline. Whatever they return is
//! sanitised into `Candidate`s and reduced to one winner by `merge`.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::EngineError;
use crate::recognizer::Recognizer;
use crate::types::{IntentResult, RecognizerKind};
use crate::worker::{run_with_deadline, Outcome};

/// A sanitised recognizer result, tagged with what the merge policy needs
#[derive(Debug, Clone)]
pub struct Candidate {
    pub result: IntentResult,
    pub kind: RecognizerKind,
}

struct Entry {
    recognizer: Arc<dyn Recognizer>,
    name: String,
    priority: i32,
    kind: RecognizerKind,
}

pub struct RecognizerRegistry {
    /// Sorted by priority descending; equal priorities keep registration order
    entries: Vec<Entry>,
    timeout: Duration,
    high_confidence_threshold: f64,
}

impl RecognizerRegistry {
    pub fn new(timeout: Duration, high_confidence_threshold: f64) -> Self {
        Self {
            entries: Vec::new(),
            timeout,
            high_confidence_threshold,
        }
    }

    /// Add a recognizer; names must be unique
    pub fn register(&mut self, recognizer: Arc<dyn Recognizer>) -> Result<(), EngineError> {
        let name = recognizer.name().to_string();
        if self.entries.iter().any(|e| e.name == name) {
            return Err(EngineError::DuplicateRecognizer(name));
        }

        let priority = recognizer.priority();
        let kind = recognizer.kind();
        // Insert after every entry with priority >= ours so ties keep registration order
        let pos = self
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            pos,
            Entry {
                recognizer,
                name,
                priority,
                kind,
            },
        );
        Ok(())
    }

    /// Recognizer names in execution order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn high_confidence_threshold(&self) -> f64 {
        self.high_confidence_threshold
    }

    /// Run every recognizer in priority order and gather their opinions.
    ///
    /// Each call is bounded by the per-recognizer timeout, shortened to
    /// whatever is left of `deadline`. Once the deadline has passed the
    /// remaining recognizers are not started.
    pub fn collect(&self, text: &str, context: &Arc<Context>, deadline: Option<Instant>) -> Vec<Candidate> {
        let text: Arc<str> = Arc::from(text);
        let mut candidates = Vec::new();

        for entry in &self.entries {
            let budget = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        warn!(recognizer = %entry.name, "turn deadline reached, skipping remaining recognizers");
                        break;
                    }
                    remaining.min(self.timeout)
                }
                None => self.timeout,
            };

            let recognizer = Arc::clone(&entry.recognizer);
            let text = Arc::clone(&text);
            let context = Arc::clone(context);
            let outcome = run_with_deadline(&entry.name, budget, move || recognizer.parse(&text, &context));

            match outcome {
                Outcome::Completed(Some(result)) => {
                    if let Some(result) = sanitise(&entry.name, result) {
                        debug!(
                            recognizer = %entry.name,
                            intent = %result.intent,
                            confidence = result.confidence,
                            "recognizer matched"
                        );
                        candidates.push(Candidate {
                            result,
                            kind: entry.kind,
                        });
                    }
                }
                Outcome::Completed(None) => {
                    debug!(recognizer = %entry.name, "no opinion");
                }
                Outcome::Failed(e) => {
                    warn!(recognizer = %entry.name, error = %e, "recognizer failed, treating as no opinion");
                }
                Outcome::TimedOut => {
                    warn!(
                        recognizer = %entry.name,
                        timeout_ms = budget.as_millis() as u64,
                        "recognizer timed out, treating as no opinion"
                    );
                }
            }
        }

        candidates
    }

    /// Run all recognizers and merge their opinions into one result
    pub fn recognize(&self, text: &str, context: &Arc<Context>, deadline: Option<Instant>) -> IntentResult {
        let candidates = self.collect(text, context, deadline);
        let winner = merge(candidates, self.high_confidence_threshold);
        debug!(intent = %winner.intent, recognizer = %winner.recognizer, "merge decision");
        winner
    }
}

/// Enforce the result invariants on a plugin-produced result.
/// Provenance is always the name it was registered under.
pub(crate) fn sanitise(name: &str, mut result: IntentResult) -> Option<IntentResult> {
    if result.is_unknown() {
        debug!(source = name, "returned unknown, treating as no opinion");
        return None;
    }
    if !result.is_well_formed() {
        warn!(
            source = name,
            intent = %result.intent,
            confidence = result.confidence,
            "malformed result discarded"
        );
        return None;
    }
    if result.confidence > 1.0 {
        result.confidence = 1.0;
    }
    result.recognizer = name.to_string();
    Some(result)
}

// ============================================================================
// Merge Policy
// ============================================================================

/// Reduce candidates (already in priority order) to a single winner.
///
/// 1. Unknown results are dropped; nothing left means `unknown`.
/// 2. The first pattern-kind result above `threshold` wins outright.
/// 3. Otherwise the highest confidence wins, earliest candidate on ties.
pub fn merge(candidates: Vec<Candidate>, threshold: f64) -> IntentResult {
    let mut remaining: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| !c.result.is_unknown())
        .collect();

    if remaining.is_empty() {
        return IntentResult::unknown();
    }

    if let Some(pos) = remaining
        .iter()
        .position(|c| c.kind == RecognizerKind::Pattern && c.result.confidence > threshold)
    {
        return remaining.swap_remove(pos).result;
    }

    let mut best = 0;
    for (i, candidate) in remaining.iter().enumerate().skip(1) {
        if candidate.result.confidence > remaining[best].result.confidence {
            best = i;
        }
    }
    remaining.swap_remove(best).result
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use std::thread;

    struct Fixed {
        name: &'static str,
        priority: i32,
        kind: RecognizerKind,
        reply: Option<(&'static str, f64)>,
    }

    impl Recognizer for Fixed {
        fn name(&self) -> &str {
            self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn kind(&self) -> RecognizerKind {
            self.kind
        }
        fn parse(&self, _text: &str, _context: &Context) -> Result<Option<IntentResult>> {
            Ok(self
                .reply
                .map(|(intent, conf)| IntentResult::matched(intent, conf, "spoofed", vec![format!("rule_{}", intent)])))
        }
    }

    struct Failing;

    impl Recognizer for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn priority(&self) -> i32 {
            500
        }
        fn parse(&self, _text: &str, _context: &Context) -> Result<Option<IntentResult>> {
            Err(anyhow!("backend unavailable"))
        }
    }

    struct Panicking;

    impl Recognizer for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn priority(&self) -> i32 {
            400
        }
        fn parse(&self, _text: &str, _context: &Context) -> Result<Option<IntentResult>> {
            panic!("recognizer bug")
        }
    }

    struct Slow;

    impl Recognizer for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn priority(&self) -> i32 {
            300
        }
        fn parse(&self, _text: &str, _context: &Context) -> Result<Option<IntentResult>> {
            thread::sleep(Duration::from_secs(2));
            Ok(Some(IntentResult::matched("late", 1.0, "slow", vec!["late".into()])))
        }
    }

    fn fixed(name: &'static str, priority: i32, kind: RecognizerKind, reply: Option<(&'static str, f64)>) -> Arc<dyn Recognizer> {
        Arc::new(Fixed {
            name,
            priority,
            kind,
            reply,
        })
    }

    fn candidate(intent: &str, confidence: f64, kind: RecognizerKind) -> Candidate {
        Candidate {
            result: IntentResult::matched(intent, confidence, kind.as_str(), vec![format!("rule_{}", intent)]),
            kind,
        }
    }

    fn registry() -> RecognizerRegistry {
        RecognizerRegistry::new(Duration::from_millis(200), 0.8)
    }

    #[test]
    fn test_merge_empty_is_unknown() {
        let result = merge(Vec::new(), 0.8);
        assert!(result.is_unknown());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_merge_drops_unknown() {
        let unknown = Candidate {
            result: IntentResult::unknown(),
            kind: RecognizerKind::Custom,
        };
        let result = merge(vec![unknown, candidate("refund", 0.3, RecognizerKind::Keyword)], 0.8);
        assert_eq!(result.intent, "refund");
    }

    #[test]
    fn test_merge_pattern_above_threshold_wins() {
        let result = merge(
            vec![
                candidate("refund", 1.0, RecognizerKind::Keyword),
                candidate("issue_invoice", 0.9, RecognizerKind::Pattern),
            ],
            0.8,
        );
        assert_eq!(result.intent, "issue_invoice");
    }

    #[test]
    fn test_merge_threshold_is_strict() {
        let result = merge(
            vec![
                candidate("refund", 0.8, RecognizerKind::Pattern),
                candidate("query_order", 0.85, RecognizerKind::Keyword),
            ],
            0.8,
        );
        assert_eq!(result.intent, "query_order");
    }

    #[test]
    fn test_merge_tie_goes_to_earlier() {
        let result = merge(
            vec![
                candidate("first", 0.5, RecognizerKind::Custom),
                candidate("second", 0.5, RecognizerKind::Keyword),
            ],
            0.8,
        );
        assert_eq!(result.intent, "first");
    }

    #[test]
    fn test_register_orders_by_priority_then_sequence() {
        let mut reg = registry();
        reg.register(fixed("keyword", 50, RecognizerKind::Keyword, None)).unwrap();
        reg.register(fixed("pattern", 100, RecognizerKind::Pattern, None)).unwrap();
        reg.register(fixed("plugin_a", 50, RecognizerKind::Custom, None)).unwrap();
        reg.register(fixed("plugin_b", 75, RecognizerKind::Custom, None)).unwrap();

        assert_eq!(reg.names(), vec!["pattern", "plugin_b", "keyword", "plugin_a"]);
    }

    #[test]
    fn test_register_rejects_duplicate_name() {
        let mut reg = registry();
        reg.register(fixed("pattern", 100, RecognizerKind::Pattern, None)).unwrap();
        let err = reg.register(fixed("pattern", 10, RecognizerKind::Custom, None)).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateRecognizer(name) if name == "pattern"));
    }

    #[test]
    fn test_provenance_is_registered_name() {
        let mut reg = registry();
        reg.register(fixed("plugin", 10, RecognizerKind::Custom, Some(("refund", 0.7)))).unwrap();
        let result = reg.recognize("text", &Arc::new(Context::new()), None);
        assert_eq!(result.recognizer, "plugin");
    }

    #[test]
    fn test_confidence_is_clamped_and_malformed_dropped() {
        let mut reg = registry();
        reg.register(fixed("loud", 10, RecognizerKind::Custom, Some(("refund", 3.0)))).unwrap();
        reg.register(fixed("broken", 20, RecognizerKind::Custom, Some(("query_order", -1.0)))).unwrap();

        let candidates = reg.collect("text", &Arc::new(Context::new()), None);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].result.intent, "refund");
        assert_eq!(candidates[0].result.confidence, 1.0);
    }

    #[test]
    fn test_failures_degrade_to_healthy_recognizer() {
        let mut reg = registry();
        reg.register(Arc::new(Failing)).unwrap();
        reg.register(Arc::new(Panicking)).unwrap();
        reg.register(Arc::new(Slow)).unwrap();
        reg.register(fixed("keyword", 50, RecognizerKind::Keyword, Some(("query_order", 0.4)))).unwrap();

        let started = Instant::now();
        let result = reg.recognize("text", &Arc::new(Context::new()), None);
        assert_eq!(result.intent, "query_order");
        assert_eq!(result.recognizer, "keyword");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_deadline_skips_remaining() {
        let mut reg = registry();
        reg.register(Arc::new(Slow)).unwrap();
        reg.register(fixed("keyword", 50, RecognizerKind::Keyword, Some(("query_order", 0.4)))).unwrap();

        let deadline = Instant::now() + Duration::from_millis(100);
        let result = reg.recognize("text", &Arc::new(Context::new()), Some(deadline));
        assert!(result.is_unknown());
    }
}
