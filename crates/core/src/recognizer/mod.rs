//! Recognizer strategies
//!
//! A recognizer turns text plus context into a candidate `IntentResult`,
//! or `None` when it has no opinion. Built-ins:
//! - `PatternRecognizer`: first-match regex rules
//! - `KeywordRecognizer`: weighted keyword tiers
//! - `OutageReportRecognizer`: gated data-source recognizer
//!
//! Anything else implementing `Recognizer` can be registered with the
//! engine builder and is ordered by its priority alongside the built-ins.

use anyhow::Result;

use crate::context::Context;
use crate::types::{IntentResult, RecognizerKind};

pub mod keyword;
pub mod outage;
pub mod pattern;

pub use keyword::KeywordRecognizer;
pub use outage::OutageReportRecognizer;
pub use pattern::PatternRecognizer;

/// Default priority of the pattern recognizer (highest built-in)
pub const PATTERN_PRIORITY: i32 = 100;

/// Default priority of the keyword recognizer
pub const KEYWORD_PRIORITY: i32 = 50;

/// A pluggable intent classification strategy
///
/// Implementations run on a supervised worker thread under a deadline, so
/// they must be `Send + Sync` and must not rely on being awaited to the
/// end. Returning `Err` (or panicking) is treated as "no opinion".
pub trait Recognizer: Send + Sync {
    /// Unique name, reported as the result's provenance
    fn name(&self) -> &str;

    /// Higher runs earlier and wins confidence ties
    fn priority(&self) -> i32;

    fn kind(&self) -> RecognizerKind {
        RecognizerKind::Custom
    }

    fn parse(&self, text: &str, context: &Context) -> Result<Option<IntentResult>>;
}
