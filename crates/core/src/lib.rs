//! Rule-based intent recognition and slot filling
//!
//! This crate provides the engine behind the `intent-engine` CLI:
//! - Declarative TOML rule sets (intent regexes, keyword tiers, slot patterns)
//! - Pluggable recognizers run under per-call deadlines and merged by priority/confidence
//! - Slot filling with per-request named fillers and an optional LLM fallback
//! - A dialog state machine hook for follow-up turns

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fsm;
pub mod llm;
pub mod recognizer;
pub mod registry;
pub mod slots;
pub mod text;
pub mod types;
pub mod worker;

// Re-export commonly used types at crate root
pub use config::{EngineSettings, LlmSettings, RuleSet};
pub use context::Context;
pub use engine::{EngineBuilder, IntentEngine};
pub use error::{ConfigError, EngineError, TransitionError};
pub use fsm::{ContinuationHook, DialogStateMachine};
pub use llm::LlmSlotFiller;
pub use recognizer::{KeywordRecognizer, OutageReportRecognizer, PatternRecognizer, Recognizer};
pub use slots::{FallbackRequest, FallbackSlotFiller, SlotFiller};
pub use text::{NormalizingPreprocessor, TextPreprocessor};
pub use types::{IntentResult, RecognizerKind, Slots, UNKNOWN_INTENT};
