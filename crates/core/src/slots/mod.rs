//! Slot filling
//!
//! After the merge picks a winner, the pipeline fills its slots:
//! 1. the filler named by `Context::slot_filler`, or the built-in pattern
//!    filler when none is named (or the name is not registered)
//! 2. the fallback backend, only for required slots still missing
//!
//! Nothing here fails the turn. Filler errors keep the slots already on
//! the result.

use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RuleSet;
use crate::context::Context;
use crate::error::EngineError;
use crate::types::{IntentResult, Slots};
use crate::worker::{run_with_deadline, Outcome};

pub mod fallback;
pub mod pattern;

pub use fallback::{FallbackRequest, FallbackSlotFiller};
pub use pattern::PatternSlotFiller;

/// Name of the built-in pattern filler
pub const DEFAULT_FILLER: &str = "default";

/// A pluggable slot extraction strategy, selectable per request by name
pub trait SlotFiller: Send + Sync {
    fn name(&self) -> &str;

    /// Slots for `result.intent` found in `text`. Returned entries are
    /// merged over the result's existing slots.
    fn fill(&self, text: &str, result: &IntentResult, context: &Context) -> Result<Slots>;
}

pub struct SlotPipeline {
    rules: Arc<RuleSet>,
    default: Arc<dyn SlotFiller>,
    named: BTreeMap<String, Arc<dyn SlotFiller>>,
    fallback: Option<Arc<dyn FallbackSlotFiller>>,
    fallback_timeout: Duration,
}

impl SlotPipeline {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        let fallback_timeout = rules.engine().fallback_timeout();
        Self {
            default: Arc::new(PatternSlotFiller::new(Arc::clone(&rules))),
            rules,
            named: BTreeMap::new(),
            fallback: None,
            fallback_timeout,
        }
    }

    pub fn with_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout = timeout;
        self
    }

    /// Make a filler selectable by its name
    pub fn register(&mut self, filler: Arc<dyn SlotFiller>) -> Result<(), EngineError> {
        let name = filler.name().to_string();
        if name == DEFAULT_FILLER {
            return Err(EngineError::ReservedFiller(name));
        }
        if self.named.contains_key(&name) {
            return Err(EngineError::DuplicateFiller(name));
        }
        self.named.insert(name, filler);
        Ok(())
    }

    pub fn set_fallback(&mut self, fallback: Arc<dyn FallbackSlotFiller>) {
        self.fallback = Some(fallback);
    }

    pub fn filler_names(&self) -> Vec<&str> {
        self.named.keys().map(String::as_str).collect()
    }

    pub fn fallback_name(&self) -> Option<&str> {
        self.fallback.as_ref().map(|f| f.name())
    }

    /// The filler this request asked for, or the default
    pub fn select(&self, context: &Context) -> &Arc<dyn SlotFiller> {
        match context.slot_filler.as_deref() {
            None | Some(DEFAULT_FILLER) => &self.default,
            Some(name) => match self.named.get(name) {
                Some(filler) => filler,
                None => {
                    warn!(filler = name, "unknown slot filler requested, using default");
                    &self.default
                }
            },
        }
    }

    /// Required slots of `intent` absent from `slots`, in declaration order
    pub fn missing(&self, intent: &str, slots: &Slots) -> Vec<String> {
        self.rules
            .required_slots(intent)
            .iter()
            .filter(|name| !slots.contains_key(name.as_str()))
            .cloned()
            .collect()
    }

    /// Fill the slots of a merged result in place
    pub fn fill(&self, text: &str, result: &mut IntentResult, context: &Context) {
        if result.is_unknown() {
            return;
        }

        let filler = self.select(context);
        match filler.fill(text, result, context) {
            Ok(slots) => {
                debug!(filler = filler.name(), count = slots.len(), "slots filled");
                result.slots.extend(slots.into_iter().filter(|(_, v)| is_present(v)));
            }
            Err(e) => {
                warn!(filler = filler.name(), error = %e, "slot filler failed, keeping existing slots");
            }
        }

        let missing = self.missing(&result.intent, &result.slots);
        if missing.is_empty() {
            return;
        }
        let Some(fallback) = &self.fallback else {
            debug!(intent = %result.intent, ?missing, "required slots missing, no fallback configured");
            return;
        };

        let request = FallbackRequest {
            text: text.to_string(),
            intent: result.intent.clone(),
            current: result.slots.clone(),
            missing,
        };
        let name = fallback.name().to_string();
        let backend = Arc::clone(fallback);
        let outcome = run_with_deadline(&name, self.fallback_timeout, move || backend.fill_missing(&request));

        match outcome {
            Outcome::Completed(slots) => {
                let mut added = 0;
                for (key, value) in slots {
                    if !is_present(&value) || result.slots.contains_key(&key) {
                        continue;
                    }
                    result.slots.insert(key, value);
                    added += 1;
                }
                debug!(fallback = %name, added, "fallback slots merged");
            }
            Outcome::Failed(e) => {
                warn!(fallback = %name, error = %e, "fallback filler failed, slots partially filled");
            }
            Outcome::TimedOut => {
                warn!(fallback = %name, "fallback filler timed out, slots partially filled");
            }
        }
    }
}

/// Absent slots are omitted, never stored as null or empty
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}
