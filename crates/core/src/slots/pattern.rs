//! Default regex slot filler
//!
//! Each configured slot is searched independently and takes its first
//! capture group. A slot whose pattern does not match is left out of the
//! mapping entirely.

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

use super::{SlotFiller, DEFAULT_FILLER};
use crate::config::RuleSet;
use crate::context::Context;
use crate::types::{IntentResult, Slots};

pub struct PatternSlotFiller {
    rules: Arc<RuleSet>,
}

impl PatternSlotFiller {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    /// Extract every configured slot of `intent` from `text`
    pub fn extract(&self, intent: &str, text: &str) -> Slots {
        let mut slots = Slots::new();
        let Some(rules) = self.rules.intent(intent) else {
            return slots;
        };

        for slot in &rules.slots {
            let value = slot
                .regex
                .captures(text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string());
            if let Some(value) = value {
                slots.insert(slot.name.clone(), Value::String(value));
            }
        }
        slots
    }
}

impl SlotFiller for PatternSlotFiller {
    fn name(&self) -> &str {
        DEFAULT_FILLER
    }

    fn fill(&self, text: &str, result: &IntentResult, _context: &Context) -> Result<Slots> {
        Ok(self.extract(&result.intent, text))
    }
}
