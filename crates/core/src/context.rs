//! Per-turn request context
//!
//! The caller owns the context across a conversation. The engine only
//! reads it during `process`; `process_turn` writes back `last_intent`
//! and the dialog state for the caller to keep.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Winning intent of the previous turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_intent: Option<String>,

    /// Current dialog state; `None` means the state machine's initial state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialog_state: Option<String>,

    /// Name of a registered slot filler to use instead of the default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_filler: Option<String>,

    /// Opt-in flags for gated recognizers (e.g. `outage_report`)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub triggers: BTreeSet<String>,

    /// Recognizer-specific parameters
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extensions: serde_json::Map<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_last_intent(mut self, intent: impl Into<String>) -> Self {
        self.last_intent = Some(intent.into());
        self
    }

    pub fn with_slot_filler(mut self, name: impl Into<String>) -> Self {
        self.slot_filler = Some(name.into());
        self
    }

    pub fn with_trigger(mut self, name: impl Into<String>) -> Self {
        self.triggers.insert(name.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    pub fn is_triggered(&self, name: &str) -> bool {
        self.triggers.contains(name)
    }

    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    pub fn extension_str(&self, key: &str) -> Option<&str> {
        self.extension(key).and_then(Value::as_str)
    }

    pub fn extension_f64(&self, key: &str) -> Option<f64> {
        self.extension(key).and_then(Value::as_f64)
    }

    pub fn extension_bool(&self, key: &str) -> Option<bool> {
        self.extension(key).and_then(Value::as_bool)
    }

    /// Forget the conversation position (last intent and dialog state)
    pub fn reset_dialog(&mut self) {
        self.last_intent = None;
        self.dialog_state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_triggers_are_explicit() {
        let ctx = Context::new();
        assert!(!ctx.is_triggered("outage_report"));

        let ctx = ctx.with_trigger("outage_report");
        assert!(ctx.is_triggered("outage_report"));
    }

    #[test]
    fn test_context_from_json() {
        let ctx: Context = serde_json::from_value(json!({
            "last_intent": "query_order",
            "slot_filler": "custom_filler",
            "triggers": ["outage_report"],
            "extensions": {"duration_threshold_secs": 20.0}
        }))
        .unwrap();

        assert_eq!(ctx.last_intent.as_deref(), Some("query_order"));
        assert_eq!(ctx.slot_filler.as_deref(), Some("custom_filler"));
        assert!(ctx.is_triggered("outage_report"));
        assert_eq!(ctx.extension_f64("duration_threshold_secs"), Some(20.0));
        assert_eq!(ctx.extension_str("duration_threshold_secs"), None);
    }

    #[test]
    fn test_reset_dialog_keeps_other_fields() {
        let mut ctx = Context::new()
            .with_last_intent("refund")
            .with_slot_filler("custom_filler");
        ctx.dialog_state = Some("refund_request".to_string());

        ctx.reset_dialog();
        assert!(ctx.last_intent.is_none());
        assert!(ctx.dialog_state.is_none());
        assert_eq!(ctx.slot_filler.as_deref(), Some("custom_filler"));
    }
}
