//! Dialog state machine and the follow-up continuation hook
//!
//! The caller carries the conversation position in `Context`
//! (`last_intent`, `dialog_state`). Before the recognizers run, the hook
//! may resolve an ambiguous follow-up ("那个呢？", "how about that?") to
//! the previous turn's intent. After a turn, `advance` moves the dialog
//! state along the declared transition table.

use regex::Regex;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{DialogConfig, StateDef};
use crate::context::Context;
use crate::error::TransitionError;
use crate::types::{IntentResult, UNKNOWN_INTENT};

/// Provenance reported for results produced by the dialog hook
pub const DIALOG_RECOGNIZER: &str = "dialog";

/// Context-aware continuation, consulted before normal recognition
pub trait ContinuationHook: Send + Sync {
    /// Provenance stamped on resolved results
    fn name(&self) -> &str {
        DIALOG_RECOGNIZER
    }

    /// Short-circuit recognition for this turn, or `None` to decline
    fn resolve(&self, text: &str, context: &Context) -> Option<IntentResult>;

    /// Record a finished turn in the caller's context
    fn advance(&self, context: &mut Context, result: &IntentResult);
}

#[derive(Debug, Clone)]
pub struct DialogStateMachine {
    initial: String,
    states: Vec<StateDef>,
    follow_up: Vec<Regex>,
    follow_up_confidence: f64,
}

impl DialogStateMachine {
    pub fn from_config(config: &DialogConfig) -> Self {
        Self {
            initial: config.initial.clone(),
            states: config.states.clone(),
            follow_up: config.follow_up.clone(),
            follow_up_confidence: config.follow_up_confidence,
        }
    }

    pub fn initial_state(&self) -> &str {
        &self.initial
    }

    fn state(&self, name: &str) -> Option<&StateDef> {
        self.states.iter().find(|s| s.name == name)
    }

    /// Declared states plus every transition target (targets without their
    /// own declaration are leaf states)
    pub fn is_state(&self, name: &str) -> bool {
        self.states
            .iter()
            .any(|s| s.name == name || s.transitions.iter().any(|t| t == name))
    }

    /// Legal next states; empty for leaf states
    pub fn transitions(&self, state: &str) -> &[String] {
        self.state(state).map(|s| s.transitions.as_slice()).unwrap_or(&[])
    }

    pub fn can_transition(&self, from: &str, to: &str) -> bool {
        self.transitions(from).iter().any(|t| t == to)
    }

    /// Validate a transition against the table, returning the new state
    pub fn transition(&self, from: &str, to: &str) -> Result<String, TransitionError> {
        if !self.is_state(from) {
            return Err(TransitionError::UnknownState(from.to_string()));
        }
        if !self.is_state(to) {
            return Err(TransitionError::UnknownState(to.to_string()));
        }
        if !self.can_transition(from, to) {
            return Err(TransitionError::Illegal {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(to.to_string())
    }

    /// The state a recognized intent moves the conversation into
    pub fn state_for_intent(&self, intent: &str) -> Option<&str> {
        self.states
            .iter()
            .find(|s| s.intents.iter().any(|i| i == intent))
            .map(|s| s.name.as_str())
    }

    pub fn current_state<'a>(&'a self, context: &'a Context) -> &'a str {
        context.dialog_state.as_deref().unwrap_or(&self.initial)
    }
}

impl ContinuationHook for DialogStateMachine {
    fn resolve(&self, text: &str, context: &Context) -> Option<IntentResult> {
        let last = context
            .last_intent
            .as_deref()
            .filter(|i| !i.is_empty() && *i != UNKNOWN_INTENT)?;
        let text = text.trim();
        let (index, _) = self.follow_up.iter().enumerate().find(|(_, re)| re.is_match(text))?;

        let state = self.current_state(context);
        debug!(intent = last, state, "follow-up resolved from dialog context");

        Some(
            IntentResult::matched(
                last,
                self.follow_up_confidence,
                DIALOG_RECOGNIZER,
                vec![format!("dialog_follow_up_{}", index)],
            )
            .with_raw_matches(vec![text.to_string()])
            .with_metadata("dialog_state", json!(state))
            .with_metadata("continued_from", json!(last)),
        )
    }

    fn advance(&self, context: &mut Context, result: &IntentResult) {
        if result.is_unknown() {
            return;
        }
        context.last_intent = Some(result.intent.clone());

        let Some(target) = self.state_for_intent(&result.intent) else {
            return;
        };
        let current = self.current_state(context).to_string();
        if current == target {
            return;
        }

        match self.transition(&current, target) {
            Ok(next) => {
                debug!(from = %current, to = %next, "dialog state advanced");
                context.dialog_state = Some(next);
            }
            Err(e) => {
                warn!(error = %e, "dialog transition rejected, state kept");
            }
        }
    }
}
