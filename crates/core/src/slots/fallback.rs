//! External fallback for required slots the fillers left empty

use anyhow::Result;
use serde::Serialize;

use crate::types::Slots;

/// What a fallback backend gets to work with
#[derive(Debug, Clone, Serialize)]
pub struct FallbackRequest {
    pub text: String,
    pub intent: String,
    /// Slots known so far; the backend must not be trusted to preserve them
    pub current: Slots,
    /// Required slots still absent from `current`
    pub missing: Vec<String>,
}

/// A swappable NLU/LLM backend that fills in missing required slots
///
/// Runs on a supervised worker under the fallback timeout. Errors,
/// panics and timeouts all leave the turn with the slots it already had.
pub trait FallbackSlotFiller: Send + Sync {
    fn name(&self) -> &str;

    fn fill_missing(&self, request: &FallbackRequest) -> Result<Slots>;
}
