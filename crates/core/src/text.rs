//! Input preprocessing applied before any recognition

use crate::context::Context;

/// Rewrites raw input before the dialog hook, recognizers and slot fillers see it
pub trait TextPreprocessor: Send + Sync {
    fn preprocess(&self, text: &str, context: &Context) -> String;
}

/// Trims, folds full-width ASCII to half-width and collapses whitespace runs
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizingPreprocessor;

impl NormalizingPreprocessor {
    pub fn normalize(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut pending_space = false;

        for ch in text.chars().map(to_half_width) {
            if ch.is_whitespace() {
                pending_space = !out.is_empty();
                continue;
            }
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(ch);
        }
        out
    }
}

impl TextPreprocessor for NormalizingPreprocessor {
    fn preprocess(&self, text: &str, _context: &Context) -> String {
        Self::normalize(text)
    }
}

fn to_half_width(ch: char) -> char {
    match ch {
        '\u{3000}' => ' ',
        '\u{FF01}'..='\u{FF5E}' => char::from_u32(ch as u32 - 0xFEE0).unwrap_or(ch),
        _ => ch,
    }
}
