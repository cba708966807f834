//! Construction-time errors
//!
//! Request processing never fails: recognizer and filler errors are
//! isolated inside the engine. The errors here are the fail-fast surface
//! hit while loading config or assembling an engine.

use std::path::PathBuf;
use thiserror::Error;

/// A config directory or document that cannot be turned into a rule set
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("intent '{intent}': invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        intent: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("intent '{intent}': slot '{slot}' pattern '{pattern}' has no capture group")]
    MissingCaptureGroup {
        intent: String,
        slot: String,
        pattern: String,
    },

    #[error("intent '{intent}': {tier} weight {weight} must be in (0, 1]")]
    InvalidWeight {
        intent: String,
        tier: &'static str,
        weight: f64,
    },

    #[error("intent '{intent}': empty keyword in {tier} tier")]
    EmptyKeyword { intent: String, tier: &'static str },

    #[error("intent '{0}' is declared more than once")]
    DuplicateIntent(String),

    #[error("'{0}' is reserved and cannot be used as an intent name")]
    ReservedIntent(String),

    #[error("section [{0}] is declared in more than one file")]
    DuplicateSection(String),

    #[error("engine setting {name} = {value} is out of range")]
    InvalidSetting { name: &'static str, value: f64 },

    #[error("dialog: {0}")]
    Dialog(String),

    #[error("recognizer settings [recognizers.{name}]: {source}")]
    Settings {
        name: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("no intents configured in {0}")]
    Empty(String),
}

/// Failure to assemble an `IntentEngine`
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("recognizer '{0}' is registered more than once")]
    DuplicateRecognizer(String),

    #[error("slot filler '{0}' is registered more than once")]
    DuplicateFiller(String),

    #[error("'{0}' is the built-in filler name and cannot be registered")]
    ReservedFiller(String),
}

/// A rejected dialog state transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("unknown dialog state '{0}'")]
    UnknownState(String),

    #[error("illegal transition {from} -> {to}")]
    Illegal { from: String, to: String },
}
