//! Rule configuration loading
//!
//! Loads intent rules from a directory of TOML files. Every `*.toml` file
//! is read in file-name order and merged into one document, then all
//! regexes are compiled up front so a bad rule fails at construction and
//! never at request time. The compiled `RuleSet` is immutable and shared
//! between recognizers as `Arc<RuleSet>`.

use regex::{Regex, RegexBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::UNKNOWN_INTENT;

// ============================================================================
// Engine Settings
// ============================================================================

/// `[engine]` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Budget for a single recognizer call
    pub recognizer_timeout_ms: u64,
    /// Budget for a whole `process` call; unbounded when absent
    pub process_timeout_ms: Option<u64>,
    /// Budget for the fallback slot filler
    pub fallback_timeout_ms: u64,
    /// Pattern results strictly above this win the merge outright
    pub high_confidence_threshold: f64,
    /// Confidence assigned to every pattern match
    pub pattern_confidence: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            recognizer_timeout_ms: 500,
            process_timeout_ms: None,
            fallback_timeout_ms: 2000,
            high_confidence_threshold: 0.8,
            pattern_confidence: 0.9,
        }
    }
}

impl EngineSettings {
    pub fn recognizer_timeout(&self) -> Duration {
        Duration::from_millis(self.recognizer_timeout_ms)
    }

    pub fn process_timeout(&self) -> Option<Duration> {
        self.process_timeout_ms.map(Duration::from_millis)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.high_confidence_threshold) {
            return Err(ConfigError::InvalidSetting {
                name: "high_confidence_threshold",
                value: self.high_confidence_threshold,
            });
        }
        if !(self.pattern_confidence > 0.0 && self.pattern_confidence <= 1.0) {
            return Err(ConfigError::InvalidSetting {
                name: "pattern_confidence",
                value: self.pattern_confidence,
            });
        }
        Ok(())
    }
}

/// `[llm]` section, consumed by the LLM fallback filler
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    /// May reference the environment as `${NAME}`; resolved when the filler is built
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_timeout() -> u64 {
    30
}

// ============================================================================
// Raw Documents (as written on disk)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDocument {
    engine: Option<EngineSettings>,
    #[serde(default)]
    intent: Vec<RawIntent>,
    dialog: Option<RawDialog>,
    #[serde(default)]
    recognizers: BTreeMap<String, toml::Table>,
    llm: Option<LlmSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIntent {
    name: String,
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    required_slots: Vec<String>,
    keywords: Option<RawKeywords>,
    #[serde(default)]
    slots: Vec<RawSlot>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawKeywords {
    #[serde(default)]
    primary: Vec<String>,
    #[serde(default)]
    secondary: Vec<String>,
    #[serde(default = "default_primary_weight")]
    primary_weight: f64,
    #[serde(default = "default_secondary_weight")]
    secondary_weight: f64,
}

fn default_primary_weight() -> f64 {
    0.8
}

fn default_secondary_weight() -> f64 {
    0.4
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSlot {
    name: String,
    pattern: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDialog {
    #[serde(default = "default_initial_state")]
    initial: String,
    #[serde(default)]
    state: Vec<RawState>,
    #[serde(default)]
    follow_up: Vec<String>,
    #[serde(default = "default_follow_up_confidence")]
    follow_up_confidence: f64,
}

fn default_initial_state() -> String {
    "start".to_string()
}

fn default_follow_up_confidence() -> f64 {
    0.6
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawState {
    name: String,
    #[serde(default)]
    transitions: Vec<String>,
    #[serde(default)]
    intents: Vec<String>,
}

impl RawDocument {
    fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    /// Fold another file into this one; singleton sections may appear once
    fn absorb(&mut self, other: RawDocument) -> Result<(), ConfigError> {
        merge_section(&mut self.engine, other.engine, "engine")?;
        merge_section(&mut self.dialog, other.dialog, "dialog")?;
        merge_section(&mut self.llm, other.llm, "llm")?;
        self.intent.extend(other.intent);
        for (name, table) in other.recognizers {
            if self.recognizers.contains_key(&name) {
                return Err(ConfigError::DuplicateSection(format!("recognizers.{}", name)));
            }
            self.recognizers.insert(name, table);
        }
        Ok(())
    }
}

fn merge_section<T>(slot: &mut Option<T>, incoming: Option<T>, name: &str) -> Result<(), ConfigError> {
    if let Some(value) = incoming {
        if slot.is_some() {
            return Err(ConfigError::DuplicateSection(name.to_string()));
        }
        *slot = Some(value);
    }
    Ok(())
}

// ============================================================================
// Compiled Rules
// ============================================================================

/// Keyword tiers of one intent
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordTiers {
    pub primary: Vec<String>,
    pub secondary: Vec<String>,
    pub primary_weight: f64,
    pub secondary_weight: f64,
}

/// One slot extraction rule; only the first capture group is used
#[derive(Debug, Clone)]
pub struct SlotPattern {
    pub name: String,
    pub regex: Regex,
}

/// Everything configured for one intent, in declaration order
#[derive(Debug, Clone)]
pub struct IntentRules {
    pub name: String,
    /// Whole-intent patterns, compiled case-insensitive
    pub patterns: Vec<Regex>,
    pub keywords: Option<KeywordTiers>,
    pub slots: Vec<SlotPattern>,
    /// Slots that trigger the fallback filler when still missing
    pub required_slots: Vec<String>,
}

/// One dialog state and its legal next states
#[derive(Debug, Clone, PartialEq)]
pub struct StateDef {
    pub name: String,
    pub transitions: Vec<String>,
    /// Intents whose recognition moves the conversation into this state
    pub intents: Vec<String>,
}

/// `[dialog]` section
#[derive(Debug, Clone)]
pub struct DialogConfig {
    pub initial: String,
    pub states: Vec<StateDef>,
    /// Ambiguous follow-up phrasings resolved against the previous intent
    pub follow_up: Vec<Regex>,
    pub follow_up_confidence: f64,
}

/// Compiled, read-only rule set
#[derive(Debug, Clone)]
pub struct RuleSet {
    intents: Vec<IntentRules>,
    engine: EngineSettings,
    dialog: Option<DialogConfig>,
    recognizers: BTreeMap<String, toml::Table>,
    llm: Option<LlmSettings>,
    base_dir: Option<PathBuf>,
}

impl RuleSet {
    /// Load and merge every `*.toml` file in `dir`
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let io_err = |path: &Path, source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
            let path = entry.map_err(|e| io_err(dir, e))?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
                files.push(path);
            }
        }
        files.sort();

        let mut merged = RawDocument::default();
        for path in &files {
            let content = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
            merged.absorb(RawDocument::parse(&content, &path.display().to_string())?)?;
        }

        Self::compile(merged, Some(dir.to_path_buf()), &dir.display().to_string())
    }

    /// Parse a single TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw = RawDocument::parse(content, "<inline>")?;
        Self::compile(raw, None, "<inline>")
    }

    /// Directory that relative paths in recognizer settings are resolved against
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    fn compile(raw: RawDocument, base_dir: Option<PathBuf>, origin: &str) -> Result<Self, ConfigError> {
        let engine = raw.engine.unwrap_or_default();
        engine.validate()?;

        let mut seen = HashSet::new();
        let mut intents = Vec::with_capacity(raw.intent.len());
        for intent in raw.intent {
            if intent.name == UNKNOWN_INTENT || intent.name.trim().is_empty() {
                return Err(ConfigError::ReservedIntent(intent.name));
            }
            if !seen.insert(intent.name.clone()) {
                return Err(ConfigError::DuplicateIntent(intent.name));
            }
            intents.push(compile_intent(intent)?);
        }

        if intents.is_empty() {
            return Err(ConfigError::Empty(origin.to_string()));
        }

        let dialog = raw.dialog.map(compile_dialog).transpose()?;

        Ok(Self {
            intents,
            engine,
            dialog,
            recognizers: raw.recognizers,
            llm: raw.llm,
            base_dir,
        })
    }

    pub fn intents(&self) -> &[IntentRules] {
        &self.intents
    }

    pub fn intent(&self, name: &str) -> Option<&IntentRules> {
        self.intents.iter().find(|rules| rules.name == name)
    }

    pub fn required_slots(&self, intent: &str) -> &[String] {
        self.intent(intent)
            .map(|rules| rules.required_slots.as_slice())
            .unwrap_or(&[])
    }

    pub fn engine(&self) -> &EngineSettings {
        &self.engine
    }

    pub fn dialog(&self) -> Option<&DialogConfig> {
        self.dialog.as_ref()
    }

    pub fn llm(&self) -> Option<&LlmSettings> {
        self.llm.as_ref()
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Resolve a settings path against the config directory
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn recognizer_settings(&self, name: &str) -> Option<&toml::Table> {
        self.recognizers.get(name)
    }

    /// Deserialize `[recognizers.<name>]` into a recognizer's own settings type
    pub fn recognizer_settings_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        self.recognizers
            .get(name)
            .map(|table| {
                toml::Value::Table(table.clone())
                    .try_into::<T>()
                    .map_err(|source| ConfigError::Settings {
                        name: name.to_string(),
                        source,
                    })
            })
            .transpose()
    }
}

fn compile_intent(raw: RawIntent) -> Result<IntentRules, ConfigError> {
    let mut patterns = Vec::with_capacity(raw.patterns.len());
    for pattern in &raw.patterns {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| ConfigError::InvalidPattern {
                intent: raw.name.clone(),
                pattern: pattern.clone(),
                source,
            })?;
        patterns.push(regex);
    }

    let keywords = match raw.keywords {
        Some(k) => {
            check_tier(&raw.name, "primary", &k.primary, k.primary_weight)?;
            check_tier(&raw.name, "secondary", &k.secondary, k.secondary_weight)?;
            Some(KeywordTiers {
                primary: k.primary,
                secondary: k.secondary,
                primary_weight: k.primary_weight,
                secondary_weight: k.secondary_weight,
            })
        }
        None => None,
    };

    let mut slots = Vec::with_capacity(raw.slots.len());
    for slot in raw.slots {
        let regex = Regex::new(&slot.pattern).map_err(|source| ConfigError::InvalidPattern {
            intent: raw.name.clone(),
            pattern: slot.pattern.clone(),
            source,
        })?;
        // captures_len counts the implicit whole-match group
        if regex.captures_len() < 2 {
            return Err(ConfigError::MissingCaptureGroup {
                intent: raw.name.clone(),
                slot: slot.name,
                pattern: slot.pattern,
            });
        }
        slots.push(SlotPattern { name: slot.name, regex });
    }

    Ok(IntentRules {
        name: raw.name,
        patterns,
        keywords,
        slots,
        required_slots: raw.required_slots,
    })
}

fn check_tier(intent: &str, tier: &'static str, words: &[String], weight: f64) -> Result<(), ConfigError> {
    if !(weight > 0.0 && weight <= 1.0) {
        return Err(ConfigError::InvalidWeight {
            intent: intent.to_string(),
            tier,
            weight,
        });
    }
    if words.iter().any(|w| w.is_empty()) {
        return Err(ConfigError::EmptyKeyword {
            intent: intent.to_string(),
            tier,
        });
    }
    Ok(())
}

fn compile_dialog(raw: RawDialog) -> Result<DialogConfig, ConfigError> {
    let mut names = HashSet::new();
    let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
    for state in &raw.state {
        if !names.insert(state.name.as_str()) {
            return Err(ConfigError::Dialog(format!("state '{}' is declared more than once", state.name)));
        }
        for intent in &state.intents {
            if let Some(previous) = owners.insert(intent.as_str(), state.name.as_str()) {
                return Err(ConfigError::Dialog(format!(
                    "intent '{}' is mapped to both '{}' and '{}'",
                    intent, previous, state.name
                )));
            }
        }
    }
    if !names.contains(raw.initial.as_str()) {
        return Err(ConfigError::Dialog(format!("initial state '{}' is not declared", raw.initial)));
    }
    if !(raw.follow_up_confidence > 0.0 && raw.follow_up_confidence <= 1.0) {
        return Err(ConfigError::InvalidSetting {
            name: "follow_up_confidence",
            value: raw.follow_up_confidence,
        });
    }

    let mut follow_up = Vec::with_capacity(raw.follow_up.len());
    for pattern in &raw.follow_up {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| ConfigError::InvalidPattern {
                intent: "dialog.follow_up".to_string(),
                pattern: pattern.clone(),
                source,
            })?;
        follow_up.push(regex);
    }

    Ok(DialogConfig {
        initial: raw.initial,
        states: raw
            .state
            .into_iter()
            .map(|s| StateDef {
                name: s.name,
                transitions: s.transitions,
                intents: s.intents,
            })
            .collect(),
        follow_up,
        follow_up_confidence: raw.follow_up_confidence,
    })
}

/// The `config/` directory shipped at the workspace root
#[cfg(test)]
pub(crate) fn shipped_config_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[[intent]]
name = "refund"
patterns = ['退.*款']
required_slots = ["order_id"]

[intent.keywords]
primary = ["退款"]
secondary = ["不要"]

[[intent.slots]]
name = "order_id"
pattern = '订单.*?(\d{6,})'
"#;

    #[test]
    fn test_minimal_document() {
        let rules = RuleSet::from_toml_str(MINIMAL).unwrap();
        assert_eq!(rules.intents().len(), 1);

        let refund = rules.intent("refund").unwrap();
        assert_eq!(refund.patterns.len(), 1);
        let keywords = refund.keywords.as_ref().unwrap();
        assert_eq!(keywords.primary_weight, 0.8);
        assert_eq!(keywords.secondary_weight, 0.4);
        assert_eq!(rules.required_slots("refund"), ["order_id".to_string()]);
        assert!(rules.required_slots("query_order").is_empty());
        assert_eq!(rules.engine(), &EngineSettings::default());
        assert!(rules.dialog().is_none());
    }

    #[test]
    fn test_intent_patterns_ignore_case() {
        let rules = RuleSet::from_toml_str(
            r#"
[[intent]]
name = "greet"
patterns = ['hello']
"#,
        )
        .unwrap();
        assert!(rules.intents()[0].patterns[0].is_match("HELLO there"));
    }

    #[test]
    fn test_bad_regex_fails_fast() {
        let err = RuleSet::from_toml_str(
            r#"
[[intent]]
name = "broken"
patterns = ['(unclosed']
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { ref intent, .. } if intent == "broken"));
    }

    #[test]
    fn test_slot_pattern_needs_capture_group() {
        let err = RuleSet::from_toml_str(
            r#"
[[intent]]
name = "issue_invoice"

[[intent.slots]]
name = "amount"
pattern = '\d+元'
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingCaptureGroup { ref slot, .. } if slot == "amount"));
    }

    #[test]
    fn test_duplicate_and_reserved_intents() {
        let dup = RuleSet::from_toml_str(
            r#"
[[intent]]
name = "refund"
[[intent]]
name = "refund"
"#,
        )
        .unwrap_err();
        assert!(matches!(dup, ConfigError::DuplicateIntent(ref n) if n == "refund"));

        let reserved = RuleSet::from_toml_str("[[intent]]\nname = \"unknown\"\n").unwrap_err();
        assert!(matches!(reserved, ConfigError::ReservedIntent(_)));
    }

    #[test]
    fn test_weight_out_of_range() {
        let err = RuleSet::from_toml_str(
            r#"
[[intent]]
name = "refund"
[intent.keywords]
primary = ["退款"]
primary_weight = 1.5
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWeight { tier: "primary", .. }));
    }

    #[test]
    fn test_empty_rule_set_is_an_error() {
        let err = RuleSet::from_toml_str("[engine]\nrecognizer_timeout_ms = 100\n").unwrap_err();
        assert!(matches!(err, ConfigError::Empty(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = RuleSet::from_toml_str("[[intent]]\nname = \"x\"\npaterns = []\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_dialog_initial_state_must_exist() {
        let err = RuleSet::from_toml_str(
            r#"
[[intent]]
name = "refund"

[dialog]
initial = "begin"

[[dialog.state]]
name = "start"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Dialog(_)));
    }

    #[test]
    fn test_load_dir_merges_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = fs::File::create(dir.path().join("10-orders.toml")).unwrap();
        writeln!(a, "[[intent]]\nname = \"query_order\"\npatterns = ['订单']").unwrap();
        let mut b = fs::File::create(dir.path().join("20-refunds.toml")).unwrap();
        writeln!(b, "[engine]\nrecognizer_timeout_ms = 250\n\n[[intent]]\nname = \"refund\"").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let rules = RuleSet::load_dir(dir.path()).unwrap();
        let names: Vec<_> = rules.intents().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["query_order", "refund"]);
        assert_eq!(rules.engine().recognizer_timeout(), Duration::from_millis(250));
        assert_eq!(rules.base_dir(), Some(dir.path()));
    }

    #[test]
    fn test_load_dir_rejects_duplicate_sections() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.toml"), "[engine]\n[[intent]]\nname = \"a\"\n").unwrap();
        fs::write(dir.path().join("b.toml"), "[engine]\n").unwrap();

        let err = RuleSet::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSection(ref s) if s == "engine"));
    }

    #[test]
    fn test_missing_dir_is_io_error() {
        let err = RuleSet::load_dir("/definitely/not/here").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_recognizer_settings_as() {
        #[derive(Debug, Deserialize)]
        struct Sentiment {
            threshold: f64,
        }

        let rules = RuleSet::from_toml_str(
            r#"
[[intent]]
name = "refund"

[recognizers.sentiment]
threshold = 0.25
"#,
        )
        .unwrap();

        let sentiment: Sentiment = rules.recognizer_settings_as("sentiment").unwrap().unwrap();
        assert_eq!(sentiment.threshold, 0.25);
        assert!(rules.recognizer_settings_as::<Sentiment>("absent").unwrap().is_none());
    }

    #[test]
    fn test_shipped_config_loads() {
        let rules = RuleSet::load_dir(shipped_config_dir()).unwrap();
        let names: Vec<_> = rules.intents().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["query_order", "refund", "issue_invoice"]);
        assert!(rules.dialog().is_some());
        assert!(rules.recognizer_settings("outage").is_some());
        assert!(rules.llm().is_some());
    }
}
