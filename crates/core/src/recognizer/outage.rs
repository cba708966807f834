//! Outage report recognizer
//!
//! A data-source recognizer: it ignores the text and, only when the
//! request carries the `outage_report` trigger, reads a CSV export of link
//! interruption records and summarises the segments whose interruptions
//! exceed a threshold. The summary goes into `metadata` rather than slots.
//!
//! Two export layouts are understood:
//! - `merged`: segment name and start time appear only on the first row of
//!   each segment (spreadsheet cell merging) and are forward-filled
//! - `standardized`: one full row per record; rows whose segment name does
//!   not match `segment_pattern` (headers, totals) are dropped
//!
//! A request may override the layout, export path, threshold, quiet-segment
//! handling and segment pattern through context extensions.

use anyhow::{anyhow, Context as _, Result};
use chrono::NaiveDateTime;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use super::Recognizer;
use crate::config::RuleSet;
use crate::context::Context;
use crate::error::ConfigError;
use crate::types::IntentResult;

/// Context trigger that opts a request into outage analysis
pub const OUTAGE_TRIGGER: &str = "outage_report";

pub const OUTAGE_INTENT: &str = "outage_analysis";

/// Settings section name: `[recognizers.outage]`
const SETTINGS_KEY: &str = "outage";

const START_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Merged,
    Standardized,
}

impl Layout {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "merged" => Some(Layout::Merged),
            "standardized" => Some(Layout::Standardized),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Layout::Merged => "merged",
            Layout::Standardized => "standardized",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutSource {
    pub path: PathBuf,
}

/// `[recognizers.outage]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutageSettings {
    pub default_layout: String,
    pub duration_threshold_secs: f64,
    pub ignore_quiet_segments: bool,
    pub segment_pattern: String,
    pub segment_column: String,
    pub start_column: String,
    pub satellite_column: String,
    pub duration_column: String,
    pub layouts: BTreeMap<String, LayoutSource>,
}

impl Default for OutageSettings {
    fn default() -> Self {
        Self {
            default_layout: "merged".to_string(),
            duration_threshold_secs: 15.0,
            ignore_quiet_segments: true,
            segment_pattern: r"^(\d{8}-\d+-\d+-\d+-\d+-CSCN-[AB]\d{4}-CSCN-[AB]\d{4})$".to_string(),
            segment_column: "segment".to_string(),
            start_column: "start_time".to_string(),
            satellite_column: "satellite".to_string(),
            duration_column: "duration".to_string(),
            layouts: BTreeMap::new(),
        }
    }
}

// ============================================================================
// Recognizer
// ============================================================================

pub struct OutageReportRecognizer {
    settings: OutageSettings,
    segment_regex: Regex,
    /// Layout name -> resolved export path
    sources: BTreeMap<String, PathBuf>,
    priority: i32,
}

impl OutageReportRecognizer {
    pub const NAME: &'static str = "outage_report";

    pub fn new(settings: OutageSettings) -> Result<Self, ConfigError> {
        let segment_regex = Regex::new(&settings.segment_pattern).map_err(|source| ConfigError::InvalidPattern {
            intent: OUTAGE_INTENT.to_string(),
            pattern: settings.segment_pattern.clone(),
            source,
        })?;
        let sources = settings
            .layouts
            .iter()
            .map(|(name, src)| (name.clone(), src.path.clone()))
            .collect();

        Ok(Self {
            settings,
            segment_regex,
            sources,
            priority: 200,
        })
    }

    /// Build from `[recognizers.outage]`, resolving relative paths against the config dir.
    /// Returns `None` when the section is absent.
    pub fn from_rules(rules: &RuleSet) -> Result<Option<Self>, ConfigError> {
        let Some(settings) = rules.recognizer_settings_as::<OutageSettings>(SETTINGS_KEY)? else {
            return Ok(None);
        };
        let mut recognizer = Self::new(settings)?;
        for path in recognizer.sources.values_mut() {
            *path = rules.resolve_path(path);
        }
        Ok(Some(recognizer))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Recognizer for OutageReportRecognizer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn parse(&self, _text: &str, context: &Context) -> Result<Option<IntentResult>> {
        if !context.is_triggered(OUTAGE_TRIGGER) {
            return Ok(None);
        }

        let layout_name = context
            .extension_str("outage_layout")
            .unwrap_or(&self.settings.default_layout);
        let Some(layout) = Layout::parse(layout_name) else {
            tracing::debug!(layout = layout_name, "unknown outage layout");
            return Ok(None);
        };

        let path = match context.extension_str("outage_path") {
            Some(p) => PathBuf::from(p),
            None => match self.sources.get(layout_name) {
                Some(p) => p.clone(),
                None => {
                    tracing::debug!(layout = layout_name, "no export configured for layout");
                    return Ok(None);
                }
            },
        };

        let threshold_secs = context
            .extension_f64("duration_threshold_secs")
            .unwrap_or(self.settings.duration_threshold_secs);
        let ignore_quiet = context
            .extension_bool("ignore_quiet_segments")
            .unwrap_or(self.settings.ignore_quiet_segments);

        let request_pattern = context
            .extension_str("outage_segment_pattern")
            .map(|pattern| Regex::new(pattern).with_context(|| format!("Invalid outage_segment_pattern: {}", pattern)))
            .transpose()?;
        let segment_regex = request_pattern.as_ref().unwrap_or(&self.segment_regex);

        let rows = self.read_rows(&path, layout, segment_regex)?;
        let data = summarise(rows, threshold_secs / 60.0, ignore_quiet);

        let result = IntentResult::matched(
            OUTAGE_INTENT,
            1.0,
            Self::NAME,
            vec![format!("outage_{}", layout.as_str())],
        )
        .with_metadata("path", json!(path.display().to_string()))
        .with_metadata("layout", json!(layout.as_str()))
        .with_metadata("duration_threshold_secs", json!(threshold_secs))
        .with_metadata("ignore_quiet_segments", json!(ignore_quiet))
        .with_metadata("segment_pattern", json!(segment_regex.as_str()))
        .with_metadata("result_count", json!(data.len()))
        .with_metadata("data", Value::Array(data));

        Ok(Some(result))
    }
}

// ============================================================================
// Export Parsing
// ============================================================================

#[derive(Debug, Clone)]
struct Row {
    segment: String,
    start: String,
    satellite: String,
    /// Total interruption in minutes
    duration: Option<f64>,
}

/// Leading number of a duration cell, e.g. `"1.0(0.25,0.75)"` -> 1.0
fn parse_duration(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    let end = cell
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(cell.len());
    cell[..end].parse().ok()
}

fn parse_start(raw: &str) -> Option<NaiveDateTime> {
    START_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim(), fmt).ok())
}

impl OutageReportRecognizer {
    fn read_rows(&self, path: &Path, layout: Layout, segment_regex: &Regex) -> Result<Vec<Row>> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open outage export: {}", path.display()))?;

        let headers = reader.headers()?.clone();
        let column = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| anyhow!("Missing column '{}' in {}", name, path.display()))
        };
        let segment_idx = column(&self.settings.segment_column)?;
        let start_idx = column(&self.settings.start_column)?;
        let satellite_idx = column(&self.settings.satellite_column)?;
        let duration_idx = column(&self.settings.duration_column)?;

        let mut rows = Vec::new();
        let mut last_segment = String::new();
        let mut last_start = String::new();

        for (idx, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("Failed to read row {}", idx + 1))?;
            let field = |i: usize| record.get(i).map(str::trim).unwrap_or("").to_string();

            let mut segment = field(segment_idx);
            let mut start = field(start_idx);

            match layout {
                Layout::Merged => {
                    if segment.is_empty() {
                        segment = last_segment.clone();
                    } else {
                        last_segment = segment.clone();
                    }
                    if start.is_empty() {
                        start = last_start.clone();
                    } else {
                        last_start = start.clone();
                    }
                    if segment.is_empty() {
                        continue;
                    }
                }
                Layout::Standardized => {
                    if !segment_regex.is_match(&segment) {
                        continue;
                    }
                }
            }

            rows.push(Row {
                segment,
                start,
                satellite: field(satellite_idx),
                duration: parse_duration(&field(duration_idx)),
            });
        }

        Ok(rows)
    }
}

/// Group rows by segment and keep interruptions above the threshold,
/// ordered by segment start time.
fn summarise(rows: Vec<Row>, threshold_minutes: f64, ignore_quiet: bool) -> Vec<Value> {
    struct Group {
        segment: String,
        start: String,
        hits: serde_json::Map<String, Value>,
    }

    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let slot = *index.entry(row.segment.clone()).or_insert_with(|| {
            groups.push(Group {
                segment: row.segment.clone(),
                start: row.start.clone(),
                hits: serde_json::Map::new(),
            });
            groups.len() - 1
        });

        if let Some(minutes) = row.duration.filter(|m| *m > threshold_minutes) {
            groups[slot].hits.insert(row.satellite, json!(minutes));
        }
    }

    if ignore_quiet {
        groups.retain(|g| !g.hits.is_empty());
    }

    // Stable: equal or unparsable start times keep export order
    groups.sort_by(|a, b| {
        (parse_start(&a.start), &a.start).cmp(&(parse_start(&b.start), &b.start))
    });

    groups
        .into_iter()
        .map(|g| {
            let hits = if g.hits.is_empty() {
                Value::Null
            } else {
                Value::Object(g.hits)
            };
            let mut entry = serde_json::Map::new();
            entry.insert(g.segment, hits);
            Value::Object(entry)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::shipped_config_dir;

    const SEG1: &str = "20251209-1-1-1-1-CSCN-A0001-CSCN-B0002";
    const SEG2: &str = "20251209-1-1-1-2-CSCN-A0003-CSCN-B0004";
    const SEG3: &str = "20251209-1-1-1-3-CSCN-A0005-CSCN-B0006";

    fn recognizer() -> OutageReportRecognizer {
        let rules = RuleSet::load_dir(shipped_config_dir()).unwrap();
        OutageReportRecognizer::from_rules(&rules).unwrap().unwrap()
    }

    fn keys(data: &Value) -> Vec<String> {
        data.as_array()
            .unwrap()
            .iter()
            .map(|entry| entry.as_object().unwrap().keys().next().unwrap().clone())
            .collect()
    }

    #[test]
    fn test_not_triggered_is_no_opinion() {
        let ctx = Context::new().with_extension("outage_layout", json!("merged"));
        assert!(recognizer().parse("从北京到上海", &ctx).unwrap().is_none());
    }

    #[test]
    fn test_merged_layout_forward_fills_and_orders_by_start() {
        let ctx = Context::new().with_trigger(OUTAGE_TRIGGER);
        let result = recognizer().parse("", &ctx).unwrap().unwrap();

        assert_eq!(result.intent, OUTAGE_INTENT);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.matched_rules, vec!["outage_merged"]);
        assert_eq!(result.metadata["result_count"], 2);

        let data = &result.metadata["data"];
        assert_eq!(keys(data), vec![SEG2, SEG1]);
        assert_eq!(data[0][SEG2]["SAT-C"], 1.0);
        assert_eq!(data[1][SEG1]["SAT-A"], 0.5);
        assert!(data[1][SEG1].get("SAT-B").is_none());
    }

    #[test]
    fn test_quiet_segments_reported_as_null() {
        let ctx = Context::new()
            .with_trigger(OUTAGE_TRIGGER)
            .with_extension("ignore_quiet_segments", json!(false));
        let result = recognizer().parse("", &ctx).unwrap().unwrap();

        let data = &result.metadata["data"];
        assert_eq!(keys(data), vec![SEG2, SEG3, SEG1]);
        assert!(data[1][SEG3].is_null());
    }

    #[test]
    fn test_standardized_layout_filters_by_segment_pattern() {
        let ctx = Context::new()
            .with_trigger(OUTAGE_TRIGGER)
            .with_extension("outage_layout", json!("standardized"));
        let result = recognizer().parse("", &ctx).unwrap().unwrap();

        assert_eq!(result.matched_rules, vec!["outage_standardized"]);
        assert_eq!(result.metadata["result_count"], 2);
        assert_eq!(
            keys(&result.metadata["data"]),
            vec!["20251209-2-1-1-2-CSCN-A0103-CSCN-B0104", "20251209-2-1-1-1-CSCN-A0101-CSCN-B0102"]
        );
    }

    #[test]
    fn test_threshold_override_from_context() {
        let ctx = Context::new()
            .with_trigger(OUTAGE_TRIGGER)
            .with_extension("outage_layout", json!("standardized"))
            .with_extension("duration_threshold_secs", json!(20.0));
        let result = recognizer().parse("", &ctx).unwrap().unwrap();

        assert_eq!(result.metadata["result_count"], 1);
        assert_eq!(result.metadata["duration_threshold_secs"], 20.0);
    }

    #[test]
    fn test_segment_pattern_override_from_context() {
        let ctx = Context::new()
            .with_trigger(OUTAGE_TRIGGER)
            .with_extension("outage_layout", json!("standardized"))
            .with_extension("outage_segment_pattern", json!(r"^20251209-2-1-1-1-"));
        let result = recognizer().parse("", &ctx).unwrap().unwrap();

        assert_eq!(result.metadata["result_count"], 1);
        assert_eq!(result.metadata["segment_pattern"], json!(r"^20251209-2-1-1-1-"));
        assert_eq!(
            keys(&result.metadata["data"]),
            vec!["20251209-2-1-1-1-CSCN-A0101-CSCN-B0102"]
        );

        // Without the override the configured pattern still applies
        let ctx = Context::new()
            .with_trigger(OUTAGE_TRIGGER)
            .with_extension("outage_layout", json!("standardized"));
        assert_eq!(recognizer().parse("", &ctx).unwrap().unwrap().metadata["result_count"], 2);
    }

    #[test]
    fn test_invalid_segment_pattern_is_an_error() {
        let ctx = Context::new()
            .with_trigger(OUTAGE_TRIGGER)
            .with_extension("outage_layout", json!("standardized"))
            .with_extension("outage_segment_pattern", json!("(unclosed"));
        let err = recognizer().parse("", &ctx).unwrap_err();
        assert!(err.to_string().contains("outage_segment_pattern"));
    }

    #[test]
    fn test_unknown_layout_is_no_opinion() {
        let ctx = Context::new()
            .with_trigger(OUTAGE_TRIGGER)
            .with_extension("outage_layout", json!("pivot"));
        assert!(recognizer().parse("", &ctx).unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let ctx = Context::new()
            .with_trigger(OUTAGE_TRIGGER)
            .with_extension("outage_path", json!("/no/such/export.csv"));
        assert!(recognizer().parse("", &ctx).is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("0.15(0.15)"), Some(0.15));
        assert_eq!(parse_duration(" 1.0(0.25,0.75)"), Some(1.0));
        assert_eq!(parse_duration("12"), Some(12.0));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("n/a"), None);
    }
}
