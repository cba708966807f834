//! LLM-backed fallback slot filler using an OpenAI-compatible API
//!
//! Only asked for the required slots the regex fillers could not find.
//! The model is told to answer with one JSON object; the first balanced
//! object in its reply is taken as the slot mapping.

use anyhow::{anyhow, Context as _, Result};
use chrono::Local;
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmSettings;
use crate::slots::{FallbackRequest, FallbackSlotFiller};
use crate::types::Slots;

const INSTRUCTIONS: &str = r#"You extract slot values for an intent classifier.
Today is {{TODAY}}.
Output ONLY a single JSON object. No markdown. No explanation.
Use the requested slot names as keys. Copy values from the user's text
verbatim where possible. Use null for any slot the text does not contain."#;

/// Request body for the Responses API (internal)
#[derive(Serialize)]
struct ResponsesApiRequest<'a> {
    model: &'a str,
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
}

/// Response from the Responses API
#[derive(Deserialize, Debug)]
struct ResponsesApiResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    output_text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OutputItem {
    #[serde(default)]
    content: Vec<ContentItem>,
}

#[derive(Deserialize, Debug)]
struct ContentItem {
    #[serde(default)]
    text: Option<String>,
}

pub struct LlmSlotFiller {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmSlotFiller {
    pub const NAME: &'static str = "llm";

    /// Build a client from the `[llm]` section, resolving `${VAR}` in the key
    pub fn from_settings(settings: &LlmSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .as_deref()
            .map(substitute_env)
            .transpose()
            .context("Failed to resolve llm.api_key")?
            .filter(|key| !key.is_empty());

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
        })
    }

    /// POST one prompt to `{base_url}/responses` and return the reply text
    fn call(&self, input: String, instructions: String) -> Result<String> {
        let api_request = ResponsesApiRequest {
            model: &self.model,
            input,
            instructions: Some(instructions),
        };

        debug!(url = %format!("{}/responses", self.base_url), model = %self.model, "calling LLM");

        let mut builder = self
            .client
            .post(format!("{}/responses", self.base_url))
            .json(&api_request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().map_err(|e| anyhow!("LLM request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("LLM error {}: {}", status, body));
        }

        let resp: ResponsesApiResponse = response
            .json()
            .map_err(|e| anyhow!("Failed to parse LLM response: {}", e))?;

        resp.reply_text().ok_or_else(|| anyhow!("LLM reply carried no text"))
    }
}

impl FallbackSlotFiller for LlmSlotFiller {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fill_missing(&self, request: &FallbackRequest) -> Result<Slots> {
        let instructions = INSTRUCTIONS.replace("{{TODAY}}", &Local::now().format("%Y-%m-%d").to_string());
        let output = self.call(build_input(request)?, instructions)?;
        debug!(raw = %output, "LLM raw response");

        let object = slot_object(&output)?;
        Ok(slots_from_object(object, &request.missing))
    }
}

fn build_input(request: &FallbackRequest) -> Result<String> {
    let known = serde_json::to_string(&request.current)?;
    Ok(format!(
        "INTENT: {}\nKNOWN SLOTS: {}\nFIND SLOTS: {}\n\nUSER:\n{}",
        request.intent,
        known,
        request.missing.join(", "),
        request.text
    ))
}

/// Keep only the requested, non-empty values; scalars become strings like regex fills
fn slots_from_object(object: serde_json::Map<String, Value>, wanted: &[String]) -> Slots {
    object
        .into_iter()
        .filter(|(key, _)| wanted.iter().any(|w| w == key))
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::Number(n) => Some((key, Value::String(n.to_string()))),
            Value::Bool(b) => Some((key, Value::String(b.to_string()))),
            other => Some((key, other)),
        })
        .collect()
}

impl ResponsesApiResponse {
    /// Message text of the reply; `output_text` only when no content parts carry text
    fn reply_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .output
            .iter()
            .flat_map(|item| &item.content)
            .filter_map(|content| content.text.as_deref())
            .collect();

        let joined = if parts.is_empty() {
            self.output_text.clone()?
        } else {
            parts.join("\n")
        };
        let trimmed = joined.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

/// Byte length of the balanced `{...}` that `s` starts with, skipping braces inside strings
fn balanced_object_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in s.char_indices() {
        match (in_string, ch) {
            (true, _) if escaped => escaped = false,
            (true, '\\') => escaped = true,
            (true, '"') => in_string = false,
            (true, _) => {}
            (false, '"') => in_string = true,
            (false, '{') => depth += 1,
            (false, '}') => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            (false, _) => {}
        }
    }
    None
}

/// The slot object in a model reply.
///
/// Models wrap JSON in prose or code fences and sometimes mention braces
/// before it, so every `{` is tried in turn and the first balanced span
/// that parses as a JSON object wins.
fn slot_object(reply: &str) -> Result<serde_json::Map<String, Value>> {
    let mut last_error = None;

    for (start, _) in reply.match_indices('{') {
        let Some(len) = balanced_object_len(&reply[start..]) else {
            continue;
        };
        match serde_json::from_str::<serde_json::Map<String, Value>>(&reply[start..start + len]) {
            Ok(object) => return Ok(object),
            Err(e) => last_error = Some(e),
        }
    }

    match last_error {
        Some(e) => Err(anyhow!("LLM reply has no valid slot object: {}", e)),
        None => Err(anyhow!("LLM reply has no JSON object")),
    }
}

/// Substitute ${ENV_VAR} placeholders from environment
pub fn substitute_env(template: &str) -> Result<String> {
    let re = Regex::new(r"\$\{(\w+)\}").expect("constant regex");
    let mut result = template.to_string();

    for cap in re.captures_iter(template) {
        let value = env::var(&cap[1]).with_context(|| format!("Missing environment variable: {}", &cap[1]))?;
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}
