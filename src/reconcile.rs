use crate::identity::random_token;
use crate::manifest::{GenerationMeta, ManifestSlot};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One reconciled prompt, ready for display, editing, export, and media
/// synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptItem {
    pub id: String,
    /// Serialized structured content; the whole wrapping object is kept so
    /// consumers can recover both the compiled string and its provenance.
    /// Falls back to the raw response text when the item did not parse.
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_copied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_meta: Option<GenerationMeta>,
    /// Display string of the synthesized image, once media synthesis ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl PromptItem {
    /// The flat compiled string when the stored payload carries one,
    /// otherwise the stored text as-is.
    pub fn compiled_string(&self) -> String {
        parse_lenient(&self.text)
            .and_then(|v| {
                v.pointer("/generation_data/final_prompt_string")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| self.text.clone())
    }

    /// Replaces only the compiled string when the payload parses, keeping
    /// the structured wrapper intact; otherwise replaces the text wholesale.
    pub fn apply_edit(&mut self, new_text: &str) {
        if let Some(mut value) = parse_lenient(&self.text) {
            if let Some(slot) = value.pointer_mut("/generation_data/final_prompt_string") {
                *slot = Value::String(new_text.to_string());
                self.text = value.to_string();
                return;
            }
        }
        self.text = new_text.to_string();
    }
}

/// Result of merging one response batch onto its manifest.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub items: Vec<PromptItem>,
    /// Items whose text failed to parse and were kept as opaque strings.
    pub unparsed: usize,
    /// Setting descriptors found in the parsed structures, for the
    /// repetition tracker.
    pub settings: Vec<String>,
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else {
        s.to_string()
    }
}

fn parse_lenient(text: &str) -> Option<Value> {
    serde_json::from_str(&strip_code_blocks(text)).ok()
}

/// Parses the generator's raw batch response into an ordered item array.
/// A response that yields no array at all is a batch-level failure.
pub fn parse_batch(raw: &str) -> Result<Vec<Value>> {
    let clean = strip_code_blocks(raw);
    let items: Vec<Value> = serde_json::from_str(&clean)
        .with_context(|| format!("Failed to parse generation response: {}", clean))?;
    Ok(items)
}

fn extract_tags(value: &Value) -> Vec<String> {
    value
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn extract_setting(value: &Value) -> Option<String> {
    value
        .pointer("/background/setting")
        .or_else(|| value.get("setting"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Zips response items onto manifest slots strictly by array position.
///
/// `response_items[i]` pairs with `manifest[i]`; when the response is
/// longer than the manifest, trailing items carry no generation meta. A
/// malformed item degrades to opaque text instead of failing the batch.
pub fn reconcile(response_items: &[Value], manifest: &[ManifestSlot]) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    for (idx, raw) in response_items.iter().enumerate() {
        let structured = match raw {
            Value::String(s) => {
                let parsed = parse_lenient(s);
                if parsed.is_none() {
                    outcome.unparsed += 1;
                }
                parsed
            }
            other => Some(other.clone()),
        };

        let text = match (&structured, raw) {
            (Some(value), _) => value.to_string(),
            (None, Value::String(s)) => s.clone(),
            (None, other) => other.to_string(),
        };

        let (tags, setting) = match &structured {
            Some(value) => (extract_tags(value), extract_setting(value)),
            None => (Vec::new(), None),
        };
        if let Some(setting) = setting {
            outcome.settings.push(setting);
        }

        outcome.items.push(PromptItem {
            id: random_token(),
            text,
            tags,
            is_copied: false,
            generation_meta: manifest.get(idx).map(|slot| slot.meta.clone()),
            image: None,
        });
    }

    outcome
}
