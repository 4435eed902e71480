use crate::config::Config;
use crate::directive::{GenerationRequest, ReferenceImage, RequestPart};
use crate::identity::IdentityProfile;
use crate::reconcile::strip_code_blocks;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Debug;
use std::time::Duration;

/// Structured text generation: one assembled directive in, one raw JSON
/// batch response out.
#[async_trait]
pub trait PromptGenerator: Send + Sync + Debug {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Derives an identity profile from subject reference images. At most two
/// are consulted (headshot and body shot); extras are ignored.
#[async_trait]
pub trait SubjectAnalyzer: Send + Sync + Debug {
    async fn analyze(&self, images: &[ReferenceImage]) -> Result<IdentityProfile>;
}

/// Rewrites a prompt that the media backend refused, keeping scene and
/// framing intact while softening whatever tripped the filter.
#[async_trait]
pub trait Sanitizer: Send + Sync + Debug {
    async fn sanitize(&self, prompt: &str) -> Result<String>;
}

pub fn create_generator(config: &Config) -> Result<Box<dyn PromptGenerator>> {
    if config.generation.api_key.is_empty() {
        return Err(anyhow!("API_KEY_MISSING: no generation api_key configured"));
    }
    Ok(Box::new(GeminiClient::from_config(config)?))
}

pub fn create_analyzer(config: &Config) -> Result<Box<dyn SubjectAnalyzer>> {
    if config.generation.api_key.is_empty() {
        return Err(anyhow!("API_KEY_MISSING: no generation api_key configured"));
    }
    Ok(Box::new(GeminiClient::from_config(config)?))
}

pub fn create_sanitizer(config: &Config) -> Result<Box<dyn Sanitizer>> {
    if config.generation.api_key.is_empty() {
        return Err(anyhow!("API_KEY_MISSING: no generation api_key configured"));
    }
    Ok(Box::new(GeminiClient::from_config(config)?))
}

// --- Gemini ---

#[derive(Debug)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.generation.api_key,
            &config.generation.model,
            Duration::from_secs(config.batch.request_timeout_seconds),
        )
    }

    async fn generate_content(&self, request_body: &GeminiRequest) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let resp = self.client.post(&url).json(request_body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error ({}): {}", status, error_text));
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = serde_json::from_str(&response_text).map_err(|e| {
            anyhow!(
                "Failed to parse Gemini response: {}. Body: {}",
                e,
                response_text
            )
        })?;

        if let Some(err) = result.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }

        if let Some(candidates) = result.candidates {
            if let Some(first) = candidates.first() {
                if let Some(content) = &first.content {
                    if let Some(part) = content.parts.first() {
                        return Ok(part.text.clone());
                    }
                }
                let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
                return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
            }
        }

        Err(anyhow!(
            "Gemini response format unexpected or empty. Body: {}",
            response_text
        ))
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Serialize)]
struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
    #[serde(rename = "responseSchema", skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
    temperature: f32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

fn to_wire_parts(parts: &[RequestPart]) -> Vec<GeminiPart> {
    parts
        .iter()
        .map(|part| match part {
            RequestPart::Text(text) => GeminiPart::Text { text: text.clone() },
            RequestPart::InlineImage(image) => GeminiPart::InlineData {
                inline_data: GeminiInlineData {
                    mime_type: image.mime_type.clone(),
                    data: image.data.clone(),
                },
            },
        })
        .collect()
}

#[async_trait]
impl PromptGenerator for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: to_wire_parts(&request.parts),
            }],
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiPart::Text {
                    text: request.system_instruction.clone(),
                }],
            }),
            generation_config: Some(GeminiGenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: Some(request.response_schema.clone()),
                temperature: request.temperature,
            }),
        };
        self.generate_content(&request_body).await
    }
}

const ANALYSIS_DIRECTIVE: &str = "\
Analyze the subject in these images. Return a JSON profile.
RULES:
- name: invent a plausible first name.
- age_estimate: e.g. \"25yo\".
- archetype_anchor: broad aesthetic, profession hint, NO facial features.
- body_stack: high-density body morphology description. Build, proportions, skin tone, posture.
- realism_stack: camera-physics realism tags fitting this subject's skin and hair texture.
- facial_description: MUST be an empty string. Facial geometry is carried by the images, never by text.";

/// Response shape for subject analysis. `facial_description` is demanded by
/// the schema only so the model has somewhere to put nothing; it is dropped
/// on mapping.
fn analysis_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "name": { "type": "STRING" },
            "age_estimate": { "type": "STRING" },
            "archetype_anchor": { "type": "STRING" },
            "body_stack": { "type": "STRING" },
            "realism_stack": { "type": "STRING" },
            "facial_description": { "type": "STRING" }
        },
        "required": ["name", "age_estimate", "archetype_anchor", "body_stack", "realism_stack"]
    })
}

const MAX_ANALYSIS_IMAGES: usize = 2;

fn analysis_parts(images: &[ReferenceImage]) -> Vec<GeminiPart> {
    let mut parts: Vec<GeminiPart> = images
        .iter()
        .take(MAX_ANALYSIS_IMAGES)
        .map(|image| GeminiPart::InlineData {
            inline_data: GeminiInlineData {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            },
        })
        .collect();
    parts.push(GeminiPart::Text {
        text: ANALYSIS_DIRECTIVE.to_string(),
    });
    parts
}

#[derive(Deserialize)]
struct AnalysisRecord {
    #[serde(default)]
    name: String,
    #[serde(default)]
    age_estimate: String,
    #[serde(default)]
    archetype_anchor: String,
    #[serde(default)]
    body_stack: String,
    #[serde(default)]
    realism_stack: String,
}

impl From<AnalysisRecord> for IdentityProfile {
    fn from(record: AnalysisRecord) -> Self {
        IdentityProfile {
            name: record.name,
            age_estimate: record.age_estimate,
            archetype: record.archetype_anchor,
            backstory: record.realism_stack,
            body_description: record.body_stack,
        }
    }
}

#[async_trait]
impl SubjectAnalyzer for GeminiClient {
    async fn analyze(&self, images: &[ReferenceImage]) -> Result<IdentityProfile> {
        if images.is_empty() {
            return Err(anyhow!("Subject analysis requires at least one image"));
        }

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: analysis_parts(images),
            }],
            system_instruction: None,
            // Analysis runs cold so repeated runs converge on one reading.
            generation_config: Some(GeminiGenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: Some(analysis_schema()),
                temperature: 0.2,
            }),
        };

        let raw = self.generate_content(&request_body).await?;
        let record: AnalysisRecord = serde_json::from_str(&strip_code_blocks(&raw))
            .with_context(|| format!("Failed to parse analysis response: {}", raw))?;
        Ok(record.into())
    }
}

const SANITIZE_DIRECTIVE: &str = "\
The following image prompt was refused by a content filter. Rewrite it so it passes: \
keep the framing, pose, setting and realism tags exactly; replace any wardrobe or body \
phrasing that could read as explicit with modest equivalents. Return ONLY the rewritten \
prompt text, no commentary.";

#[async_trait]
impl Sanitizer for GeminiClient {
    async fn sanitize(&self, prompt: &str) -> Result<String> {
        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart::Text {
                    text: format!("{}\n\nPROMPT:\n{}", SANITIZE_DIRECTIVE, prompt),
                }],
            }],
            system_instruction: None,
            generation_config: Some(GeminiGenerationConfig {
                response_mime_type: "text/plain".to_string(),
                response_schema: None,
                temperature: 0.4,
            }),
        };
        let raw = self.generate_content(&request_body).await?;
        Ok(raw.trim().to_string())
    }
}
