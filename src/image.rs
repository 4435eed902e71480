use crate::config::{Config, ImageConfig};
use crate::directive::ReferenceImage;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt::Debug;
use std::time::Duration;

/// Output resolution tier. The 4k tier changes both provider parameters and
/// prompt text; providers ignore what they cannot express.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Standard2k,
    Ultra4k,
}

impl Resolution {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "4k" => Resolution::Ultra4k,
            _ => Resolution::Standard2k,
        }
    }
}

/// A synthesized image, either inline bytes or a hosted URL, depending on
/// what the provider returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutput {
    /// Base64 payload with its mime type.
    Inline { mime_type: String, data: String },
    Url(String),
}

impl ImageOutput {
    /// Renders the output as something a client can drop into an `src`
    /// attribute or download directly.
    pub fn as_display_string(&self) -> String {
        match self {
            ImageOutput::Inline { mime_type, data } => {
                format!("data:{};base64,{}", mime_type, data)
            }
            ImageOutput::Url(url) => url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisRequest<'a> {
    pub prompt: &'a str,
    /// Subject (and product) reference images; an empty slice selects the
    /// provider's text-to-image path.
    pub references: &'a [ReferenceImage],
}

#[async_trait]
pub trait ImageSynthesizer: Send + Sync + Debug {
    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<ImageOutput>;
}

pub fn create_image_client(config: &Config) -> Result<Box<dyn ImageSynthesizer>> {
    let image = &config.image;
    if image.api_key.is_empty() {
        return Err(anyhow!("API_KEY_MISSING: no image api_key configured"));
    }
    let timeout = Duration::from_secs(config.batch.request_timeout_seconds);
    match image.provider.as_str() {
        "wavespeed" => Ok(Box::new(WavespeedClient::new(image, timeout)?)),
        "google" => Ok(Box::new(GoogleImageClient::new(image, timeout)?)),
        other => Err(anyhow!("Unknown image provider: {}", other)),
    }
}

// --- Wavespeed ---

const WAVESPEED_BASE: &str = "https://api.wavespeed.ai/api/v3/google/gemini-3-pro-image";

#[derive(Debug)]
pub struct WavespeedClient {
    api_key: String,
    aspect_ratio: String,
    resolution: Resolution,
    client: reqwest::Client,
}

impl WavespeedClient {
    pub fn new(config: &ImageConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            api_key: config.api_key.clone(),
            aspect_ratio: config.aspect_ratio.clone(),
            resolution: Resolution::parse(&config.resolution),
            client,
        })
    }
}

/// Walks the provider's variously shaped result payloads down to one image.
/// Providers have returned a bare string, `image_url`/`url`/`base64` keys, a
/// nested `output` object, an `images` array of `b64_json` entries, and an
/// `outputs` array of URLs; every rung is kept.
fn extract_wavespeed_output(data: &Value) -> Option<ImageOutput> {
    fn from_string(s: &str) -> ImageOutput {
        if s.starts_with("http") || s.starts_with("data:") {
            ImageOutput::Url(s.to_string())
        } else {
            ImageOutput::Inline {
                mime_type: "image/png".to_string(),
                data: s.to_string(),
            }
        }
    }

    match data {
        Value::String(s) => Some(from_string(s)),
        Value::Object(map) => {
            for key in ["image_url", "url"] {
                if let Some(s) = map.get(key).and_then(Value::as_str) {
                    return Some(ImageOutput::Url(s.to_string()));
                }
            }
            if let Some(s) = map.get("base64").and_then(Value::as_str) {
                return Some(ImageOutput::Inline {
                    mime_type: "image/png".to_string(),
                    data: s.to_string(),
                });
            }
            if let Some(output) = map.get("output") {
                if let Some(found) = extract_wavespeed_output(output) {
                    return Some(found);
                }
            }
            if let Some(images) = map.get("images").and_then(Value::as_array) {
                if let Some(s) = images
                    .first()
                    .and_then(|i| i.get("b64_json"))
                    .and_then(Value::as_str)
                {
                    return Some(ImageOutput::Inline {
                        mime_type: "image/png".to_string(),
                        data: s.to_string(),
                    });
                }
            }
            if let Some(outputs) = map.get("outputs").and_then(Value::as_array) {
                if let Some(s) = outputs.first().and_then(Value::as_str) {
                    return Some(from_string(s));
                }
            }
            None
        }
        Value::Array(items) => items.first().and_then(extract_wavespeed_output),
        _ => None,
    }
}

#[async_trait]
impl ImageSynthesizer for WavespeedClient {
    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<ImageOutput> {
        let endpoint = if request.references.is_empty() {
            format!("{}/text-to-image", WAVESPEED_BASE)
        } else {
            format!("{}/edit", WAVESPEED_BASE)
        };

        let prompt = match self.resolution {
            Resolution::Ultra4k => format!("{}, extremely detailed 4k resolution", request.prompt),
            Resolution::Standard2k => request.prompt.to_string(),
        };

        let mut payload = json!({
            "prompt": prompt,
            "aspect_ratio": self.aspect_ratio,
            "enable_sync_mode": true,
            "enable_base64_output": true,
            "output_format": "png",
        });
        if !request.references.is_empty() {
            let images: Vec<String> = request
                .references
                .iter()
                .map(|r| format!("data:{};base64,{}", r.mime_type, r.data))
                .collect();
            payload["images"] = json!(images);
        }

        let resp = self
            .client
            .post(&endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await?;
            return Err(anyhow!("Wavespeed API error ({}): {}", status, error_text));
        }

        let body: Value = resp.json().await?;
        let data = body.get("data").unwrap_or(&body);
        extract_wavespeed_output(data)
            .ok_or_else(|| anyhow!("Wavespeed response carried no image: {}", body))
    }
}

// --- Google ---

const GOOGLE_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";

#[derive(Debug)]
pub struct GoogleImageClient {
    api_key: String,
    aspect_ratio: String,
    resolution: Resolution,
    client: reqwest::Client,
}

impl GoogleImageClient {
    pub fn new(config: &ImageConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            api_key: config.api_key.clone(),
            aspect_ratio: config.aspect_ratio.clone(),
            resolution: Resolution::parse(&config.resolution),
            client,
        })
    }
}

/// Inline image data may arrive camelCase, snake_case, or under a
/// `predictions` wrapper depending on the serving path.
fn extract_google_inline(body: &Value) -> Option<ImageOutput> {
    let parts = body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array);
    if let Some(parts) = parts {
        for part in parts {
            for key in ["inlineData", "inline_data"] {
                if let Some(inline) = part.get(key) {
                    // A part missing its payload must not mask later parts
                    // or the predictions fallback.
                    let data = match inline.get("data").and_then(Value::as_str) {
                        Some(data) => data,
                        None => continue,
                    };
                    let mime = inline
                        .get("mimeType")
                        .or_else(|| inline.get("mime_type"))
                        .and_then(Value::as_str)
                        .unwrap_or("image/png");
                    return Some(ImageOutput::Inline {
                        mime_type: mime.to_string(),
                        data: data.to_string(),
                    });
                }
            }
        }
    }

    body.pointer("/predictions/0/bytesBase64Encoded")
        .and_then(Value::as_str)
        .map(|data| ImageOutput::Inline {
            mime_type: "image/png".to_string(),
            data: data.to_string(),
        })
}

#[async_trait]
impl ImageSynthesizer for GoogleImageClient {
    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<ImageOutput> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            GOOGLE_IMAGE_MODEL, self.api_key
        );

        let (prompt, image_size) = match self.resolution {
            Resolution::Ultra4k => (
                format!("4K Ultra HD, Highly Detailed, {}", request.prompt),
                "4K",
            ),
            Resolution::Standard2k => (request.prompt.to_string(), "2K"),
        };

        let mut parts: Vec<Value> = request
            .references
            .iter()
            .map(|r| {
                json!({
                    "inlineData": { "mimeType": r.mime_type, "data": r.data }
                })
            })
            .collect();
        parts.push(json!({ "text": prompt }));

        let payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": {
                    "imageSize": image_size,
                    "aspectRatio": self.aspect_ratio,
                }
            }
        });

        let resp = self.client.post(&url).json(&payload).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await?;
            return Err(anyhow!("Google image API error ({}): {}", status, error_text));
        }

        let body: Value = resp.json().await?;
        extract_google_inline(&body)
            .ok_or_else(|| anyhow!("Google image response carried no image data: {}", body))
    }
}
