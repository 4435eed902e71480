use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub generation: GenerationConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerationConfig {
    pub api_key: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Sampling temperature for prompt batches. Subject analysis always
    /// runs cold (0.2) regardless of this value.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_image_provider")]
    pub provider: String, // "wavespeed" or "google"

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,

    #[serde(default = "default_resolution")]
    pub resolution: String, // "2k" or "4k"

    /// When false the orchestrator stops after prompt reconciliation and
    /// never touches the media synthesis collaborator.
    #[serde(default)]
    pub synthesize: bool,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            provider: default_image_provider(),
            api_key: String::new(),
            aspect_ratio: default_aspect_ratio(),
            resolution: default_resolution(),
            synthesize: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatchConfig {
    /// Items requested per generation call. Kept small so memory stays
    /// bounded and progress surfaces incrementally.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_repetition_window")]
    pub repetition_window: usize,

    #[serde(default = "default_repetition_entry_chars")]
    pub repetition_entry_chars: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            repetition_window: default_repetition_window(),
            repetition_entry_chars: default_repetition_entry_chars(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_state_folder")]
    pub state_folder: String,

    #[serde(default = "default_target_total")]
    pub default_target_total: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_folder: default_state_folder(),
            default_target_total: default_target_total(),
        }
    }
}

fn default_generation_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_temperature() -> f32 {
    1.0
}
fn default_image_provider() -> String {
    "wavespeed".to_string()
}
fn default_aspect_ratio() -> String {
    "3:4".to_string()
}
fn default_resolution() -> String {
    "2k".to_string()
}
fn default_chunk_size() -> usize {
    10
}
fn default_repetition_window() -> usize {
    25
}
fn default_repetition_entry_chars() -> usize {
    60
}
fn default_request_timeout() -> u64 {
    90
}
fn default_state_folder() -> String {
    "state".to_string()
}
fn default_target_total() -> usize {
    50
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("config.yml")
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write("config.yml", content).context("Failed to write config.yml")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let yaml = "generation:\n  api_key: test-key\n";
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.generation.model, "gemini-2.5-flash");
        assert_eq!(config.generation.temperature, 1.0);
        assert_eq!(config.batch.chunk_size, 10);
        assert_eq!(config.batch.repetition_window, 25);
        assert_eq!(config.batch.request_timeout_seconds, 90);
        assert_eq!(config.image.provider, "wavespeed");
        assert!(!config.image.synthesize);
        assert_eq!(config.session.default_target_total, 50);
    }

    #[test]
    fn test_overrides_parse() {
        let yaml = "\
generation:
  api_key: k
  model: gemini-2.5-pro
  temperature: 0.7
image:
  provider: google
  api_key: ik
  aspect_ratio: '9:16'
  resolution: 4k
  synthesize: true
batch:
  chunk_size: 5
";
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.generation.model, "gemini-2.5-pro");
        assert_eq!(config.image.provider, "google");
        assert_eq!(config.image.resolution, "4k");
        assert!(config.image.synthesize);
        assert_eq!(config.batch.chunk_size, 5);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Config::load_from("definitely_missing.yml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
