//! Configuration management
//!
//! Loads the pipeline's runtime configuration from a JSON file and layers
//! environment variable overrides on top, per the documented precedence:
//! environment always wins over the file, and the file's own defaults fill
//! in anything missing from disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::warn;

/// Runtime configuration for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Scalar in `[0, 1]` controlling ignore-match strictness and
    /// `PROBABLY_TO_ME` escalation.
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,
    /// Lowercase phrases that immediately mark a transcript as directed at
    /// the listener.
    #[serde(default = "default_keywords")]
    pub attention_keywords: HashSet<String>,
    /// Optional name of the listener; treated like an attention keyword.
    #[serde(default)]
    pub user_name: Option<String>,
    /// Milliseconds a dimmed state waits for further speech before
    /// auto-restoring. Must be `>= 1000`.
    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u64,
    /// API key for the external speech-to-text service.
    #[serde(default)]
    pub stt_api_key: Option<String>,
    /// Whether the LLM fallback step of the attention engine is active.
    #[serde(default)]
    pub llm_enabled: bool,
    /// Base URL of the external LLM service (Ollama-style `/api/generate`).
    #[serde(default = "default_llm_endpoint")]
    pub llm_endpoint: String,
    /// Model name passed to the external LLM service.
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    /// HTTP control API port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Client audio WebSocket port.
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
}

fn default_sensitivity() -> f32 {
    0.7
}

fn default_keywords() -> HashSet<String> {
    ["hey", "hello", "excuse me", "hi"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_silence_timeout_ms() -> u64 {
    5000
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434/api/generate".to_string()
}

fn default_llm_model() -> String {
    "llama3".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_ws_port() -> u16 {
    8081
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sensitivity: default_sensitivity(),
            attention_keywords: default_keywords(),
            user_name: None,
            silence_timeout_ms: default_silence_timeout_ms(),
            stt_api_key: None,
            llm_enabled: false,
            llm_endpoint: default_llm_endpoint(),
            llm_model: default_llm_model(),
            port: default_port(),
            ws_port: default_ws_port(),
        }
    }
}

impl Config {
    /// Load configuration from the file at `path` (or defaults if the file
    /// doesn't exist), then apply environment variable overrides.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(error = %err, "config file failed to parse, falling back to defaults");
                Config::default()
            })
        } else {
            let config = Config::default();
            config.save(path)?;
            config
        };

        config.apply_env_overrides();
        config.validate();
        Ok(config)
    }

    /// Save configuration to `path` as pretty JSON.
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create config directory")?;
        }
        let contents = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents).context("failed to write config file")?;
        Ok(())
    }

    /// Apply `DEEPGRAM_API_KEY`, `LLM_ENABLED`, `SENSITIVITY_LEVEL`,
    /// `SILENCE_TIMEOUT_MS`, `PORT` and `WS_PORT` overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("DEEPGRAM_API_KEY") {
            self.stt_api_key = Some(key);
        }
        if let Ok(val) = std::env::var("LLM_ENABLED") {
            match val.to_lowercase().parse::<bool>() {
                Ok(b) => self.llm_enabled = b,
                Err(_) => warn!(value = %val, "LLM_ENABLED is not a valid boolean, ignoring"),
            }
        }
        if let Ok(val) = std::env::var("SENSITIVITY_LEVEL") {
            match val.to_lowercase().as_str() {
                "low" => self.sensitivity = 0.3,
                "medium" => self.sensitivity = 0.5,
                "high" => self.sensitivity = 0.8,
                other => warn!(value = %other, "unrecognized SENSITIVITY_LEVEL, ignoring"),
            }
        }
        if let Ok(val) = std::env::var("SILENCE_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms >= 1000 => self.silence_timeout_ms = ms,
                Ok(ms) => warn!(value = ms, "SILENCE_TIMEOUT_MS below 1000ms floor, ignoring"),
                Err(_) => warn!(value = %val, "SILENCE_TIMEOUT_MS is not a valid integer, ignoring"),
            }
        }
        if let Ok(val) = std::env::var("PORT") {
            match val.parse::<u16>() {
                Ok(p) => self.port = p,
                Err(_) => warn!(value = %val, "PORT is not a valid port number, ignoring"),
            }
        }
        if let Ok(val) = std::env::var("WS_PORT") {
            match val.parse::<u16>() {
                Ok(p) => self.ws_port = p,
                Err(_) => warn!(value = %val, "WS_PORT is not a valid port number, ignoring"),
            }
        }
        if let Ok(val) = std::env::var("LLM_ENDPOINT") {
            self.llm_endpoint = val;
        }
        if let Ok(val) = std::env::var("LLM_MODEL") {
            self.llm_model = val;
        }
    }

    /// Clamp out-of-range values to their documented bounds, warning once per
    /// field. Missing fields already took defaults during deserialization.
    fn validate(&mut self) {
        if !(0.0..=1.0).contains(&self.sensitivity) {
            warn!(value = self.sensitivity, "sensitivity out of [0,1], clamping");
            self.sensitivity = self.sensitivity.clamp(0.0, 1.0);
        }
        if self.silence_timeout_ms < 1000 {
            warn!(
                value = self.silence_timeout_ms,
                "silenceTimeoutMs below 1000ms floor, clamping"
            );
            self.silence_timeout_ms = 1000;
        }
        self.attention_keywords = self
            .attention_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
    }
}

/// Default configuration file path under the platform's config directory.
pub fn default_config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("dev", "earshot", "earshot")
        .context("failed to resolve project directories")?;
    Ok(base.config_dir().join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_within_bounds() {
        let config = Config::default();
        assert!(config.sensitivity >= 0.0 && config.sensitivity <= 1.0);
        assert!(config.silence_timeout_ms >= 1000);
        assert!(config.attention_keywords.contains("hey"));
    }

    #[test]
    fn round_trip_preserves_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.sensitivity = 0.42;
        config.user_name = Some("Dana".to_string());
        config.save(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let reloaded: Config = serde_json::from_str(&contents).unwrap();
        assert_eq!(reloaded.sensitivity, config.sensitivity);
        assert_eq!(reloaded.user_name, config.user_name);
        assert_eq!(reloaded.attention_keywords, config.attention_keywords);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.sensitivity, default_sensitivity());
    }
}
