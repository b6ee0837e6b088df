//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Special environment variables (HOST, PORT, GEMINI_API_KEY)
//! 2. Environment variables (APP_SERVER__PORT, APP_MODEL__VOICE, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// The listener, the voice model connection and the per-call limits change
/// for different reasons, so each gets its own section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub calls: CallsConfig,
}

/// Listener settings for the telephony media-stream endpoint.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from the telephony provider (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Voice model connection settings.
///
/// ## Fields:
/// - `endpoint`: WebSocket URL of the model's bidirectional streaming API
/// - `api_key`: appended to the endpoint as `?key=` when non-empty
/// - `model`: model resource name sent in the setup message
/// - `voice` / `language_code`: speech configuration for generated audio
/// - `system_instruction`: persona and rules for the assistant
/// - `greeting_prompt` / `greeting_delay_ms`: synthetic first user turn that makes the
///   assistant speak first, and how long after setup completes it is sent
/// - `tools_file`: optional JSON file holding the function declarations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub language_code: String,
    pub system_instruction: String,
    pub greeting_prompt: String,
    pub greeting_delay_ms: u64,
    pub tools_file: Option<String>,
}

/// Per-call limits and defaults.
///
/// A timeout of 0 disables the corresponding watchdog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallsConfig {
    pub max_concurrent_calls: usize,
    pub setup_timeout_secs: u64,
    pub max_call_duration_secs: u64,
    pub default_agent_id: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            model: ModelConfig {
                endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
                api_key: String::new(),
                model: "models/gemini-2.0-flash-live-001".to_string(),
                voice: "Puck".to_string(),
                language_code: "en-US".to_string(),
                system_instruction: "You are a friendly phone assistant. Keep answers short and conversational.".to_string(),
                greeting_prompt: "Greet the caller warmly and ask how you can help.".to_string(),
                greeting_delay_ms: 100,
                tools_file: None,
            },
            calls: CallsConfig {
                max_concurrent_calls: 50,
                setup_timeout_secs: 15,
                max_call_duration_secs: 3600,
                default_agent_id: "default".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override listener port
    /// - `APP_MODEL__VOICE=Kore`: Override the model voice
    /// - `APP_CALLS__SETUP_TIMEOUT_SECS=5`: Tighten the setup watchdog
    /// - `HOST` / `PORT`: Special cases for deployment platforms
    /// - `GEMINI_API_KEY`: Model API key without the APP_ prefix
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("GEMINI_API_KEY") {
            settings = settings.set_override("model.api_key", key)?;
        }

        let config = settings
            .build()
            .context("failed to assemble configuration sources")?
            .try_deserialize()
            .context("configuration has an invalid shape")?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.calls.max_concurrent_calls == 0 {
            return Err(anyhow::anyhow!("Max concurrent calls must be greater than 0"));
        }

        if self.model.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Model name cannot be empty"));
        }

        if !(self.model.endpoint.starts_with("ws://") || self.model.endpoint.starts_with("wss://")) {
            return Err(anyhow::anyhow!(
                "Model endpoint must be a ws:// or wss:// URL, got '{}'",
                self.model.endpoint
            ));
        }

        Ok(())
    }
}

impl ModelConfig {
    /// Full connection URL, with the API key attached when one is configured.
    pub fn connect_url(&self) -> String {
        if self.api_key.is_empty() {
            self.endpoint.clone()
        } else if self.endpoint.contains('?') {
            format!("{}&key={}", self.endpoint, self.api_key)
        } else {
            format!("{}?key={}", self.endpoint, self.api_key)
        }
    }

    pub fn greeting_delay(&self) -> Duration {
        Duration::from_millis(self.greeting_delay_ms)
    }

    /// Read the function declarations named by `tools_file`.
    ///
    /// The file holds either a JSON array of declarations or an object with a
    /// `functionDeclarations` array. No file means no tools.
    pub fn load_function_declarations(&self) -> Result<Vec<serde_json::Value>> {
        let Some(path) = &self.tools_file else {
            return Ok(Vec::new());
        };

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read tools file {}", path))?;
        parse_function_declarations(&raw).with_context(|| format!("invalid tools file {}", path))
    }
}

impl CallsConfig {
    /// Setup watchdog interval, or `None` when disabled.
    pub fn setup_timeout(&self) -> Option<Duration> {
        (self.setup_timeout_secs > 0).then(|| Duration::from_secs(self.setup_timeout_secs))
    }

    /// Maximum call duration, or `None` when disabled.
    pub fn max_call_duration(&self) -> Option<Duration> {
        (self.max_call_duration_secs > 0).then(|| Duration::from_secs(self.max_call_duration_secs))
    }
}

fn parse_function_declarations(raw: &str) -> Result<Vec<serde_json::Value>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    match value {
        serde_json::Value::Array(items) => Ok(items),
        serde_json::Value::Object(mut map) => match map.remove("functionDeclarations") {
            Some(serde_json::Value::Array(items)) => Ok(items),
            _ => Err(anyhow::anyhow!("expected a functionDeclarations array")),
        },
        _ => Err(anyhow::anyhow!("expected a JSON array or object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.model.greeting_delay(), Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.model.endpoint = "https://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.calls.max_concurrent_calls = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connect_url_appends_key() {
        let mut model = AppConfig::default().model;
        model.endpoint = "wss://model.example/ws".to_string();
        assert_eq!(model.connect_url(), "wss://model.example/ws");

        model.api_key = "secret".to_string();
        assert_eq!(model.connect_url(), "wss://model.example/ws?key=secret");

        model.endpoint = "wss://model.example/ws?alt=json".to_string();
        assert_eq!(model.connect_url(), "wss://model.example/ws?alt=json&key=secret");
    }

    #[test]
    fn test_watchdogs_disabled_by_zero() {
        let mut calls = AppConfig::default().calls;
        assert_eq!(calls.setup_timeout(), Some(Duration::from_secs(15)));
        calls.setup_timeout_secs = 0;
        calls.max_call_duration_secs = 0;
        assert_eq!(calls.setup_timeout(), None);
        assert_eq!(calls.max_call_duration(), None);
    }

    #[test]
    fn test_function_declarations_parsing() {
        let array = r#"[{"name": "book_appointment", "description": "Book a slot"}]"#;
        assert_eq!(parse_function_declarations(array).unwrap().len(), 1);

        let wrapped = r#"{"functionDeclarations": [{"name": "a"}, {"name": "b"}]}"#;
        assert_eq!(parse_function_declarations(wrapped).unwrap().len(), 2);

        assert!(parse_function_declarations(r#"{"tools": []}"#).is_err());
        assert!(parse_function_declarations("42").is_err());
        assert!(AppConfig::default().model.load_function_declarations().unwrap().is_empty());
    }
}
