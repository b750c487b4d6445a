//! # Configuration Management
//!
//! Loads relay configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables (HOST, PORT, OPENAI_API_KEY, LIBRETRANSLATE_URL)
//! 2. Environment variables (APP_SERVER__PORT, APP_RELAY__CACHE_MAX_SIZE, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Example config.toml:
//! ```toml
//! [relay]
//! rate_limit_max_requests = 60
//! rate_limit_window_secs = 60
//!
//! [providers]
//! translation = ["libretranslate", "openai"]
//!
//! [providers.libretranslate]
//! url = "http://localhost:5000"
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Provider names accepted in the `providers.stt`, `providers.translation`
/// and `providers.tts` lists.
pub const KNOWN_PROVIDERS: &[&str] = &["openai", "libretranslate", "mock"];

/// Main application configuration.
///
/// ## Why separate config structs:
/// The HTTP server, the relay core and the provider backends are tuned
/// independently, so each gets its own section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub providers: ProvidersConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address or hostname to bind to ("127.0.0.1" for development, "0.0.0.0" for production)
/// - `port`: TCP port to listen on
/// - `heartbeat_interval_secs`: How often the server pings each WebSocket client
/// - `client_timeout_secs`: How long a silent client is kept before its socket is closed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

/// Relay core tuning.
///
/// ## Fields:
/// - `rate_limit_max_requests` / `rate_limit_window_secs`: per-connection quota (fixed window)
/// - `cache_max_size`: translation cache capacity (0 disables caching)
/// - `min_audio_bytes` / `max_audio_bytes`: accepted decoded audio payload size
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
    pub cache_max_size: usize,
    pub min_audio_bytes: usize,
    pub max_audio_bytes: usize,
}

/// Provider chain configuration.
///
/// ## Ordering:
/// Each list is tried front to back. The last usable entry is the
/// authoritative fallback for that capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Per-attempt deadline, in seconds
    pub timeout_secs: u64,
    pub stt: Vec<String>,
    pub translation: Vec<String>,
    pub tts: Vec<String>,
    /// Append the deterministic mock provider to every chain even when live
    /// providers are configured
    pub mock_fallback: bool,
    pub openai: OpenAiConfig,
    pub libretranslate: LibreTranslateConfig,
}

/// Credentials and models for the OpenAI backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub transcription_model: String,
    pub translation_model: String,
    pub speech_model: String,
}

/// Self-hosted or public LibreTranslate instance (translation only).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibreTranslateConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

impl ProvidersConfig {
    /// Deadline for a single provider attempt.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3001,
                heartbeat_interval_secs: 25,
                client_timeout_secs: 60,
            },
            relay: RelayConfig {
                rate_limit_max_requests: 60,     // 60 requests...
                rate_limit_window_secs: 60,      // ...per minute
                cache_max_size: 1000,
                min_audio_bytes: 100,
                max_audio_bytes: 10 * 1024 * 1024,  // 10MB
            },
            providers: ProvidersConfig {
                timeout_secs: 10,
                stt: vec!["openai".to_string()],
                translation: vec!["openai".to_string()],
                tts: vec!["openai".to_string()],
                mock_fallback: false,
                openai: OpenAiConfig {
                    api_key: None,
                    base_url: "https://api.openai.com/v1".to_string(),
                    transcription_model: "whisper-1".to_string(),
                    translation_model: "gpt-4.1-nano".to_string(),
                    speech_model: "tts-1".to_string(),
                },
                libretranslate: LibreTranslateConfig::default(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_RELAY__CACHE_MAX_SIZE=5000`: Bigger translation cache
    /// - `APP_PROVIDERS__TIMEOUT_SECS=5`: Tighter provider deadline
    /// - `OPENAI_API_KEY=sk-...`: Enables the OpenAI providers
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Variables commonly set by deployment platforms
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            settings = settings.set_override("providers.openai.api_key", key)?;
        }
        if let Ok(url) = env::var("LIBRETRANSLATE_URL") {
            settings = settings.set_override("providers.libretranslate.url", url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.heartbeat_interval_secs == 0
            || self.server.client_timeout_secs <= self.server.heartbeat_interval_secs
        {
            return Err(anyhow::anyhow!(
                "Client timeout must be longer than a non-zero heartbeat interval"
            ));
        }

        if self.relay.rate_limit_max_requests == 0 {
            return Err(anyhow::anyhow!("Rate limit must allow at least one request"));
        }

        if self.relay.rate_limit_window_secs == 0 {
            return Err(anyhow::anyhow!("Rate limit window must be greater than 0"));
        }

        if self.relay.min_audio_bytes > self.relay.max_audio_bytes {
            return Err(anyhow::anyhow!(
                "min_audio_bytes ({}) exceeds max_audio_bytes ({})",
                self.relay.min_audio_bytes,
                self.relay.max_audio_bytes
            ));
        }

        if self.providers.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Provider timeout must be greater than 0"));
        }

        for (capability, names) in [
            ("stt", &self.providers.stt),
            ("translation", &self.providers.translation),
            ("tts", &self.providers.tts),
        ] {
            if let Some(unknown) = names.iter().find(|n| !KNOWN_PROVIDERS.contains(&n.as_str())) {
                return Err(anyhow::anyhow!(
                    "Unknown {} provider '{}' (expected one of {:?})",
                    capability,
                    unknown,
                    KNOWN_PROVIDERS
                ));
            }
        }

        if self.providers.stt.iter().chain(&self.providers.tts).any(|n| n == "libretranslate") {
            return Err(anyhow::anyhow!("libretranslate only supports translation"));
        }

        Ok(())
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.relay.rate_limit_window_secs)
    }


    /// Copy of the configuration that is safe to show over HTTP.
    pub fn redacted(&self) -> AppConfig {
        let mut copy = self.clone();
        if copy.providers.openai.api_key.is_some() {
            copy.providers.openai.api_key = Some("***".to_string());
        }
        if copy.providers.libretranslate.api_key.is_some() {
            copy.providers.libretranslate.api_key = Some("***".to_string());
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.relay.rate_limit_max_requests, 60);
        assert_eq!(config.rate_limit_window(), Duration::from_secs(60));
        assert_eq!(config.relay.cache_max_size, 1000);
        assert_eq!(config.providers.timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.relay.min_audio_bytes = config.relay.max_audio_bytes + 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.providers.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = AppConfig::default();
        config.providers.translation = vec!["deepl".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("deepl"));

        // Translation-only backend cannot serve speech
        let mut config = AppConfig::default();
        config.providers.tts = vec!["libretranslate".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redacted_hides_credentials() {
        let mut config = AppConfig::default();
        config.providers.openai.api_key = Some("sk-secret".to_string());
        let shown = config.redacted();
        assert_eq!(shown.providers.openai.api_key.as_deref(), Some("***"));
        assert_eq!(shown.providers.libretranslate.api_key, None);
    }
}
