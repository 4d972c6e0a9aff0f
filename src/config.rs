use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::llm_providers::{GenerationParams, LLMProviderType, DEFAULT_TIMEOUT};

// Import logging macros
use crate::{log_system_event, log_validation};

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LLMConfig,
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub logging: LoggingConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Large Language Model service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub provider: LLMProviderType,
    pub model: Option<String>,
    pub timeout_secs: u64,
    pub generation: GenerationParams,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Limits for uploaded documents
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub max_upload_bytes: usize,
}

/// Logging system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        log_system_event!(config, "Loading application configuration from environment variables");

        let config = Config {
            database: DatabaseConfig::from_env()?,
            llm: LLMConfig::from_env()?,
            server: ServerConfig::from_env()?,
            upload: UploadConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    /// Log a summary of loaded configuration (without sensitive data)
    fn log_configuration_summary(&self) {
        info!(
            database_url_masked = %mask_sensitive_data(&self.database.url),
            llm_provider = ?self.llm.provider,
            llm_model = ?self.llm.model,
            llm_api_key_masked = %mask_sensitive_data(&self.llm.api_key),
            llm_timeout_secs = self.llm.timeout_secs,
            server_address = %self.server.address(),
            max_upload_bytes = self.upload.max_upload_bytes,
            log_level = %self.logging.level,
            "Configuration summary"
        );
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(anyhow!("DATABASE_URL must start with 'sqlite:'"));
        }

        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        if self.llm.timeout_secs == 0 {
            return Err(anyhow!("LLM_TIMEOUT_SECS must be greater than 0"));
        }

        let generation = &self.llm.generation;
        if !(0.0..=2.0).contains(&generation.temperature) {
            return Err(anyhow!("LLM_TEMPERATURE must be between 0.0 and 2.0"));
        }
        if !(0.0..=1.0).contains(&generation.top_p) {
            return Err(anyhow!("LLM_TOP_P must be between 0.0 and 1.0"));
        }
        if generation.max_output_tokens == 0 {
            return Err(anyhow!("LLM_MAX_OUTPUT_TOKENS must be greater than 0"));
        }

        if self.upload.max_upload_bytes == 0 {
            return Err(anyhow!("MAX_UPLOAD_BYTES must be greater than 0"));
        }

        if self.llm.api_key.is_empty() || self.llm.api_key == "your-api-key" {
            warn!("LLM API key appears to be placeholder or empty - quiz generation will fail");
        }

        if !["trace", "debug", "info", "warn", "error"]
            .iter()
            .any(|level| self.logging.level.to_lowercase().starts_with(level))
        {
            warn!("Unrecognized log level '{}', filter may fall back to defaults", self.logging.level);
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self> {
        let url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:quiz_generator.db".to_string());

        Ok(DatabaseConfig { url })
    }
}

impl LLMConfig {
    fn from_env() -> Result<Self> {
        let api_key = env::var("LLM_API_KEY")
            .or_else(|_| env::var("GEMINI_API_KEY"))
            .unwrap_or_else(|_| "your-api-key".to_string());

        let base_url = env::var("LLM_BASE_URL").ok();

        let provider = LLMProviderType::parse(
            &env::var("LLM_PROVIDER").unwrap_or_else(|_| "gemini".to_string()),
        );

        let model = env::var("LLM_MODEL").ok();

        let timeout_secs = parse_env("LLM_TIMEOUT_SECS", DEFAULT_TIMEOUT.as_secs())?;

        let defaults = GenerationParams::default();
        let generation = GenerationParams {
            temperature: parse_env("LLM_TEMPERATURE", defaults.temperature)?,
            top_p: parse_env("LLM_TOP_P", defaults.top_p)?,
            top_k: parse_env("LLM_TOP_K", defaults.top_k)?,
            max_output_tokens: parse_env("LLM_MAX_OUTPUT_TOKENS", defaults.max_output_tokens)?,
        };

        Ok(LLMConfig {
            api_key,
            base_url,
            provider,
            model,
            timeout_secs,
            generation,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let port = parse_env("PORT", 3000u16)?;

        let host = env::var("HOST")
            .unwrap_or_else(|_| "0.0.0.0".to_string());

        Ok(ServerConfig { port, host })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl UploadConfig {
    fn from_env() -> Result<Self> {
        Ok(UploadConfig {
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", 10 * 1024 * 1024usize)?,
        })
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl LoggingConfig {
    fn from_env() -> Result<Self> {
        let level = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info,quiz_generator=debug".to_string());

        let file_enabled = env::var("LOG_FILE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let console_enabled = env::var("LOG_CONSOLE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let log_directory = env::var("LOG_DIRECTORY")
            .unwrap_or_else(|_| "logs".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

/// Read and parse an optional environment variable, falling back to `default` when unset
fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("Invalid {} value: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

/// Mask sensitive data in configuration for safe logging
fn mask_sensitive_data(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            database: DatabaseConfig {
                url: "sqlite:test.db".to_string(),
            },
            llm: LLMConfig {
                api_key: "AIza-valid-key".to_string(),
                base_url: None,
                provider: LLMProviderType::Gemini,
                model: None,
                timeout_secs: 60,
                generation: GenerationParams::default(),
            },
            server: ServerConfig {
                port: 3000,
                host: "0.0.0.0".to_string(),
            },
            upload: UploadConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file_enabled: true,
                console_enabled: true,
                log_directory: "logs".to_string(),
            },
        }
    }

    #[test]
    fn test_mask_sensitive_data() {
        assert_eq!(mask_sensitive_data("short"), "*****");
        assert_eq!(mask_sensitive_data("sqlite:quiz_generator.db"), "sqli***r.db");
        assert_eq!(mask_sensitive_data("AIzaSyD-1234567890"), "AIza***7890");
    }

    #[test]
    fn test_config_validation() {
        let config = valid_config();
        assert!(config.validate().is_ok());

        let mut invalid = config.clone();
        invalid.server.port = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.database.url = "postgres://localhost/quiz".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.llm.generation.top_p = 1.5;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.llm.timeout_secs = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config;
        invalid.upload.max_upload_bytes = 0;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_parse_env_fallback_and_errors() {
        unsafe { env::remove_var("QUIZ_TEST_UNSET_VALUE"); }
        assert_eq!(parse_env("QUIZ_TEST_UNSET_VALUE", 42u32).unwrap(), 42);

        unsafe { env::set_var("QUIZ_TEST_NUMERIC_VALUE", " 17 "); }
        assert_eq!(parse_env("QUIZ_TEST_NUMERIC_VALUE", 0u32).unwrap(), 17);

        unsafe { env::set_var("QUIZ_TEST_BAD_VALUE", "not-a-number"); }
        assert!(parse_env("QUIZ_TEST_BAD_VALUE", 0u16).is_err());

        unsafe {
            env::remove_var("QUIZ_TEST_NUMERIC_VALUE");
            env::remove_var("QUIZ_TEST_BAD_VALUE");
        }
    }

    #[test]
    fn test_server_address() {
        let server = ServerConfig {
            port: 8080,
            host: "127.0.0.1".to_string(),
        };
        assert_eq!(server.address(), "127.0.0.1:8080");
    }
}
