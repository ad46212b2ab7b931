use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::edit::{DEFAULT_MAX_IMAGES, DEFAULT_MAX_IMAGE_BYTES, EditLimits};
use crate::services::credential_gate::{DEFAULT_DELAY, DEFAULT_PASSWORD, DEFAULT_USERNAME};
use crate::services::workspace::DEFAULT_TOKEN_TTL;

pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

/// Ten full-size images as base64 JSON plus headroom.
const DEFAULT_BODY_LIMIT_BYTES: usize = 80 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct StudioConfig {
    pub common: core_config::Config,
    pub provider: ProviderKind,
    pub google: GoogleConfig,
    pub models: ModelConfig,
    pub gate: GateConfig,
    pub limits: EditLimits,
    /// Largest request body accepted by any route.
    pub body_limit_bytes: usize,
}

/// Which backend answers chat and image requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    /// Offline canned responses.
    Mock,
}

impl FromStr for ProviderKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "mock" => Ok(ProviderKind::Mock),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "STUDIO_PROVIDER must be 'gemini' or 'mock', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// Absent only when the mock provider is selected.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub chat_model: String,
    pub image_model: String,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub username: String,
    pub password: Secret<String>,
    pub delay: Duration,
    /// How long a login token stays valid.
    pub token_ttl: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            username: DEFAULT_USERNAME.to_string(),
            password: Secret::new(DEFAULT_PASSWORD.to_string()),
            delay: DEFAULT_DELAY,
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }
}

impl StudioConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let provider: ProviderKind = get_env("STUDIO_PROVIDER", Some("gemini"), false)?.parse()?;
        let api_key = match provider {
            ProviderKind::Gemini => Some(get_env("GOOGLE_API_KEY", None, is_prod)?),
            ProviderKind::Mock => env::var("GOOGLE_API_KEY").ok(),
        };

        Ok(StudioConfig {
            common: common_config,
            provider,
            google: GoogleConfig { api_key },
            models: ModelConfig {
                chat_model: get_env("STUDIO_CHAT_MODEL", Some(DEFAULT_CHAT_MODEL), false)?,
                image_model: get_env("STUDIO_IMAGE_MODEL", Some(DEFAULT_IMAGE_MODEL), false)?,
            },
            gate: GateConfig {
                username: get_env("STUDIO_GATE_USERNAME", Some(DEFAULT_USERNAME), is_prod)?,
                password: Secret::new(get_env(
                    "STUDIO_GATE_PASSWORD",
                    Some(DEFAULT_PASSWORD),
                    is_prod,
                )?),
                delay: Duration::from_millis(get_parsed(
                    "STUDIO_GATE_DELAY_MS",
                    DEFAULT_DELAY.as_millis() as u64,
                )?),
                token_ttl: Duration::from_secs(get_parsed(
                    "STUDIO_TOKEN_TTL_SECS",
                    DEFAULT_TOKEN_TTL.as_secs(),
                )?),
            },
            limits: EditLimits {
                max_images: get_parsed("STUDIO_MAX_IMAGES", DEFAULT_MAX_IMAGES)?,
                max_image_bytes: get_parsed("STUDIO_MAX_IMAGE_BYTES", DEFAULT_MAX_IMAGE_BYTES)?,
            },
            body_limit_bytes: get_parsed("STUDIO_BODY_LIMIT_BYTES", DEFAULT_BODY_LIMIT_BYTES)?,
        })
    }

    /// Mock providers, default gate and limits, random port.
    pub fn mock() -> Self {
        StudioConfig {
            common: core_config::Config {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            provider: ProviderKind::Mock,
            google: GoogleConfig { api_key: None },
            models: ModelConfig {
                chat_model: DEFAULT_CHAT_MODEL.to_string(),
                image_model: DEFAULT_IMAGE_MODEL.to_string(),
            },
            gate: GateConfig::default(),
            limits: EditLimits::default(),
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
        }
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn get_parsed<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.trim().parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value '{}': {}", key, val, e))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_case_insensitively() {
        assert_eq!("Gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert_eq!("mock".parse::<ProviderKind>().unwrap(), ProviderKind::Mock);
        assert!("openai".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn unset_keys_fall_back_outside_prod() {
        assert_eq!(
            get_env("STUDIO_TEST_UNSET_KEY", Some("fallback"), false).unwrap(),
            "fallback"
        );
        assert!(get_env("STUDIO_TEST_UNSET_KEY", Some("fallback"), true).is_err());
        assert!(get_env("STUDIO_TEST_UNSET_KEY", None, false).is_err());
        assert_eq!(get_parsed("STUDIO_TEST_UNSET_KEY", 42usize).unwrap(), 42);
    }

    #[test]
    fn mock_config_uses_default_limits() {
        let config = StudioConfig::mock();
        assert_eq!(config.limits.max_images, 10);
        assert_eq!(config.limits.max_image_bytes, 5 * 1024 * 1024);
        assert_eq!(config.gate.username, "kalky");
        assert_eq!(config.common.port, 0);
    }
}
