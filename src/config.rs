use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_SCENARIO_COUNT: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY (or GOOGLE_API_KEY) is required")]
    MissingApiKey,
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub gemini_api_base: String,
    pub gemini_text_model: String,
    pub gemini_image_model: String,
    pub gemini_temperature: f32,
    pub gemini_safety_settings: SafetyProfile,
    pub gemini_max_retry_attempts: usize,
    pub image_aspect_ratio: String,
    pub image_size: Option<String>,
    pub provider_timeout: Duration,
    pub render_concurrency: usize,
    pub scenario_count: usize,
    pub log_level: String,
    pub log_dir: PathBuf,
    pub output_dir: PathBuf,
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str, default: &str) -> String {
        (self.lookup)(name).unwrap_or_else(|| default.to_string())
    }

    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn f32(&self, name: &str, default: f32) -> f32 {
        (self.lookup)(name)
            .and_then(|value| value.trim().parse::<f32>().ok())
            .unwrap_or(default)
    }

    fn u64(&self, name: &str, default: u64) -> u64 {
        (self.lookup)(name)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(default)
    }

    fn usize(&self, name: &str, default: usize) -> usize {
        (self.lookup)(name)
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(default)
    }
}

/// Gemini safety filter strength. Anything unrecognised keeps the filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyProfile {
    Standard,
    Permissive,
}

fn normalize_gemini_safety_settings(value: &str) -> SafetyProfile {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return SafetyProfile::Standard;
    }

    match trimmed.to_lowercase().as_str() {
        "standard" => SafetyProfile::Standard,
        "permissive" | "off" | "none" => SafetyProfile::Permissive,
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to standard.",
                value
            );
            SafetyProfile::Standard
        }
    }
}

fn validate_aspect_ratio(value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    let valid = trimmed
        .split_once(':')
        .map(|(w, h)| {
            matches!(w.parse::<u32>(), Ok(n) if n > 0) && matches!(h.parse::<u32>(), Ok(n) if n > 0)
        })
        .unwrap_or(false);
    if !valid {
        return Err(ConfigError::Invalid {
            name: "IMAGE_ASPECT_RATIO",
            value: value.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let gemini_api_key = env
            .optional("GEMINI_API_KEY")
            .or_else(|| env.optional("GOOGLE_API_KEY"))
            .ok_or(ConfigError::MissingApiKey)?;

        let scenario_count = env.usize("SCENARIO_COUNT", DEFAULT_SCENARIO_COUNT);
        if scenario_count == 0 {
            return Err(ConfigError::Invalid {
                name: "SCENARIO_COUNT",
                value: "0".to_string(),
            });
        }

        Ok(Config {
            gemini_api_key,
            gemini_api_base: env
                .string(
                    "GEMINI_API_BASE",
                    "https://generativelanguage.googleapis.com/v1beta",
                )
                .trim_end_matches('/')
                .to_string(),
            gemini_text_model: env.string("GEMINI_TEXT_MODEL", "gemini-2.0-flash"),
            gemini_image_model: env.string("GEMINI_IMAGE_MODEL", "gemini-2.5-flash-image"),
            gemini_temperature: env.f32("GEMINI_TEMPERATURE", 0.9),
            gemini_safety_settings: normalize_gemini_safety_settings(&env.string(
                "GEMINI_SAFETY_SETTINGS",
                "standard",
            )),
            gemini_max_retry_attempts: env.usize("GEMINI_MAX_RETRY_ATTEMPTS", 2).max(1),
            image_aspect_ratio: validate_aspect_ratio(&env.string("IMAGE_ASPECT_RATIO", "1:1"))?,
            image_size: env.optional("IMAGE_SIZE"),
            provider_timeout: Duration::from_secs(env.u64("PROVIDER_TIMEOUT_SECONDS", 90).max(1)),
            render_concurrency: env.usize("RENDER_CONCURRENCY", 1).max(1),
            scenario_count,
            log_level: env.string("LOG_LEVEL", "info").to_lowercase(),
            log_dir: PathBuf::from(env.string("LOG_DIR", "logs")),
            output_dir: PathBuf::from(env.string("OUTPUT_DIR", "output")),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let err = config_from(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));

        let err = config_from(&[("GEMINI_API_KEY", "   ")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn google_api_key_is_accepted_as_fallback() {
        let config = config_from(&[("GOOGLE_API_KEY", "abc")]).unwrap();
        assert_eq!(config.gemini_api_key, "abc");
    }

    #[test]
    fn defaults_are_applied() {
        let config = config_from(&[("GEMINI_API_KEY", "key")]).unwrap();
        assert_eq!(config.scenario_count, DEFAULT_SCENARIO_COUNT);
        assert_eq!(config.image_aspect_ratio, "1:1");
        assert_eq!(config.render_concurrency, 1);
        assert_eq!(config.provider_timeout, Duration::from_secs(90));
        assert_eq!(config.gemini_safety_settings, SafetyProfile::Standard);
        assert!(config.image_size.is_none());
    }

    #[test]
    fn rejects_malformed_aspect_ratio_and_zero_count() {
        let err = config_from(&[("GEMINI_API_KEY", "key"), ("IMAGE_ASPECT_RATIO", "wide")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "IMAGE_ASPECT_RATIO", .. }));

        let err =
            config_from(&[("GEMINI_API_KEY", "key"), ("SCENARIO_COUNT", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "SCENARIO_COUNT", .. }));
    }

    #[test]
    fn clamps_concurrency_and_trims_api_base() {
        let config = config_from(&[
            ("GEMINI_API_KEY", "key"),
            ("RENDER_CONCURRENCY", "0"),
            ("GEMINI_API_BASE", "http://localhost:8080/v1beta/"),
        ])
        .unwrap();
        assert_eq!(config.render_concurrency, 1);
        assert_eq!(config.gemini_api_base, "http://localhost:8080/v1beta");
    }

    #[test]
    fn unknown_safety_setting_keeps_filters_on() {
        let config =
            config_from(&[("GEMINI_API_KEY", "key"), ("GEMINI_SAFETY_SETTINGS", "loose")]).unwrap();
        assert_eq!(config.gemini_safety_settings, SafetyProfile::Standard);

        let config =
            config_from(&[("GEMINI_API_KEY", "key"), ("GEMINI_SAFETY_SETTINGS", "  ")]).unwrap();
        assert_eq!(config.gemini_safety_settings, SafetyProfile::Standard);

        let config =
            config_from(&[("GEMINI_API_KEY", "key"), ("GEMINI_SAFETY_SETTINGS", "OFF")]).unwrap();
        assert_eq!(config.gemini_safety_settings, SafetyProfile::Permissive);
    }
}
