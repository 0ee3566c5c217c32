//! Runtime configuration from the process environment.
//!
//! `.env` files are honoured for desktop development; real environment
//! variables always win.

use crate::storage::DEFAULT_QUOTA_BYTES;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";
const DEFAULT_OLLAMA_MODEL: &str = "llama3.1:latest";
const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got '{value}'")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub demo_mode: bool,
    /// Base URL of a hosted tutor proxy exposing `/api/chat` and `/api/quiz`.
    pub endpoint: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub use_ollama: bool,
    pub ollama_host: String,
    pub ollama_model: String,
    pub storage_dir: Option<PathBuf>,
    pub storage_quota_bytes: u64,
    pub request_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            demo_mode: false,
            endpoint: None,
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            anthropic_api_key: None,
            anthropic_model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            use_ollama: false,
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
            storage_dir: None,
            storage_quota_bytes: DEFAULT_QUOTA_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl Settings {
    /// Load `.env` (if any) and read settings from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Err(err) if !err.not_found() => {
                tracing::warn!(error = %err, "ignoring unreadable .env file");
            }
            _ => {}
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup; `load` passes the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage_quota_bytes = match non_empty("LYCEUM_STORAGE_QUOTA_BYTES") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "LYCEUM_STORAGE_QUOTA_BYTES",
                expected: "a byte count",
                value: raw,
            })?,
            None => defaults.storage_quota_bytes,
        };
        let request_timeout = match non_empty("LYCEUM_REQUEST_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(raw.trim().parse().map_err(|_| {
                ConfigError::Invalid {
                    key: "LYCEUM_REQUEST_TIMEOUT_SECS",
                    expected: "a number of seconds",
                    value: raw,
                }
            })?),
            None => defaults.request_timeout,
        };

        Ok(Self {
            demo_mode: non_empty("LYCEUM_DEMO_MODE").is_some_and(|v| is_truthy(&v)),
            endpoint: non_empty("LYCEUM_ENDPOINT").map(|v| v.trim_end_matches('/').to_string()),
            gemini_api_key: non_empty("GEMINI_API_KEY").or_else(|| non_empty("API_KEY")),
            gemini_model: non_empty("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_model: non_empty("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            anthropic_api_key: non_empty("ANTHROPIC_API_KEY"),
            anthropic_model: non_empty("ANTHROPIC_MODEL").unwrap_or(defaults.anthropic_model),
            use_ollama: non_empty("LLM_USE_OLLAMA").is_some_and(|v| is_truthy(&v)),
            ollama_host: non_empty("OLLAMA_HOST")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.ollama_host),
            ollama_model: non_empty("LLM_MODEL").unwrap_or(defaults.ollama_model),
            storage_dir: non_empty("LYCEUM_STORAGE_DIR").map(PathBuf::from),
            storage_quota_bytes,
            request_timeout,
        })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        assert_eq!(settings(&[]).unwrap(), Settings::default());
    }

    #[test]
    fn reads_flags_and_keys() {
        let s = settings(&[
            ("LYCEUM_DEMO_MODE", "Yes"),
            ("LYCEUM_ENDPOINT", "https://tutor.example/"),
            ("API_KEY", "legacy-key"),
            ("LLM_USE_OLLAMA", "0"),
            ("LYCEUM_STORAGE_QUOTA_BYTES", "2048"),
        ])
        .unwrap();
        assert!(s.demo_mode);
        assert_eq!(s.endpoint.as_deref(), Some("https://tutor.example"));
        assert_eq!(s.gemini_api_key.as_deref(), Some("legacy-key"));
        assert!(!s.use_ollama);
        assert_eq!(s.storage_quota_bytes, 2048);
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = settings(&[("LYCEUM_REQUEST_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("LYCEUM_REQUEST_TIMEOUT_SECS"));
    }
}
