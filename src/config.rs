// Configuration loading.
// TOML file with defaults for every field; credentials come from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{LensError, Result};
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub github: GitHubConfig,
    pub analysis: AnalysisConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_base: String,
    pub timeout_secs: u64,
    /// Comments fetched as prompt context; 0 disables comment fetching.
    pub max_comments: u32,
    pub retry: RetryPolicy,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            timeout_secs: 10,
            max_comments: 20,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnalysisConfig {
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-pro".to_string(),
            temperature: 0.7,
            max_output_tokens: 1024,
            timeout_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Memory,
    Disk,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub ttl_secs: u64,
    /// Capacity bound for the memory backend. Unbounded when absent.
    pub max_entries: Option<usize>,
    /// Periodic removal of expired entries. Disabled when absent.
    pub sweep_interval_secs: Option<u64>,
    /// Disk backend directory. Defaults to the platform cache directory.
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            ttl_secs: 86_400,
            max_entries: None,
            sweep_interval_secs: None,
            dir: None,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Config {
    fn validate(self) -> Result<Self> {
        if self.cache.ttl_secs == 0 {
            return Err(LensError::Config("cache.ttl_secs must be positive".into()));
        }
        if self.cache.max_entries == Some(0) {
            return Err(LensError::Config(
                "cache.max_entries must be positive when set".into(),
            ));
        }
        if self.cache.sweep_interval_secs == Some(0) {
            return Err(LensError::Config(
                "cache.sweep_interval_secs must be positive when set".into(),
            ));
        }
        for (name, retry) in [
            ("github.retry", &self.github.retry),
            ("analysis.retry", &self.analysis.retry),
        ] {
            if retry.max_attempts == 0 {
                return Err(LensError::Config(format!(
                    "{}.max_attempts must be at least 1",
                    name
                )));
            }
            if !(0.0..=1.0).contains(&retry.jitter) {
                return Err(LensError::Config(format!(
                    "{}.jitter must be within [0, 1]",
                    name
                )));
            }
        }
        Ok(self)
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config =
        toml::from_str(content).map_err(|e| LensError::Config(format!("invalid TOML: {}", e)))?;
    config.validate()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        LensError::Config(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.cache.ttl(), Duration::from_secs(86_400));
        assert_eq!(config.github.max_comments, 20);
        assert_eq!(config.analysis.model, "gemini-pro");
    }

    #[test]
    fn test_partial_sections() {
        let config = parse_config(
            r#"
            [cache]
            backend = "disk"
            ttl_secs = 60
            max_entries = 100

            [github.retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.backend, CacheBackend::Disk);
        assert_eq!(config.cache.max_entries, Some(100));
        assert_eq!(config.github.retry.max_attempts, 5);
        assert_eq!(config.github.retry.base_delay_ms, 500);
        assert_eq!(config.analysis.retry, RetryPolicy::default());
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(parse_config("[cache]\nttl_secs = 0").is_err());
        assert!(parse_config("[cache]\nmax_entries = 0").is_err());
        assert!(parse_config("[analysis.retry]\njitter = 2.0").is_err());
        assert!(parse_config("[cache]\nbackend = \"redis\"").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/nonexistent/issue-lens.toml")).unwrap_err();
        assert!(matches!(err, LensError::Config(_)));
    }
}
