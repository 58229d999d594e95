use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dreamcut_analysis::pipeline::PipelineConfig;
use dreamcut_analysis::types::RequestLimits;
use dreamcut_llm::factory::ClientSettings;
use dreamcut_llm::provider::Provider;
use dreamcut_llm::replicate::PollSettings;
use dreamcut_llm::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },
}

/// Service configuration.
///
/// Loaded from an optional YAML file named by `DREAMCUT_CONFIG`, then
/// overridden by environment variables. Nothing else in the crate reads the
/// environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub providers: ProvidersConfig,
    pub models: ModelsConfig,
    pub analysis: AnalysisConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `production` hides error debug output from 500 responses.
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
            environment: "development".into(),
        }
    }
}

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub together_api_key: Option<String>,
    pub together_base_url: Option<String>,
    pub replicate_api_token: Option<String>,
    pub replicate_base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            together_api_key: None,
            together_base_url: None,
            replicate_api_token: None,
            replicate_base_url: None,
            request_timeout_secs: 60,
            max_retries: 2,
            poll_interval_ms: 1000,
            max_polls: 120,
        }
    }
}

impl ProvidersConfig {
    fn settings(&self, api_key: &str, base_url: Option<&String>) -> ClientSettings {
        let mut settings = ClientSettings::new(api_key);
        settings.base_url = base_url.cloned();
        settings.timeout = Duration::from_secs(self.request_timeout_secs);
        settings.retry = RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        };
        settings.poll = PollSettings {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_polls: self.max_polls,
        };
        settings
    }

    /// Client settings for a provider, if its credential is configured.
    pub fn client_settings(&self, provider: Provider) -> Option<ClientSettings> {
        match provider {
            Provider::Together | Provider::OpenAI => self
                .together_api_key
                .as_deref()
                .map(|key| self.settings(key, self.together_base_url.as_ref())),
            Provider::Replicate => self
                .replicate_api_token
                .as_deref()
                .map(|key| self.settings(key, self.replicate_base_url.as_ref())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub query_model: String,
    /// Image captioning through the chat-completions provider.
    pub vision_model: String,
    /// Replicate slug for video assets.
    pub video_model: String,
    /// Replicate slug for audio assets.
    pub audio_model: String,
    pub combine_model: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            query_model: "meta-llama/Llama-3.3-70B-Instruct-Turbo".into(),
            vision_model: "meta-llama/Llama-3.2-90B-Vision-Instruct-Turbo".into(),
            video_model: "lucataco/video-llava".into(),
            audio_model: "openai/whisper".into(),
            combine_model: "meta-llama/Llama-3.3-70B-Instruct-Turbo".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub max_concurrent_assets: usize,
    pub max_assets: usize,
    pub max_query_chars: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let limits = RequestLimits::default();
        Self {
            max_concurrent_assets: PipelineConfig::default().max_concurrent_assets,
            max_assets: limits.max_assets,
            max_query_chars: limits.max_query_chars,
        }
    }
}

impl AnalysisConfig {
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            max_concurrent_assets: self.max_concurrent_assets.max(1),
        }
    }

    pub fn limits(&self) -> RequestLimits {
        RequestLimits {
            max_query_chars: self.max_query_chars,
            max_assets: self.max_assets,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file; briefs are kept in memory when unset.
    pub sqlite_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load from `DREAMCUT_CONFIG` (if set) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("DREAMCUT_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Override fields from environment variables, looked up through `get`.
    pub fn apply_env<F>(&mut self, get: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = get("TOGETHER_API_KEY") {
            self.providers.together_api_key = Some(key);
        }
        if let Some(token) = get("REPLICATE_API_TOKEN") {
            self.providers.replicate_api_token = Some(token);
        }
        if let Some(host) = get("DREAMCUT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("DREAMCUT_PORT") {
            self.server.port = parse_env("DREAMCUT_PORT", port)?;
        }
        if let Some(env) = get("DREAMCUT_ENV") {
            self.server.environment = env;
        }
        if let Some(path) = get("DREAMCUT_DB_PATH") {
            self.storage.sqlite_path = Some(PathBuf::from(path));
        }
        if let Some(n) = get("DREAMCUT_MAX_CONCURRENT_ASSETS") {
            self.analysis.max_concurrent_assets = parse_env("DREAMCUT_MAX_CONCURRENT_ASSETS", n)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.analysis.max_concurrent_assets, 4);
        assert_eq!(config.analysis.max_assets, 20);
        assert!(config.storage.sqlite_path.is_none());
        assert!(!config.server.is_production());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = AppConfig::from_yaml(
            "server:\n  port: 8080\nanalysis:\n  max_concurrent_assets: 2\nmodels:\n  video_model: acme/video-captioner\n",
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.analysis.max_concurrent_assets, 2);
        assert_eq!(config.analysis.max_query_chars, 8000);
        assert_eq!(config.models.video_model, "acme/video-captioner");
        assert_eq!(config.models.audio_model, "openai/whisper");
    }

    #[test]
    fn env_overrides_file() {
        let mut config = AppConfig::from_yaml("server:\n  port: 8080\n").unwrap();
        config
            .apply_env(env(&[
                ("DREAMCUT_PORT", "9000"),
                ("DREAMCUT_ENV", "production"),
                ("TOGETHER_API_KEY", "tk"),
                ("DREAMCUT_DB_PATH", "/tmp/briefs.db"),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 9000);
        assert!(config.server.is_production());
        assert_eq!(config.providers.together_api_key.as_deref(), Some("tk"));
        assert_eq!(
            config.storage.sqlite_path.as_deref(),
            Some(Path::new("/tmp/briefs.db"))
        );
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("DREAMCUT_MAX_CONCURRENT_ASSETS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("DREAMCUT_MAX_CONCURRENT_ASSETS"));
    }

    #[test]
    fn client_settings_need_credentials() {
        let mut providers = ProvidersConfig::default();
        assert!(providers.client_settings(Provider::Together).is_none());

        providers.replicate_api_token = Some("rt".into());
        providers.poll_interval_ms = 250;
        let settings = providers.client_settings(Provider::Replicate).unwrap();
        assert_eq!(settings.api_key, "rt");
        assert_eq!(settings.poll.interval, Duration::from_millis(250));
        assert_eq!(settings.timeout, Duration::from_secs(60));
    }

    #[test]
    fn zero_concurrency_is_raised_to_one() {
        let analysis = AnalysisConfig {
            max_concurrent_assets: 0,
            ..Default::default()
        };
        assert_eq!(analysis.pipeline().max_concurrent_assets, 1);
    }
}
