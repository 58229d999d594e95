use std::sync::Arc;

use thiserror::Error;

use dreamcut_analysis::pipeline::{PipelineModels, UnifiedAnalyzer};
use dreamcut_analysis::progress::RealtimeHub;
use dreamcut_analysis::types::RequestLimits;
use dreamcut_core::error::DreamcutError;
use dreamcut_core::media::MediaType;
use dreamcut_core::model::VisionModel;
use dreamcut_llm::factory::{create_chat_model, create_vision_model};
use dreamcut_llm::provider::Provider;

use crate::config::{AppConfig, ConfigError};
use crate::jobs::JobRunner;
use crate::sqlite_store::SqliteBriefStore;
use crate::store::{BriefStore, MemoryBriefStore, StoreError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("missing credential: set {0}")]
    MissingCredential(&'static str),

    #[error("failed to build model client: {0}")]
    Model(#[from] DreamcutError),

    #[error("failed to open brief store: {0}")]
    Store(#[from] StoreError),
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub analyzer: Arc<UnifiedAnalyzer>,
    pub store: Arc<dyn BriefStore>,
    pub hub: RealtimeHub,
    pub jobs: JobRunner,
}

impl AppState {
    /// Wire the pipeline to a fresh realtime hub and the given store.
    pub fn new(config: AppConfig, models: PipelineModels, store: Arc<dyn BriefStore>) -> Self {
        let hub = RealtimeHub::new();
        let analyzer = Arc::new(UnifiedAnalyzer::new(
            models,
            config.analysis.pipeline(),
            Arc::new(hub.clone()),
        ));
        let jobs = JobRunner::new(Arc::clone(&analyzer), Arc::clone(&store), hub.clone());
        Self {
            config: Arc::new(config),
            analyzer,
            store,
            hub,
            jobs,
        }
    }

    /// Build provider clients and the configured store.
    pub fn from_config(config: AppConfig) -> Result<Self, StartupError> {
        let models = build_models(&config)?;
        let store: Arc<dyn BriefStore> = match &config.storage.sqlite_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "using sqlite brief store");
                Arc::new(SqliteBriefStore::new(path)?)
            }
            None => {
                tracing::warn!("no sqlite_path configured; briefs are kept in memory");
                Arc::new(MemoryBriefStore::new())
            }
        };
        Ok(Self::new(config, models, store))
    }

    pub fn limits(&self) -> RequestLimits {
        self.config.analysis.limits()
    }

    /// Whether 500 responses may carry debug detail.
    pub fn expose_debug(&self) -> bool {
        !self.config.server.is_production()
    }
}

fn build_models(config: &AppConfig) -> Result<PipelineModels, StartupError> {
    let together = config
        .providers
        .client_settings(Provider::Together)
        .ok_or(StartupError::MissingCredential("TOGETHER_API_KEY"))?;
    let models = &config.models;

    let query = create_chat_model(&Provider::Together, models.query_model.clone(), &together)?;
    let combine = create_chat_model(&Provider::Together, models.combine_model.clone(), &together)?;
    let mut vision: Vec<Arc<dyn VisionModel>> = vec![create_vision_model(
        &Provider::Together,
        models.vision_model.clone(),
        vec![MediaType::Image],
        &together,
    )?];

    match config.providers.client_settings(Provider::Replicate) {
        Some(replicate) => {
            vision.push(create_vision_model(
                &Provider::Replicate,
                models.video_model.clone(),
                vec![MediaType::Video],
                &replicate,
            )?);
            vision.push(create_vision_model(
                &Provider::Replicate,
                models.audio_model.clone(),
                vec![MediaType::Audio],
                &replicate,
            )?);
        }
        None => tracing::warn!(
            "REPLICATE_API_TOKEN not set; video and audio assets get metadata-only analysis"
        ),
    }

    Ok(PipelineModels {
        query,
        combine,
        vision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_together_key_fails_startup() {
        let err = AppState::from_config(AppConfig::default()).err().unwrap();
        assert!(matches!(err, StartupError::MissingCredential("TOGETHER_API_KEY")));
    }

    #[tokio::test]
    async fn builds_from_config_with_credentials() {
        let mut config = AppConfig::default();
        config.providers.together_api_key = Some("test-key".into());
        config.providers.replicate_api_token = Some("r8_test".into());
        config.server.environment = "production".into();

        let state = AppState::from_config(config).unwrap();
        let models = state.analyzer.models();
        assert_eq!(models.query, "meta-llama/Llama-3.3-70B-Instruct-Turbo");
        assert_eq!(models.vision.len(), 3);
        assert!(!state.expose_debug());
    }

    #[tokio::test]
    async fn opens_sqlite_store_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.providers.together_api_key = Some("test-key".into());
        config.storage.sqlite_path = Some(dir.path().join("briefs.db"));

        let state = AppState::from_config(config).unwrap();
        assert!(state.store.get_query("missing").await.unwrap().is_none());
        assert!(dir.path().join("briefs.db").exists());
    }
}
