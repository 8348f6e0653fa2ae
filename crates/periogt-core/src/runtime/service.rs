//! Runtime service: lazily assembled artifacts, models and the engine.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::types::{EmbeddingResult, HealthStatus, PredictionRequest, PredictionResult};
use crate::chem::{GraphFeatures, StructurePreprocessor};
use crate::config::{ResolveOptions, RuntimeConfig};
use crate::error::{Error, Result};
use crate::inference::InferenceEngine;
use crate::model::{ArtifactIndex, ArtifactManager, LabelStats, PropertyInfo};
use crate::models::{ModelConfig, ModelHandle, ModelRegistry};

/// Everything loaded from the checkpoint tree, built once per process.
pub(crate) struct RuntimeState {
    pub(crate) index: Arc<ArtifactIndex>,
    pub(crate) stats: Arc<LabelStats>,
    pub(crate) preprocessor: StructurePreprocessor,
    pub(crate) registry: ModelRegistry,
}

/// Shared inference runtime behind both the hosted API and the CLI.
pub struct PerioRuntime {
    config: RuntimeConfig,
    artifacts: ArtifactManager,
    engine: Arc<InferenceEngine>,
    state: OnceCell<Arc<RuntimeState>>,
}

impl PerioRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let artifacts = ArtifactManager::new(config.checkpoint_dir.clone());
        Self {
            config,
            artifacts,
            engine: Arc::new(InferenceEngine::new()),
            state: OnceCell::new(),
        }
    }

    /// Resolve configuration from the environment and log it.
    pub fn from_env() -> Result<Self> {
        let config = RuntimeConfig::from_env(ResolveOptions::strict())?;
        for (key, value) in config.describe() {
            info!("{key}={value}");
        }
        for warning in &config.warnings {
            warn!("{warning}");
        }
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn artifacts(&self) -> &ArtifactManager {
        &self.artifacts
    }

    pub(crate) async fn state(&self) -> Result<Arc<RuntimeState>> {
        let state = self
            .state
            .get_or_try_init(|| async {
                self.artifacts.ensure_artifacts()?;
                let layout = self.artifacts.layout();
                let index = Arc::new(self.artifacts.load_index()?);
                let stats = Arc::new(LabelStats::load(&layout.label_stats())?);
                let preprocessor = StructurePreprocessor::load(&layout.scaler())?;
                let model_config = ModelConfig::load(&self.config.model_config_path())?;
                let registry = ModelRegistry::new(
                    layout,
                    index.clone(),
                    model_config,
                    self.config.device.clone(),
                )?;
                info!(
                    "Runtime ready: {} properties indexed, device {}",
                    index.len(),
                    self.config.device.kind.as_str()
                );
                Ok::<_, Error>(Arc::new(RuntimeState {
                    index,
                    stats,
                    preprocessor,
                    registry,
                }))
            })
            .await?;
        Ok(state.clone())
    }

    /// Check artifacts and load the index without touching model weights.
    pub async fn initialize(&self) -> Result<()> {
        self.state().await.map(|_| ())
    }

    pub async fn list_properties(&self) -> Result<Vec<PropertyInfo>> {
        let state = self.state().await?;
        Ok(state
            .index
            .iter()
            .map(|(id, entry)| PropertyInfo {
                id: id.clone(),
                label: entry.label.clone(),
                units: entry.units.clone(),
            })
            .collect())
    }

    pub(crate) fn check_property(state: &RuntimeState, property: &str) -> Result<()> {
        if state.index.get(property).is_none() {
            return Err(Error::UnsupportedProperty {
                property: property.to_string(),
                supported: state.index.properties(),
            });
        }
        Ok(())
    }

    pub async fn predict(
        &self,
        request: &PredictionRequest,
        request_id: &str,
    ) -> Result<PredictionResult> {
        let state = self.state().await?;
        Self::check_property(&state, &request.property)?;
        let features = state.preprocessor.preprocess(&request.smiles)?;
        let model = state.registry.get_property_model(&request.property).await?;
        self.predict_loaded(&state, model, features, request, request_id)
            .await
    }

    /// Forward pass with an already-loaded model.
    pub(crate) async fn predict_loaded(
        &self,
        state: &RuntimeState,
        model: Arc<ModelHandle>,
        features: GraphFeatures,
        request: &PredictionRequest,
        request_id: &str,
    ) -> Result<PredictionResult> {
        let engine = self.engine.clone();
        let stats = state.stats.clone();
        let return_embedding = request.return_embedding;
        let checkpoint = model.checkpoint().display().to_string();

        let (prediction, embedding) = tokio::task::spawn_blocking(move || {
            if return_embedding {
                engine
                    .predict_with_embedding(&features, &model, &stats)
                    .map(|(p, e)| (p, Some(e.vector)))
            } else {
                engine.predict(&features, &model, &stats).map(|p| (p, None))
            }
        })
        .await
        .map_err(|e| Error::Inference(format!("inference task failed: {e}")))??;

        Ok(PredictionResult {
            smiles: request.smiles.clone(),
            property: prediction.property,
            value: prediction.value,
            units: prediction.units,
            embedding,
            checkpoint,
            request_id: request_id.to_string(),
        })
    }

    pub async fn embed(&self, smiles: &str, request_id: &str) -> Result<EmbeddingResult> {
        let state = self.state().await?;
        let features = state.preprocessor.preprocess(smiles)?;
        let model = state.registry.get_embedding_model().await?;
        let engine = self.engine.clone();

        let embedding = tokio::task::spawn_blocking(move || engine.embed(&features, &model))
            .await
            .map_err(|e| Error::Inference(format!("inference task failed: {e}")))??;

        Ok(EmbeddingResult {
            smiles: smiles.to_string(),
            dim: embedding.dim,
            embedding: embedding.vector,
            request_id: request_id.to_string(),
        })
    }

    /// Readiness flags; failures are reported in the payload, never raised.
    pub async fn health(&self) -> HealthStatus {
        let gpu = &self.config.gpu;
        let mut status = HealthStatus {
            status: "ok".to_string(),
            artifacts_ready: false,
            model_loaded: false,
            device: self.config.device.kind.as_str().to_string(),
            gpu_available: gpu.runtime_visible,
            gpu_name: gpu.name.clone(),
            properties_available: 0,
            loaded_properties: Vec::new(),
            error: None,
        };

        match self.state().await {
            Ok(state) => {
                status.artifacts_ready = true;
                status.properties_available = state.index.len();
                status.model_loaded = state.registry.backbone_loaded();
                status.loaded_properties = state.registry.loaded_properties().await;
            }
            Err(e) => {
                status.status = "degraded".to_string();
                status.error = Some(e.to_string());
            }
        }
        status
    }
}
