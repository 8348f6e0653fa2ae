//! Process-wide model cache: each model is deserialized at most once and
//! shared afterwards.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OnceCell, RwLock};
use tracing::info;

use super::backbone::Backbone;
use super::config::ModelConfig;
use super::device::DeviceProfile;
use super::handle::{ModelHandle, PropertyModel};
use super::head::PropertyHead;
use crate::error::{Error, Result};
use crate::model::{ArtifactIndex, ArtifactLayout};

#[derive(Clone)]
pub struct ModelRegistry {
    config: ModelConfig,
    device: DeviceProfile,
    pretrained_weights: PathBuf,
    index: Arc<ArtifactIndex>,
    backbone: Arc<OnceCell<Arc<Backbone>>>,
    embedding: Arc<OnceCell<Arc<ModelHandle>>>,
    property_models: Arc<RwLock<HashMap<String, Arc<OnceCell<Arc<ModelHandle>>>>>>,
    weight_loads: Arc<AtomicUsize>,
}

impl ModelRegistry {
    pub fn new(
        layout: &ArtifactLayout,
        index: Arc<ArtifactIndex>,
        config: ModelConfig,
        device: DeviceProfile,
    ) -> Result<Self> {
        let pretrained_weights =
            layout
                .pretrained_weights()
                .ok_or_else(|| Error::CheckpointMissing {
                    what: "pretrained backbone weights (*.safetensors or *.pth)".to_string(),
                    path: layout.pretrained_dir(),
                })?;
        Ok(Self {
            config,
            device,
            pretrained_weights,
            index,
            backbone: Arc::new(OnceCell::new()),
            embedding: Arc::new(OnceCell::new()),
            property_models: Arc::new(RwLock::new(HashMap::new())),
            weight_loads: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn device(&self) -> &DeviceProfile {
        &self.device
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn index(&self) -> &ArtifactIndex {
        &self.index
    }

    /// Number of weight files deserialized so far.
    pub fn weight_loads(&self) -> usize {
        self.weight_loads.load(Ordering::SeqCst)
    }

    pub fn backbone_loaded(&self) -> bool {
        self.backbone.initialized()
    }

    pub async fn loaded_properties(&self) -> Vec<String> {
        let guard = self.property_models.read().await;
        let mut loaded: Vec<String> = guard
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(prop, _)| prop.clone())
            .collect();
        loaded.sort();
        loaded
    }

    async fn backbone(&self) -> Result<Arc<Backbone>> {
        let backbone = self
            .backbone
            .get_or_try_init({
                let path = self.pretrained_weights.clone();
                let config = self.config.clone();
                let device = self.device.device.clone();
                let loads = self.weight_loads.clone();
                move || async move {
                    info!("Loading pretrained backbone from {:?}", path);
                    tokio::task::spawn_blocking(move || {
                        loads.fetch_add(1, Ordering::SeqCst);
                        Backbone::from_file(&path, &config, &device)
                    })
                    .await
                    .map_err(|e| Error::Inference(format!("backbone load task failed: {e}")))?
                    .map(Arc::new)
                }
            })
            .await?;
        Ok(backbone.clone())
    }

    /// The embedding-only handle over the shared backbone.
    pub async fn get_embedding_model(&self) -> Result<Arc<ModelHandle>> {
        let handle = self
            .embedding
            .get_or_try_init(|| async {
                let backbone = self.backbone().await?;
                Ok::<_, Error>(Arc::new(ModelHandle::Embedding {
                    backbone,
                    checkpoint: self.pretrained_weights.clone(),
                }))
            })
            .await?;
        Ok(handle.clone())
    }

    /// The finetuned model for `property`, as named by the artifact index.
    pub async fn get_property_model(&self, property: &str) -> Result<Arc<ModelHandle>> {
        let entry = self
            .index
            .get(property)
            .cloned()
            .ok_or_else(|| Error::UnsupportedProperty {
                property: property.to_string(),
                supported: self.index.properties(),
            })?;

        let cell = {
            let mut guard = self.property_models.write().await;
            guard
                .entry(property.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let handle = cell
            .get_or_try_init(|| async {
                let backbone = self.backbone().await?;
                info!(
                    "Loading {} head from {:?}",
                    property, entry.checkpoint
                );
                let head = {
                    let path = entry.checkpoint.clone();
                    let config = self.config.clone();
                    let device = self.device.device.clone();
                    let loads = self.weight_loads.clone();
                    tokio::task::spawn_blocking(move || {
                        loads.fetch_add(1, Ordering::SeqCst);
                        PropertyHead::from_file(&path, &config, &device)
                    })
                    .await
                    .map_err(|e| Error::Inference(format!("head load task failed: {e}")))??
                };
                Ok::<_, Error>(Arc::new(ModelHandle::Property(PropertyModel {
                    property: property.to_string(),
                    label: entry.label.clone(),
                    units: entry.units.clone(),
                    checkpoint: entry.checkpoint.clone(),
                    backbone,
                    head,
                })))
            })
            .await?;
        Ok(handle.clone())
    }
}
