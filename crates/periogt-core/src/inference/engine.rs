use std::sync::Mutex;

use candle_core::Tensor;
use tracing::debug;

use crate::chem::GraphFeatures;
use crate::error::{Error, Result};
use crate::model::LabelStats;
use crate::models::{ModelHandle, PropertyModel};

/// A denormalized property value.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub property: String,
    /// Normalized model output.
    pub raw: f64,
    pub value: f64,
    pub units: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub dim: usize,
}

/// Runs forward passes one at a time per process.
#[derive(Default)]
pub struct InferenceEngine {
    compute: Mutex<()>,
}

impl InferenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_compute<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self
            .compute
            .lock()
            .map_err(|_| Error::Inference("compute lock poisoned".to_string()))?;
        f()
    }

    fn property_model(model: &ModelHandle) -> Result<&PropertyModel> {
        model.property().ok_or_else(|| {
            Error::Inference("embedding-only model cannot predict a property".to_string())
        })
    }

    fn denormalize(
        model: &PropertyModel,
        raw: f32,
        stats: &LabelStats,
    ) -> Result<Prediction> {
        let stat = stats.get(&model.property)?;
        let raw = raw as f64;
        let value = stat.denormalize(raw);
        if !value.is_finite() {
            return Err(Error::Inference(format!(
                "non-finite prediction for '{}'",
                model.property
            )));
        }
        debug!(
            "{}: raw={} -> {} {}",
            model.property, raw, value, model.units
        );
        Ok(Prediction {
            property: model.property.clone(),
            raw,
            value,
            units: model.units.clone(),
        })
    }

    /// `value = raw * std + mean` for the model's property.
    pub fn predict(
        &self,
        features: &GraphFeatures,
        model: &ModelHandle,
        stats: &LabelStats,
    ) -> Result<Prediction> {
        let property = Self::property_model(model)?;
        // Fail on missing stats before spending a forward pass.
        stats.get(&property.property)?;
        let raw = self.with_compute(|| {
            let embedding = property.backbone.forward(features)?;
            Ok(property.head.forward(&embedding)?)
        })?;
        Self::denormalize(property, raw, stats)
    }

    /// Prediction plus the embedding from the same forward pass.
    pub fn predict_with_embedding(
        &self,
        features: &GraphFeatures,
        model: &ModelHandle,
        stats: &LabelStats,
    ) -> Result<(Prediction, Embedding)> {
        let property = Self::property_model(model)?;
        stats.get(&property.property)?;
        let (raw, embedding) = self.with_compute(|| {
            let embedding = property.backbone.forward(features)?;
            let raw = property.head.forward(&embedding)?;
            Ok((raw, to_embedding(&embedding)?))
        })?;
        Ok((Self::denormalize(property, raw, stats)?, embedding))
    }

    /// Backbone embedding of one structure.
    pub fn embed(&self, features: &GraphFeatures, model: &ModelHandle) -> Result<Embedding> {
        self.with_compute(|| {
            let embedding = model.backbone().forward(features)?;
            to_embedding(&embedding)
        })
    }
}

fn to_embedding(tensor: &Tensor) -> Result<Embedding> {
    let vector = tensor.to_vec1::<f32>()?;
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(Error::Inference("non-finite embedding".to_string()));
    }
    Ok(Embedding {
        dim: vector.len(),
        vector,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::chem::StructurePreprocessor;
    use crate::error::ErrorCode;
    use crate::model::ArtifactIndex;
    use crate::models::{DeviceProfile, ModelRegistry};
    use crate::testing::ArtifactFixture;

    async fn setup(fixture: &ArtifactFixture) -> (ModelRegistry, StructurePreprocessor, LabelStats) {
        let layout = fixture.layout();
        let index = Arc::new(ArtifactIndex::load(&layout.index()).unwrap());
        let registry =
            ModelRegistry::new(&layout, index, fixture.config.clone(), DeviceProfile::cpu())
                .unwrap();
        let pre = StructurePreprocessor::load(&layout.scaler()).unwrap();
        let stats = LabelStats::load(&layout.label_stats()).unwrap();
        (registry, pre, stats)
    }

    #[tokio::test]
    async fn test_predict_is_deterministic_and_denormalized() {
        let fixture = ArtifactFixture::new(&["tg"]);
        let (registry, pre, stats) = setup(&fixture).await;
        let engine = InferenceEngine::new();
        let model = registry.get_property_model("tg").await.unwrap();
        let features = pre.preprocess("*CC*").unwrap();

        let first = engine.predict(&features, &model, &stats).unwrap();
        let second = engine.predict(&features, &model, &stats).unwrap();
        assert_eq!(first, second);
        assert!(first.value.is_finite());
        assert_eq!(first.units, "K");
        let stat = stats.get("tg").unwrap();
        assert_eq!(first.value, first.raw * stat.std + stat.mean);
    }

    #[tokio::test]
    async fn test_embedding_dimension_and_consistency() {
        let fixture = ArtifactFixture::new(&["tg"]);
        let (registry, pre, stats) = setup(&fixture).await;
        let engine = InferenceEngine::new();
        let features = pre.preprocess("*CC(c1ccccc1)*").unwrap();

        let embed_model = registry.get_embedding_model().await.unwrap();
        let embedding = engine.embed(&features, &embed_model).unwrap();
        assert_eq!(embedding.dim, fixture.config.embedding_dim());

        let tg = registry.get_property_model("tg").await.unwrap();
        let (prediction, joint) = engine.predict_with_embedding(&features, &tg, &stats).unwrap();
        assert_eq!(joint, embedding);
        assert_eq!(prediction, engine.predict(&features, &tg, &stats).unwrap());
    }

    #[tokio::test]
    async fn test_missing_label_stats_is_configuration_error() {
        let fixture = ArtifactFixture::new(&["tg"]);
        let (registry, pre, _) = setup(&fixture).await;
        let empty = LabelStats::from_entries(fixture.layout().label_stats(), Default::default());
        let model = registry.get_property_model("tg").await.unwrap();
        let features = pre.preprocess("*CC*").unwrap();

        let err = InferenceEngine::new()
            .predict(&features, &model, &empty)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CheckpointMissing);

        let embed_model = registry.get_embedding_model().await.unwrap();
        assert!(InferenceEngine::new()
            .predict(&features, &embed_model, &empty)
            .is_err());
    }
}
