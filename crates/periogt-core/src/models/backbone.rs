//! Shared message-passing backbone.
//!
//! Node and edge features are projected to `hidden_size`, refined by
//! `num_layers` message-passing layers and mean-pooled. The fingerprint and
//! descriptor vectors get their own projections; the embedding is
//! `[fp ‖ descriptors ‖ readout]`.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{LayerNorm, Linear, VarBuilder};

use super::config::ModelConfig;
use crate::chem::GraphFeatures;
use crate::error::{Error, Result};

struct MessagePassingLayer {
    message: Linear,
    update: Linear,
    norm: LayerNorm,
}

impl MessagePassingLayer {
    fn load(cfg: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let h = cfg.hidden_size;
        Ok(Self {
            message: candle_nn::linear(h, h, vb.pp("message"))?,
            update: candle_nn::linear(2 * h, h, vb.pp("update"))?,
            norm: candle_nn::layer_norm(h, cfg.layer_norm_eps, vb.pp("norm"))?,
        })
    }

    fn forward(&self, h: &Tensor, edges: Option<&EdgeTensors>) -> candle_core::Result<Tensor> {
        let agg = match edges {
            Some(e) => {
                let h_src = h.index_select(&e.src, 0)?;
                let msg = self.message.forward(&(h_src + &e.features)?)?.relu()?;
                h.zeros_like()?.index_add(&e.dst, &msg, 0)?
            }
            None => h.zeros_like()?,
        };
        let upd = self
            .update
            .forward(&Tensor::cat(&[h, &agg], 1)?)?
            .relu()?;
        self.norm.forward(&(h + upd)?)
    }
}

struct EdgeTensors {
    src: Tensor,
    dst: Tensor,
    features: Tensor,
}

pub struct Backbone {
    config: ModelConfig,
    device: Device,
    node_proj: Linear,
    edge_proj: Linear,
    layers: Vec<MessagePassingLayer>,
    fp_proj: Linear,
    md_proj: Linear,
}

impl Backbone {
    pub fn load(config: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let h = config.hidden_size;
        let layers = (0..config.num_layers)
            .map(|i| MessagePassingLayer::load(config, vb.pp(format!("layers.{i}"))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            config: config.clone(),
            device: vb.device().clone(),
            node_proj: candle_nn::linear(config.atom_feature_dim, h, vb.pp("node_proj"))?,
            edge_proj: candle_nn::linear(config.bond_feature_dim, h, vb.pp("edge_proj"))?,
            layers,
            fp_proj: candle_nn::linear(config.fingerprint_dim, h, vb.pp("fp_proj"))?,
            md_proj: candle_nn::linear(config.descriptor_dim, h, vb.pp("md_proj"))?,
        })
    }

    /// Deserialize backbone weights from a safetensors file onto `device`.
    pub fn from_file(path: &Path, config: &ModelConfig, device: &Device) -> Result<Self> {
        let vb = load_var_builder(path, device)?;
        Self::load(config, vb).map_err(|e| Error::model_load(path, e))
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn embedding_dim(&self) -> usize {
        self.config.embedding_dim()
    }

    /// Embedding of one structure, shape `[3 * hidden_size]`.
    pub fn forward(&self, g: &GraphFeatures) -> candle_core::Result<Tensor> {
        let cfg = &self.config;
        let dev = &self.device;

        let x = Tensor::from_slice(&g.node_features, (g.num_nodes, cfg.atom_feature_dim), dev)?;
        let mut h = self.node_proj.forward(&x)?.relu()?;

        let edges = if g.num_edges() > 0 {
            let features = Tensor::from_slice(
                &g.edge_features,
                (g.num_edges(), cfg.bond_feature_dim),
                dev,
            )?;
            Some(EdgeTensors {
                src: Tensor::from_slice(&g.edge_src, g.num_edges(), dev)?,
                dst: Tensor::from_slice(&g.edge_dst, g.num_edges(), dev)?,
                features: self.edge_proj.forward(&features)?.relu()?,
            })
        } else {
            None
        };

        for layer in &self.layers {
            h = layer.forward(&h, edges.as_ref())?;
        }
        let readout = h.mean(0)?;

        let fp = Tensor::from_slice(&g.fingerprint, (1, cfg.fingerprint_dim), dev)?;
        let fp = self.fp_proj.forward(&fp)?.relu()?.squeeze(0)?;
        let md = Tensor::from_slice(&g.descriptors, (1, cfg.descriptor_dim), dev)?;
        let md = self.md_proj.forward(&md)?.relu()?.squeeze(0)?;

        Tensor::cat(&[&fp, &md, &readout], 0)
    }
}

/// Read a checkpoint into a `VarBuilder` whose tensors live on `device`.
pub(crate) fn load_var_builder(path: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let tensors = place_tensors(read_weights(path)?, device)?;
    Ok(VarBuilder::from_tensors(tensors, DType::F32, device))
}

/// Read every tensor of a `.safetensors` or PyTorch `.pth` checkpoint into
/// host memory. A missing file is `checkpoint_missing`; anything unreadable
/// is `model_load_failed`.
pub(crate) fn read_weights(path: &Path) -> Result<HashMap<String, Tensor>> {
    if !path.is_file() {
        return Err(Error::CheckpointMissing {
            what: "model weights".to_string(),
            path: path.to_path_buf(),
        });
    }
    let tensors = if crate::model::is_pickle_weights(path) {
        candle_core::pickle::read_all(path).map(|named| named.into_iter().collect())
    } else {
        candle_core::safetensors::load(path, &Device::Cpu)
    };
    tensors.map_err(|e| Error::model_load(path, e))
}

/// Move host tensors onto `device`. The checkpoint has already parsed, so a
/// failure here is a runtime fault rather than a bad artifact.
pub(crate) fn place_tensors(
    tensors: HashMap<String, Tensor>,
    device: &Device,
) -> Result<HashMap<String, Tensor>> {
    if device.is_cpu() {
        return Ok(tensors);
    }
    tensors
        .into_iter()
        .map(|(name, tensor)| match tensor.to_device(device) {
            Ok(placed) => Ok((name, placed)),
            Err(e) => Err(placement_error(&name, device, e)),
        })
        .collect()
}

fn placement_error(name: &str, device: &Device, err: candle_core::Error) -> Error {
    Error::Inference(format!(
        "failed to place tensor '{name}' on {device:?}: {err}"
    ))
}
