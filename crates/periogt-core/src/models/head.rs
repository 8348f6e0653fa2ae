//! Per-property regression head.

use std::path::Path;

use candle_core::{Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder};

use super::backbone::load_var_builder;
use super::config::ModelConfig;
use crate::error::{Error, Result};

/// Tensor prefix of head weights inside a finetuned checkpoint.
pub const HEAD_PREFIX: &str = "head";

pub struct PropertyHead {
    hidden: Linear,
    out: Linear,
}

impl PropertyHead {
    pub fn load(config: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            hidden: candle_nn::linear(
                config.embedding_dim(),
                config.head_hidden_size,
                vb.pp("hidden"),
            )?,
            out: candle_nn::linear(config.head_hidden_size, 1, vb.pp("out"))?,
        })
    }

    pub fn from_file(path: &Path, config: &ModelConfig, device: &Device) -> Result<Self> {
        let vb = load_var_builder(path, device)?;
        Self::load(config, vb.pp(HEAD_PREFIX)).map_err(|e| Error::model_load(path, e))
    }

    /// Normalized scalar output for one embedding of shape `[embedding_dim]`.
    pub fn forward(&self, embedding: &Tensor) -> candle_core::Result<f32> {
        let x = embedding.unsqueeze(0)?;
        let x = self.hidden.forward(&x)?.relu()?;
        let y = self.out.forward(&x)?;
        y.flatten_all()?.get(0)?.to_scalar::<f32>()
    }
}
