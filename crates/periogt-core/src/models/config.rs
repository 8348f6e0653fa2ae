//! Network hyper-parameters read from `model_config.json`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chem::{ATOM_FEATURE_DIM, BOND_FEATURE_DIM, DESCRIPTOR_DIM, FINGERPRINT_BITS};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,
    #[serde(default = "default_atom_dim")]
    pub atom_feature_dim: usize,
    #[serde(default = "default_bond_dim")]
    pub bond_feature_dim: usize,
    #[serde(default = "default_fingerprint_dim")]
    pub fingerprint_dim: usize,
    #[serde(default = "default_descriptor_dim")]
    pub descriptor_dim: usize,
    #[serde(default = "default_head_hidden_size")]
    pub head_hidden_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

fn default_hidden_size() -> usize {
    256
}
fn default_num_layers() -> usize {
    6
}
fn default_atom_dim() -> usize {
    ATOM_FEATURE_DIM
}
fn default_bond_dim() -> usize {
    BOND_FEATURE_DIM
}
fn default_fingerprint_dim() -> usize {
    FINGERPRINT_BITS
}
fn default_descriptor_dim() -> usize {
    DESCRIPTOR_DIM
}
fn default_head_hidden_size() -> usize {
    256
}
fn default_layer_norm_eps() -> f64 {
    1e-5
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_size: default_hidden_size(),
            num_layers: default_num_layers(),
            atom_feature_dim: default_atom_dim(),
            bond_feature_dim: default_bond_dim(),
            fingerprint_dim: default_fingerprint_dim(),
            descriptor_dim: default_descriptor_dim(),
            head_hidden_size: default_head_hidden_size(),
            layer_norm_eps: default_layer_norm_eps(),
        }
    }
}

impl ModelConfig {
    /// Read the config; a missing file means defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("{:?} not found; using default model configuration", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::invalid_artifact(path, format!("malformed model config: {e}")))?;
        config.validate(path)?;
        Ok(config)
    }

    /// The featurizer fixes the input widths; weights trained on other widths cannot run.
    pub fn validate(&self, path: &Path) -> Result<()> {
        let checks = [
            ("atom_feature_dim", self.atom_feature_dim, ATOM_FEATURE_DIM),
            ("bond_feature_dim", self.bond_feature_dim, BOND_FEATURE_DIM),
            ("fingerprint_dim", self.fingerprint_dim, FINGERPRINT_BITS),
            ("descriptor_dim", self.descriptor_dim, DESCRIPTOR_DIM),
        ];
        for (name, got, expected) in checks {
            if got != expected {
                return Err(Error::invalid_artifact(
                    path,
                    format!("{name} is {got}, featurizer produces {expected}"),
                ));
            }
        }
        if self.hidden_size == 0 || self.head_hidden_size == 0 {
            return Err(Error::invalid_artifact(path, "hidden sizes must be non-zero"));
        }
        Ok(())
    }

    pub fn embedding_dim(&self) -> usize {
        3 * self.hidden_size
    }

    /// Approximate parameter count of the backbone.
    pub fn backbone_parameters(&self) -> usize {
        let h = self.hidden_size;
        let proj = |input: usize| input * h + h;
        let layer = (h * h + h) + (2 * h * h + h) + 2 * h;
        proj(self.atom_feature_dim)
            + proj(self.bond_feature_dim)
            + proj(self.fingerprint_dim)
            + proj(self.descriptor_dim)
            + self.num_layers * layer
    }

    pub fn head_parameters(&self) -> usize {
        self.embedding_dim() * self.head_hidden_size + self.head_hidden_size + self.head_hidden_size + 1
    }
}
