//! Deterministic on-disk fixtures: a complete checkpoint tree with tiny
//! weights so load and inference paths run on CPU without network access.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use tempfile::TempDir;

use crate::chem::DESCRIPTOR_DIM;
use crate::config::{ConfigInputs, MODEL_CONFIG_FILE};
use crate::model::{ArtifactLayout, ArtifactManager, DescriptorScaler, LabelStat};
use crate::models::config::ModelConfig;

pub fn tiny_config() -> ModelConfig {
    ModelConfig {
        hidden_size: 8,
        num_layers: 2,
        head_hidden_size: 4,
        ..ModelConfig::default()
    }
}

fn det_tensor(shape: &[usize], seed: u64) -> Tensor {
    let len: usize = shape.iter().product();
    let data: Vec<f32> = (0..len)
        .map(|i| {
            let x = (i as u64).wrapping_mul(2654435761).wrapping_add(seed * 97) % 1000;
            (x as f32 / 1000.0 - 0.5) * 0.2
        })
        .collect();
    Tensor::from_vec(data, shape, &Device::Cpu).expect("fixture tensor")
}

fn linear(tensors: &mut HashMap<String, Tensor>, prefix: &str, input: usize, output: usize, seed: u64) {
    tensors.insert(format!("{prefix}.weight"), det_tensor(&[output, input], seed));
    tensors.insert(format!("{prefix}.bias"), det_tensor(&[output], seed + 1));
}

pub fn write_backbone(path: &Path, cfg: &ModelConfig) {
    let h = cfg.hidden_size;
    let mut t = HashMap::new();
    linear(&mut t, "node_proj", cfg.atom_feature_dim, h, 1);
    linear(&mut t, "edge_proj", cfg.bond_feature_dim, h, 3);
    linear(&mut t, "fp_proj", cfg.fingerprint_dim, h, 5);
    linear(&mut t, "md_proj", cfg.descriptor_dim, h, 7);
    for i in 0..cfg.num_layers {
        let seed = 11 + i as u64 * 10;
        linear(&mut t, &format!("layers.{i}.message"), h, h, seed);
        linear(&mut t, &format!("layers.{i}.update"), 2 * h, h, seed + 2);
        t.insert(
            format!("layers.{i}.norm.weight"),
            Tensor::ones(h, candle_core::DType::F32, &Device::Cpu).expect("ones"),
        );
        t.insert(format!("layers.{i}.norm.bias"), det_tensor(&[h], seed + 4));
    }
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    candle_core::safetensors::save(&t, path).expect("save backbone");
}

pub fn write_head(path: &Path, cfg: &ModelConfig, seed: u64) {
    let mut t = HashMap::new();
    linear(&mut t, "head.hidden", cfg.embedding_dim(), cfg.head_hidden_size, seed);
    linear(&mut t, "head.out", cfg.head_hidden_size, 1, seed + 2);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    candle_core::safetensors::save(&t, path).expect("save head");
}

/// A temporary base directory with checkpoints, source and results dirs.
pub struct ArtifactFixture {
    pub dir: TempDir,
    pub config: ModelConfig,
    pub properties: Vec<String>,
}

impl ArtifactFixture {
    pub fn new(properties: &[&str]) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let config = tiny_config();
        let fixture = Self {
            dir,
            config,
            properties: properties.iter().map(|p| p.to_string()).collect(),
        };

        std::fs::create_dir_all(fixture.src_dir()).expect("src dir");
        std::fs::write(
            fixture.src_dir().join(MODEL_CONFIG_FILE),
            serde_json::to_string_pretty(&fixture.config).expect("config json"),
        )
        .expect("write config");

        let layout = fixture.layout();
        write_backbone(&layout.pretrained_dir().join("backbone.safetensors"), &fixture.config);

        let mut stats = BTreeMap::new();
        for (i, prop) in properties.iter().enumerate() {
            write_head(
                &layout.finetuned_dir().join(prop).join("best_model.safetensors"),
                &fixture.config,
                100 + i as u64 * 10,
            );
            stats.insert(
                prop.to_string(),
                LabelStat {
                    mean: 100.0 + i as f64,
                    std: 10.0,
                },
            );
        }
        std::fs::write(
            layout.label_stats(),
            serde_json::to_string_pretty(&stats).expect("stats json"),
        )
        .expect("write stats");
        std::fs::write(
            layout.scaler(),
            serde_json::to_string(&DescriptorScaler::identity(DESCRIPTOR_DIM)).expect("scaler json"),
        )
        .expect("write scaler");

        if !properties.is_empty() {
            ArtifactManager::new(layout.root())
                .build_index()
                .expect("build index");
        }
        fixture
    }

    pub fn base_dir(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.dir.path().join("checkpoints")
    }

    pub fn src_dir(&self) -> PathBuf {
        self.dir.path().join("src")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.dir.path().join("results")
    }

    pub fn layout(&self) -> ArtifactLayout {
        ArtifactLayout::new(self.checkpoint_dir())
    }

    pub fn config_inputs(&self) -> ConfigInputs {
        ConfigInputs {
            base_dir: Some(self.base_dir()),
            checkpoint_dir: Some(self.checkpoint_dir()),
            results_dir: Some(self.results_dir()),
            src_dir: Some(self.src_dir()),
            device: Some("cpu".to_string()),
        }
    }
}
