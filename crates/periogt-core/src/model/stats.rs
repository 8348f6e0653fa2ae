//! Label statistics and the fitted descriptor scaler.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Normalization constants for one property.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelStat {
    pub mean: f64,
    pub std: f64,
}

impl LabelStat {
    pub fn denormalize(&self, raw: f64) -> f64 {
        raw * self.std + self.mean
    }
}

/// Per-property label statistics loaded from `label_stats.json`.
#[derive(Debug, Clone)]
pub struct LabelStats {
    path: PathBuf,
    entries: BTreeMap<String, LabelStat>,
}

impl LabelStats {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::CheckpointMissing {
                    what: "label statistics file".to_string(),
                    path: path.to_path_buf(),
                }
            } else {
                Error::Io(e)
            }
        })?;
        let entries: BTreeMap<String, LabelStat> = serde_json::from_str(&content)
            .map_err(|e| Error::invalid_artifact(path, format!("malformed label stats: {e}")))?;

        for (property, stat) in &entries {
            if !stat.mean.is_finite() {
                return Err(Error::invalid_artifact(
                    path,
                    format!("non-finite mean for '{property}'"),
                ));
            }
            if !stat.std.is_finite() || stat.std <= 0.0 {
                return Err(Error::invalid_artifact(
                    path,
                    format!("std for '{property}' must be finite and positive, got {}", stat.std),
                ));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn from_entries(path: impl Into<PathBuf>, entries: BTreeMap<String, LabelStat>) -> Self {
        Self {
            path: path.into(),
            entries,
        }
    }

    /// Stats for `property`; absence is a configuration error naming the file.
    pub fn get(&self, property: &str) -> Result<LabelStat> {
        self.entries
            .get(property)
            .copied()
            .ok_or_else(|| Error::CheckpointMissing {
                what: format!("label statistics for property '{property}'"),
                path: self.path.clone(),
            })
    }

    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Standard scaler fitted on training descriptors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorScaler {
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
}

impl DescriptorScaler {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::CheckpointMissing {
                    what: "descriptor scaler file".to_string(),
                    path: path.to_path_buf(),
                }
            } else {
                Error::Io(e)
            }
        })?;
        let scaler: Self = serde_json::from_str(&content)
            .map_err(|e| Error::invalid_artifact(path, format!("malformed scaler: {e}")))?;
        if scaler.mean.len() != scaler.scale.len() {
            return Err(Error::invalid_artifact(
                path,
                format!(
                    "mean has {} entries but scale has {}",
                    scaler.mean.len(),
                    scaler.scale.len()
                ),
            ));
        }
        Ok(scaler)
    }

    /// No-op scaler of the given width.
    pub fn identity(dim: usize) -> Self {
        Self {
            mean: vec![0.0; dim],
            scale: vec![1.0; dim],
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, values: &[f32]) -> Result<Vec<f32>> {
        if values.len() != self.dim() {
            return Err(Error::Inference(format!(
                "descriptor scaler expects {} features, got {}",
                self.dim(),
                values.len()
            )));
        }
        Ok(values
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| {
                let s = if *s == 0.0 { 1.0 } else { *s };
                (v - m) / s
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use tempfile::TempDir;

    #[test]
    fn test_label_stats_denormalize() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("label_stats.json");
        std::fs::write(&path, r#"{"tg": {"mean": 300.0, "std": 50.0}}"#).unwrap();

        let stats = LabelStats::load(&path).unwrap();
        let tg = stats.get("tg").unwrap();
        assert_eq!(tg.denormalize(0.5), 325.0);

        let err = stats.get("eps").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CheckpointMissing);
        assert!(err.to_string().contains("label_stats.json"));
    }

    #[test]
    fn test_label_stats_rejects_bad_std() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("label_stats.json");
        std::fs::write(&path, r#"{"tg": {"mean": 1.0, "std": 0.0}}"#).unwrap();
        assert_eq!(
            LabelStats::load(&path).unwrap_err().code(),
            ErrorCode::CheckpointMissing
        );
    }

    #[test]
    fn test_scaler_zero_scale_is_unit() {
        let scaler = DescriptorScaler {
            mean: vec![1.0, 2.0],
            scale: vec![2.0, 0.0],
        };
        assert_eq!(scaler.transform(&[3.0, 5.0]).unwrap(), vec![1.0, 3.0]);
        assert!(scaler.transform(&[1.0]).is_err());
    }

    #[test]
    fn test_scaler_length_mismatch_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("descriptor_scaler.json");
        std::fs::write(&path, r#"{"mean": [0.0, 1.0], "scale": [1.0]}"#).unwrap();
        assert!(matches!(
            DescriptorScaler::load(&path),
            Err(Error::InvalidArtifact { .. })
        ));
    }
}
