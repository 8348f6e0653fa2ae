//! Runtime configuration resolution.
//!
//! Inputs come from `PERIOGT_*` environment variables (or are supplied
//! directly). Resolution validates directories and the device request and
//! returns every resolved path for the caller to log; it does not log itself.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::device::{DeviceProfile, DeviceRequest, DeviceSelector, GpuDetails, GpuProbe};

pub const ENV_BASE_DIR: &str = "PERIOGT_BASE_DIR";
pub const ENV_CHECKPOINT_DIR: &str = "PERIOGT_CHECKPOINT_DIR";
pub const ENV_RESULTS_DIR: &str = "PERIOGT_RESULTS_DIR";
pub const ENV_SRC_DIR: &str = "PERIOGT_SRC_DIR";
pub const ENV_DEVICE: &str = "PERIOGT_DEVICE";
pub const ENV_ARCHIVE_BASE_URL: &str = "PERIOGT_ARCHIVE_BASE_URL";

/// File inside the source directory describing the network shape.
pub const MODEL_CONFIG_FILE: &str = "model_config.json";

/// Named configuration inputs before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigInputs {
    pub base_dir: Option<PathBuf>,
    pub checkpoint_dir: Option<PathBuf>,
    pub results_dir: Option<PathBuf>,
    pub src_dir: Option<PathBuf>,
    pub device: Option<String>,
}

impl ConfigInputs {
    pub fn from_env() -> Self {
        Self {
            base_dir: env_path(ENV_BASE_DIR),
            checkpoint_dir: env_path(ENV_CHECKPOINT_DIR),
            results_dir: env_path(ENV_RESULTS_DIR),
            src_dir: env_path(ENV_SRC_DIR),
            device: std::env::var(ENV_DEVICE).ok(),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Which directories must already exist.
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    pub require_checkpoint_dir: bool,
    pub require_source_dir: bool,
    pub create_results_dir: bool,
}

impl ResolveOptions {
    /// Inference paths: everything must be in place.
    pub fn strict() -> Self {
        Self {
            require_checkpoint_dir: true,
            require_source_dir: true,
            create_results_dir: true,
        }
    }

    /// Setup and diagnostics run before the tree exists.
    pub fn lenient() -> Self {
        Self {
            require_checkpoint_dir: false,
            require_source_dir: false,
            create_results_dir: false,
        }
    }
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self::strict()
    }
}

/// Absolute directory paths with defaults applied, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub base_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub results_dir: PathBuf,
    pub src_dir: PathBuf,
}

impl ResolvedPaths {
    pub fn from_inputs(inputs: &ConfigInputs) -> Self {
        let base_dir = absolutize(
            inputs
                .base_dir
                .clone()
                .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join("periogt")),
        );
        let checkpoint_dir = absolutize(
            inputs
                .checkpoint_dir
                .clone()
                .unwrap_or_else(|| base_dir.join("checkpoints")),
        );
        let results_dir = absolutize(
            inputs
                .results_dir
                .clone()
                .unwrap_or_else(|| base_dir.join("results")),
        );
        let src_dir = absolutize(inputs.src_dir.clone().unwrap_or_else(|| base_dir.join("src")));
        Self {
            base_dir,
            checkpoint_dir,
            results_dir,
            src_dir,
        }
    }

    pub fn model_config_path(&self) -> PathBuf {
        self.src_dir.join(MODEL_CONFIG_FILE)
    }
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub base_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub results_dir: PathBuf,
    pub src_dir: PathBuf,
    pub device_request: DeviceRequest,
    pub device: DeviceProfile,
    pub gpu: GpuDetails,
    /// Non-fatal observations (e.g. CPU fallback) for the caller to log.
    pub warnings: Vec<String>,
}

impl RuntimeConfig {
    pub fn resolve(inputs: &ConfigInputs, opts: ResolveOptions, probe: &dyn GpuProbe) -> Result<Self> {
        let request = DeviceRequest::parse(inputs.device.as_deref().unwrap_or("auto"))?;
        let resolution = DeviceSelector::resolve(request, probe)?;

        let ResolvedPaths {
            base_dir,
            checkpoint_dir,
            results_dir,
            src_dir,
        } = ResolvedPaths::from_inputs(inputs);

        if opts.require_checkpoint_dir {
            require_dir("checkpoint directory", ENV_CHECKPOINT_DIR, &checkpoint_dir)?;
        }
        if opts.require_source_dir {
            require_dir("model source directory", ENV_SRC_DIR, &src_dir)?;
        }
        if opts.create_results_dir {
            std::fs::create_dir_all(&results_dir)?;
        }

        Ok(Self {
            base_dir,
            checkpoint_dir,
            results_dir,
            src_dir,
            device_request: request,
            device: resolution.profile,
            gpu: resolution.details,
            warnings: resolution.warnings,
        })
    }

    /// Resolve from the process environment with the system GPU probe.
    pub fn from_env(opts: ResolveOptions) -> Result<Self> {
        Self::resolve(
            &ConfigInputs::from_env(),
            opts,
            &crate::models::device::SystemGpuProbe,
        )
    }

    pub fn model_config_path(&self) -> PathBuf {
        self.src_dir.join(MODEL_CONFIG_FILE)
    }

    /// Resolved values as `(name, value)` pairs for logging.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_BASE_DIR, self.base_dir.display().to_string()),
            (ENV_CHECKPOINT_DIR, self.checkpoint_dir.display().to_string()),
            (ENV_RESULTS_DIR, self.results_dir.display().to_string()),
            (ENV_SRC_DIR, self.src_dir.display().to_string()),
            (
                ENV_DEVICE,
                format!(
                    "{} -> {}",
                    self.device_request.as_str(),
                    self.device.kind.as_str()
                ),
            ),
        ]
    }
}

fn require_dir(what: &str, env_key: &str, path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    let what = if path.exists() {
        format!("{what} (set via {env_key}; path exists but is not a directory)")
    } else {
        format!("{what} (set via {env_key})")
    };
    Err(Error::CheckpointMissing {
        what,
        path: path.to_path_buf(),
    })
}

fn absolutize(path: PathBuf) -> PathBuf {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().map(|h| h.join(rest)).unwrap_or(path),
        Err(_) => path,
    };
    if let Ok(canonical) = expanded.canonicalize() {
        return canonical;
    }
    if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::models::device::{DeviceKind, StaticGpuProbe};
    use tempfile::TempDir;

    fn inputs(root: &Path) -> ConfigInputs {
        ConfigInputs {
            base_dir: Some(root.join("base")),
            checkpoint_dir: Some(root.join("base/checkpoints")),
            results_dir: Some(root.join("base/results")),
            src_dir: Some(root.join("src")),
            device: Some("cpu".to_string()),
        }
    }

    #[test]
    fn test_resolve_config_paths() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("base/checkpoints")).unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();

        let cfg = RuntimeConfig::resolve(
            &inputs(tmp.path()),
            ResolveOptions::strict(),
            &StaticGpuProbe::default(),
        )
        .unwrap();

        let root = tmp.path().canonicalize().unwrap();
        assert_eq!(cfg.checkpoint_dir, root.join("base/checkpoints"));
        assert_eq!(cfg.src_dir, root.join("src"));
        assert!(cfg.results_dir.is_dir());
        assert_eq!(cfg.device.kind, DeviceKind::Cpu);
        assert!(cfg.warnings.is_empty());
        assert_eq!(cfg.describe().len(), 5);
    }

    #[test]
    fn test_missing_checkpoint_dir_names_path() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();

        let err = RuntimeConfig::resolve(
            &inputs(tmp.path()),
            ResolveOptions::strict(),
            &StaticGpuProbe::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CheckpointMissing);
        assert!(err.to_string().contains("checkpoints"));
        assert!(err.to_string().contains(ENV_CHECKPOINT_DIR));
    }

    #[test]
    fn test_missing_source_dir_fails() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("base/checkpoints")).unwrap();

        let err = RuntimeConfig::resolve(
            &inputs(tmp.path()),
            ResolveOptions::strict(),
            &StaticGpuProbe::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CheckpointMissing);
        assert!(err.to_string().contains("source directory"));
    }

    #[test]
    fn test_lenient_allows_missing_dirs() {
        let tmp = TempDir::new().unwrap();
        let cfg = RuntimeConfig::resolve(
            &inputs(tmp.path()),
            ResolveOptions::lenient(),
            &StaticGpuProbe::default(),
        )
        .unwrap();
        assert!(!cfg.checkpoint_dir.exists());
        assert!(!cfg.results_dir.exists());
    }

    #[test]
    fn test_auto_device_warns_on_cpu_fallback() {
        let tmp = TempDir::new().unwrap();
        let mut inputs = inputs(tmp.path());
        inputs.device = None;
        let cfg = RuntimeConfig::resolve(&inputs, ResolveOptions::lenient(), &StaticGpuProbe::default())
            .unwrap();
        assert_eq!(cfg.device_request, DeviceRequest::Auto);
        assert_eq!(cfg.device.kind, DeviceKind::Cpu);
        assert_eq!(cfg.warnings.len(), 1);
    }

    #[test]
    fn test_invalid_device_value_is_validation_error() {
        let tmp = TempDir::new().unwrap();
        let mut inputs = inputs(tmp.path());
        inputs.device = Some("metal".to_string());
        let err = RuntimeConfig::resolve(&inputs, ResolveOptions::lenient(), &StaticGpuProbe::default())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }
}
