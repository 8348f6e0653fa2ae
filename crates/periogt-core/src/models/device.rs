//! Device selection with accelerator compatibility gates.
//!
//! GPU facts come from a [`GpuProbe`] so that selection can be exercised
//! without hardware. Selection never logs; fallbacks are returned as warnings
//! for the caller to surface.

use std::process::Command;

use candle_core::{DType, Device};
use serde::Serialize;

use crate::error::{Error, Result};

/// Minimum supported compute capability (Volta).
pub const MIN_COMPUTE_CAPABILITY: (u32, u32) = (7, 0);

/// Minimum NVIDIA driver for the CUDA 12.6 toolkit.
pub const MIN_DRIVER_VERSION: &str = "560.28";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cuda,
    Cpu,
}

impl DeviceKind {
    pub fn is_cpu(&self) -> bool {
        matches!(self, DeviceKind::Cpu)
    }

    pub fn is_cuda(&self) -> bool {
        matches!(self, DeviceKind::Cuda)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Cuda => "cuda",
            DeviceKind::Cpu => "cpu",
        }
    }
}

/// Requested device mode (`PERIOGT_DEVICE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRequest {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl DeviceRequest {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(DeviceRequest::Auto),
            "cpu" => Ok(DeviceRequest::Cpu),
            "cuda" | "gpu" => Ok(DeviceRequest::Cuda),
            other => Err(Error::Config(format!(
                "PERIOGT_DEVICE must be one of: auto, cpu, cuda (got '{other}')"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRequest::Auto => "auto",
            DeviceRequest::Cpu => "cpu",
            DeviceRequest::Cuda => "cuda",
        }
    }
}

/// Accelerator facts as reported by the driver and the tensor runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GpuDetails {
    /// The tensor runtime can open device 0.
    pub runtime_visible: bool,
    /// GPU model name from the driver, if any GPU was reported.
    pub name: Option<String>,
    /// Compute capability as (major, minor).
    pub compute_capability: Option<(u32, u32)>,
    /// Driver version string (e.g. "560.35.03").
    pub driver_version: Option<String>,
}

impl GpuDetails {
    pub fn compute_capability_string(&self) -> Option<String> {
        self.compute_capability
            .map(|(major, minor)| format!("{major}.{minor}"))
    }

    pub fn meets_compute_requirement(&self) -> bool {
        self.compute_capability
            .map(|cap| cap >= MIN_COMPUTE_CAPABILITY)
            .unwrap_or(true)
    }

    pub fn meets_driver_requirement(&self) -> bool {
        match self.driver_version.as_deref() {
            Some(raw) => {
                let detected = parse_version(raw);
                detected.is_empty() || !version_lt(&detected, &parse_version(MIN_DRIVER_VERSION))
            }
            None => true,
        }
    }

    /// Driver reports a GPU but the runtime cannot open it.
    pub fn binding_anomalous(&self) -> bool {
        self.driver_version.is_some() && !self.runtime_visible
    }

    fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "unknown GPU".to_string())
    }
}

/// Source of accelerator facts.
pub trait GpuProbe: Send + Sync {
    fn probe(&self) -> GpuDetails;
}

/// Queries `nvidia-smi` and the candle CUDA backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemGpuProbe;

impl GpuProbe for SystemGpuProbe {
    fn probe(&self) -> GpuDetails {
        let mut details = query_nvidia_smi().unwrap_or_default();
        details.runtime_visible = cuda_runtime_visible();
        details
    }
}

/// Fixed answer, for tests and for callers that already probed.
#[derive(Debug, Clone, Default)]
pub struct StaticGpuProbe(pub GpuDetails);

impl GpuProbe for StaticGpuProbe {
    fn probe(&self) -> GpuDetails {
        self.0.clone()
    }
}

fn cuda_runtime_visible() -> bool {
    std::panic::catch_unwind(|| Device::new_cuda(0))
        .ok()
        .and_then(|r| r.ok())
        .map(|d| d.is_cuda())
        .unwrap_or(false)
}

fn query_nvidia_smi() -> Option<GpuDetails> {
    let output = Command::new("nvidia-smi")
        .arg("--query-gpu=name,compute_cap,driver_version")
        .arg("--format=csv,noheader")
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_nvidia_smi_line(stdout.lines().next()?)
}

fn parse_nvidia_smi_line(line: &str) -> Option<GpuDetails> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 3 || fields[0].is_empty() {
        return None;
    }
    let compute_capability = fields[1].split_once('.').and_then(|(major, minor)| {
        Some((major.trim().parse().ok()?, minor.trim().parse().ok()?))
    });
    Some(GpuDetails {
        runtime_visible: false,
        name: Some(fields[0].to_string()),
        compute_capability,
        driver_version: Some(fields[2].to_string()).filter(|v| !v.is_empty()),
    })
}

/// Leading numeric components of a dotted version ("560.35.03" -> [560, 35, 3]).
pub(crate) fn parse_version(raw: &str) -> Vec<u32> {
    let mut parts = Vec::new();
    for token in raw.trim().split('.') {
        let digits: String = token.chars().filter(|c| c.is_ascii_digit()).collect();
        match digits.parse() {
            Ok(value) => parts.push(value),
            Err(_) => break,
        }
    }
    parts
}

pub(crate) fn version_lt(left: &[u32], right: &[u32]) -> bool {
    let len = left.len().max(right.len());
    let pad = |v: &[u32]| {
        let mut out = v.to_vec();
        out.resize(len, 0);
        out
    };
    pad(left) < pad(right)
}

#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub device: Device,
    pub kind: DeviceKind,
    pub gpu: Option<GpuDetails>,
}

impl DeviceProfile {
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            kind: DeviceKind::Cpu,
            gpu: None,
        }
    }

    /// Regression heads are sensitive to reduced precision; every device runs F32.
    pub fn dtype(&self) -> DType {
        DType::F32
    }
}

/// A resolved device plus any non-fatal fallbacks taken on the way.
#[derive(Debug, Clone)]
pub struct DeviceResolution {
    pub profile: DeviceProfile,
    pub details: GpuDetails,
    pub warnings: Vec<String>,
}

pub struct DeviceSelector;

impl DeviceSelector {
    /// Resolve the requested mode against the probed hardware.
    ///
    /// Explicit `cuda` fails hard on every incompatibility; `auto` falls back
    /// to CPU with a warning.
    pub fn resolve(request: DeviceRequest, probe: &dyn GpuProbe) -> Result<DeviceResolution> {
        let details = probe.probe();
        let mut warnings = Vec::new();

        let profile = match request {
            DeviceRequest::Cpu => DeviceProfile::cpu(),
            DeviceRequest::Cuda => {
                Self::check_cuda(&details)?;
                Self::open_cuda(&details)?
            }
            DeviceRequest::Auto => match Self::check_cuda(&details) {
                Ok(()) => match Self::open_cuda(&details) {
                    Ok(profile) => profile,
                    Err(err) => {
                        warnings.push(format!("{err}; falling back to CPU inference."));
                        DeviceProfile::cpu()
                    }
                },
                Err(Error::CudaUnavailable(_)) => {
                    warnings.push("CUDA unavailable; falling back to CPU inference.".to_string());
                    DeviceProfile::cpu()
                }
                Err(err) => {
                    warnings.push(format!("{err}; falling back to CPU inference."));
                    DeviceProfile::cpu()
                }
            },
        };

        Ok(DeviceResolution {
            profile,
            details,
            warnings,
        })
    }

    fn check_cuda(details: &GpuDetails) -> Result<()> {
        if !details.runtime_visible {
            return Err(Error::CudaUnavailable(
                "PERIOGT_DEVICE=cuda requested but CUDA is unavailable. \
                 Set PERIOGT_DEVICE=cpu or ensure --nv GPU passthrough is enabled."
                    .to_string(),
            ));
        }
        if !details.meets_compute_requirement() {
            return Err(Error::GpuUnsupported {
                device: details.display_name(),
                detected: details.compute_capability_string().unwrap_or_default(),
                minimum: format!("{}.{}", MIN_COMPUTE_CAPABILITY.0, MIN_COMPUTE_CAPABILITY.1),
            });
        }
        if !details.meets_driver_requirement() {
            return Err(Error::DriverIncompatible {
                detected: details.driver_version.clone().unwrap_or_default(),
                minimum: MIN_DRIVER_VERSION.to_string(),
            });
        }
        Ok(())
    }

    fn open_cuda(details: &GpuDetails) -> Result<DeviceProfile> {
        let device = Device::new_cuda(0)
            .map_err(|e| Error::CudaUnavailable(format!("Failed to open CUDA device 0: {e}")))?;
        Ok(DeviceProfile {
            device,
            kind: DeviceKind::Cuda,
            gpu: Some(details.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpu(visible: bool, cap: (u32, u32), driver: &str) -> StaticGpuProbe {
        StaticGpuProbe(GpuDetails {
            runtime_visible: visible,
            name: Some("Tesla P100".to_string()),
            compute_capability: Some(cap),
            driver_version: Some(driver.to_string()),
        })
    }

    #[test]
    fn test_parse_device_request() {
        assert_eq!(DeviceRequest::parse("").unwrap(), DeviceRequest::Auto);
        assert_eq!(DeviceRequest::parse(" CUDA ").unwrap(), DeviceRequest::Cuda);
        assert_eq!(DeviceRequest::parse("cpu").unwrap(), DeviceRequest::Cpu);
        let err = DeviceRequest::parse("tpu").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);
    }

    #[test]
    fn test_explicit_cpu_ignores_accelerator_state() {
        for probe in [gpu(true, (6, 0), "550.10"), gpu(false, (0, 0), "")] {
            let res = DeviceSelector::resolve(DeviceRequest::Cpu, &probe).unwrap();
            assert_eq!(res.profile.kind, DeviceKind::Cpu);
            assert!(res.warnings.is_empty());
        }
    }

    #[test]
    fn test_explicit_cuda_without_gpu_fails() {
        let probe = StaticGpuProbe(GpuDetails::default());
        let err = DeviceSelector::resolve(DeviceRequest::Cuda, &probe).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::CudaUnavailable);
        assert!(err.to_string().contains("PERIOGT_DEVICE=cpu"));
    }

    #[test]
    fn test_explicit_cuda_on_legacy_gpu_names_device_and_floor() {
        let err = DeviceSelector::resolve(DeviceRequest::Cuda, &gpu(true, (6, 0), "560.35"))
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::GpuUnsupported);
        let message = err.to_string();
        assert!(message.contains("Tesla P100"));
        assert!(message.contains("6.0"));
        assert!(message.contains("7.0"));
    }

    #[test]
    fn test_explicit_cuda_with_old_driver_fails() {
        let err = DeviceSelector::resolve(DeviceRequest::Cuda, &gpu(true, (8, 0), "550.10"))
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::DriverIncompatible);
    }

    #[test]
    fn test_auto_falls_back_with_warning() {
        let res = DeviceSelector::resolve(DeviceRequest::Auto, &gpu(true, (6, 0), "560.35")).unwrap();
        assert_eq!(res.profile.kind, DeviceKind::Cpu);
        assert_eq!(res.warnings.len(), 1);
        assert!(res.warnings[0].contains("falling back to CPU"));

        let res = DeviceSelector::resolve(DeviceRequest::Auto, &StaticGpuProbe::default()).unwrap();
        assert_eq!(res.profile.kind, DeviceKind::Cpu);
        assert!(res.warnings[0].contains("CUDA unavailable"));
    }

    #[test]
    fn test_version_comparison() {
        assert_eq!(parse_version("560.35.03"), vec![560, 35, 3]);
        assert!(version_lt(&parse_version("550.10"), &parse_version("560.28")));
        assert!(!version_lt(&parse_version("560.28"), &parse_version("560.28.0")));
        assert!(!version_lt(&parse_version("570"), &parse_version("560.28")));
    }

    #[test]
    fn test_parse_nvidia_smi_line() {
        let details = parse_nvidia_smi_line("NVIDIA A100-SXM4-80GB, 8.0, 560.35.03").unwrap();
        assert_eq!(details.name.as_deref(), Some("NVIDIA A100-SXM4-80GB"));
        assert_eq!(details.compute_capability, Some((8, 0)));
        assert_eq!(details.driver_version.as_deref(), Some("560.35.03"));
        assert!(parse_nvidia_smi_line("").is_none());
    }

    #[test]
    fn test_anomalous_binding() {
        let details = GpuDetails {
            runtime_visible: false,
            name: Some("A100".into()),
            compute_capability: Some((8, 0)),
            driver_version: Some("560.35".into()),
        };
        assert!(details.binding_anomalous());
    }
}
