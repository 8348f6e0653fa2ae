//! Environment diagnostics behind `periogt doctor`.
//!
//! Every check runs even when an earlier one fails, so operators see the full
//! picture in a single report.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{ConfigInputs, ResolvedPaths};
use crate::model::{dir_size, ArtifactIndex, ArtifactLayout};
use crate::models::config::ModelConfig;
use crate::models::device::{DeviceRequest, DeviceSelector, GpuProbe, MIN_DRIVER_VERSION};

const BYTES_PER_PARAMETER: u64 = 4;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
}

impl Verdict {
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Pass => 0,
            Verdict::Warn => 1,
            Verdict::Fail => 2,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Pass => "PASS",
            Verdict::Warn => "WARN",
            Verdict::Fail => "FAIL",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: Verdict,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub verdict: Verdict,
    pub checks: Vec<CheckResult>,
    pub info: BTreeMap<String, Value>,
    pub warnings: Vec<String>,
    pub fatals: Vec<String>,
}

impl DiagnosticReport {
    pub fn exit_code(&self) -> i32 {
        self.verdict.exit_code()
    }

    fn record(&mut self, name: &str, status: Verdict, message: impl Into<String>) {
        let message = message.into();
        match status {
            Verdict::Warn => self.warnings.push(message.clone()),
            Verdict::Fail => self.fatals.push(message.clone()),
            Verdict::Pass => {}
        }
        self.checks.push(CheckResult {
            name: name.to_string(),
            status,
            message,
        });
    }

    fn info(&mut self, key: &str, value: Value) {
        self.info.insert(key.to_string(), value);
    }
}

/// Inspect hardware, paths and artifacts without loading any weights.
pub fn check_environment(inputs: &ConfigInputs, probe: &dyn GpuProbe) -> DiagnosticReport {
    let mut report = DiagnosticReport {
        verdict: Verdict::Pass,
        checks: Vec::new(),
        info: BTreeMap::new(),
        warnings: Vec::new(),
        fatals: Vec::new(),
    };
    let paths = ResolvedPaths::from_inputs(inputs);

    check_device(&mut report, inputs, probe);
    check_directories(&mut report, &paths);
    let index = check_artifacts(&mut report, &paths);
    estimate_memory(&mut report, &paths, index.as_ref());

    report.verdict = report
        .checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(Verdict::Pass);
    report
}

fn check_device(report: &mut DiagnosticReport, inputs: &ConfigInputs, probe: &dyn GpuProbe) {
    let raw = inputs.device.as_deref().unwrap_or("auto");
    let request = match DeviceRequest::parse(raw) {
        Ok(request) => request,
        Err(err) => {
            report.info("device", json!(raw));
            report.record("device", Verdict::Fail, err.to_string());
            return;
        }
    };

    match DeviceSelector::resolve(request, probe) {
        Ok(resolution) => {
            let gpu = &resolution.details;
            report.info("device_request", json!(request.as_str()));
            report.info("device", json!(resolution.profile.kind.as_str()));
            report.info("cuda_available", json!(gpu.runtime_visible));
            report.info("gpu_name", json!(gpu.name));
            report.info("compute_capability", json!(gpu.compute_capability_string()));
            report.info("driver_version", json!(gpu.driver_version));

            if resolution.warnings.is_empty() {
                report.record(
                    "device",
                    Verdict::Pass,
                    format!("Using {}", resolution.profile.kind.as_str()),
                );
            }
            for warning in resolution.warnings {
                report.record("device", Verdict::Warn, warning);
            }

            if gpu.binding_anomalous() {
                report.record(
                    "gpu_binding",
                    Verdict::Warn,
                    "Driver detected but the CUDA runtime cannot open a device; check container GPU passthrough (--nv) and the driver library bindings.",
                );
            } else if gpu.driver_version.is_some() && !gpu.meets_driver_requirement() {
                report.record(
                    "driver",
                    Verdict::Warn,
                    format!(
                        "Driver {} is below {MIN_DRIVER_VERSION}; GPU inference is unavailable.",
                        gpu.driver_version.as_deref().unwrap_or("unknown")
                    ),
                );
            }
        }
        Err(err) => {
            report.info("device_request", json!(request.as_str()));
            report.info("device", json!(request.as_str()));
            let gpu = probe.probe();
            report.info("cuda_available", json!(gpu.runtime_visible));
            report.info("gpu_name", json!(gpu.name));
            report.info("compute_capability", json!(gpu.compute_capability_string()));
            report.info("driver_version", json!(gpu.driver_version));
            report.record("device", Verdict::Fail, err.to_string());
        }
    }
}

fn check_directories(report: &mut DiagnosticReport, paths: &ResolvedPaths) {
    report.info("base_dir", json!(paths.base_dir.display().to_string()));
    report.info("checkpoint_dir", json!(paths.checkpoint_dir.display().to_string()));
    report.info("results_dir", json!(paths.results_dir.display().to_string()));
    report.info("src_dir", json!(paths.src_dir.display().to_string()));

    for (name, label, path) in [
        ("checkpoint_dir", "Checkpoint directory", &paths.checkpoint_dir),
        ("src_dir", "Source directory", &paths.src_dir),
    ] {
        if path.is_dir() {
            report.record(name, Verdict::Pass, format!("{label} found: {}", path.display()));
        } else {
            report.record(name, Verdict::Fail, format!("{label} missing: {}", path.display()));
        }
    }
}

fn check_artifacts(report: &mut DiagnosticReport, paths: &ResolvedPaths) -> Option<ArtifactIndex> {
    let layout = ArtifactLayout::new(&paths.checkpoint_dir);
    let missing: Vec<String> = layout
        .required()
        .into_iter()
        .filter(|(_, path)| !path.exists())
        .map(|(name, path)| format!("{name}={}", path.display()))
        .collect();
    if missing.is_empty() {
        report.record("artifacts", Verdict::Pass, "All required artifacts present");
    } else {
        report.record(
            "artifacts",
            Verdict::Fail,
            format!("Missing artifacts: {}", missing.join(", ")),
        );
    }

    if let Ok(size) = dir_size(&paths.checkpoint_dir) {
        report.info("checkpoint_size_bytes", json!(size));
        report.info(
            "checkpoint_size_gb",
            json!((size as f64 / GIB * 1000.0).round() / 1000.0),
        );
    }

    let index_path = layout.index();
    if !index_path.exists() {
        return None;
    }
    match ArtifactIndex::load(&index_path) {
        Ok(index) => {
            report.info("properties", json!(index.properties()));
            report.record(
                "index",
                Verdict::Pass,
                format!("Index lists {} properties", index.len()),
            );
            Some(index)
        }
        Err(err) => {
            report.record("index", Verdict::Fail, err.to_string());
            None
        }
    }
}

fn estimate_memory(report: &mut DiagnosticReport, paths: &ResolvedPaths, index: Option<&ArtifactIndex>) {
    let config = match ModelConfig::load(&paths.model_config_path()) {
        Ok(config) => config,
        Err(err) => {
            report.record("model_config", Verdict::Fail, err.to_string());
            return;
        }
    };
    let heads = index.map(|i| i.len()).unwrap_or(0) as u64;
    let parameters = config.backbone_parameters() as u64 + heads * config.head_parameters() as u64;
    let bytes = parameters * BYTES_PER_PARAMETER;
    report.info("estimated_model_parameters", json!(parameters));
    report.info("estimated_model_memory_bytes", json!(bytes));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::device::{GpuDetails, StaticGpuProbe};
    use crate::testing::ArtifactFixture;

    fn gpu(runtime_visible: bool, cap: (u32, u32), driver: &str) -> StaticGpuProbe {
        StaticGpuProbe(GpuDetails {
            runtime_visible,
            name: Some("Tesla T4".to_string()),
            compute_capability: Some(cap),
            driver_version: Some(driver.to_string()),
        })
    }

    #[test]
    fn test_complete_tree_on_cpu_passes() {
        let fixture = ArtifactFixture::new(&["tg"]);
        let report = check_environment(&fixture.config_inputs(), &StaticGpuProbe::default());

        assert_eq!(report.verdict, Verdict::Pass, "{:?}", report.checks);
        assert_eq!(report.exit_code(), 0);
        assert!(report.fatals.is_empty());
        assert_eq!(report.info["device"], "cpu");
        assert!(report.info["checkpoint_size_bytes"].as_u64().unwrap() > 0);
        assert!(report.info["estimated_model_memory_bytes"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_missing_artifact_fails() {
        let fixture = ArtifactFixture::new(&["tg"]);
        std::fs::remove_file(fixture.layout().label_stats()).unwrap();

        let report = check_environment(&fixture.config_inputs(), &StaticGpuProbe::default());
        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(report.exit_code(), 2);
        assert!(report.fatals.iter().any(|f| f.contains("label_stats_json=")));
    }

    #[test]
    fn test_auto_fallback_warns() {
        let fixture = ArtifactFixture::new(&["tg"]);
        let mut inputs = fixture.config_inputs();
        inputs.device = None;

        let report = check_environment(&inputs, &StaticGpuProbe::default());
        assert_eq!(report.verdict, Verdict::Warn);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.info["device"], "cpu");
    }

    #[test]
    fn test_anomalous_binding_warns() {
        let fixture = ArtifactFixture::new(&["tg"]);
        let report = check_environment(&fixture.config_inputs(), &gpu(false, (7, 5), "560.35.03"));
        assert_eq!(report.verdict, Verdict::Warn);
        assert!(report.warnings.iter().any(|w| w.contains("--nv")));
    }

    #[test]
    fn test_explicit_cuda_without_gpu_fails() {
        let fixture = ArtifactFixture::new(&["tg"]);
        let mut inputs = fixture.config_inputs();
        inputs.device = Some("cuda".to_string());

        let report = check_environment(&inputs, &StaticGpuProbe::default());
        assert_eq!(report.verdict, Verdict::Fail);
        assert!(report.checks.iter().any(|c| c.name == "device" && c.status == Verdict::Fail));
    }

    #[test]
    fn test_empty_base_dir_reports_every_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let inputs = ConfigInputs {
            base_dir: Some(tmp.path().to_path_buf()),
            device: Some("cpu".to_string()),
            ..ConfigInputs::default()
        };

        let report = check_environment(&inputs, &StaticGpuProbe::default());
        assert_eq!(report.verdict, Verdict::Fail);
        let failed: Vec<_> = report
            .checks
            .iter()
            .filter(|c| c.status == Verdict::Fail)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(failed, vec!["checkpoint_dir", "src_dir", "artifacts"]);
    }

    #[test]
    fn test_report_serializes_uppercase_verdict() {
        let fixture = ArtifactFixture::new(&["tg"]);
        let report = check_environment(&fixture.config_inputs(), &StaticGpuProbe::default());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["verdict"], "PASS");
        assert_eq!(json["checks"][0]["status"], "PASS");
    }
}
