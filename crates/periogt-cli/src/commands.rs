//! Subcommand implementations. Each returns the process exit code.

use std::path::Path;

use periogt_core::runtime::{default_output_path, read_batch_csv, round_for_wire, write_batch_csv};
use periogt_core::{
    check_environment, ArtifactManager, BatchOrchestrator, BatchOutcome, ConfigInputs, Error,
    ErrorDetail, GpuProbe, PerioRuntime, PredictionRequest, PredictionResult, ResolveOptions,
    ResolvedPaths, Result, RuntimeConfig, SystemGpuProbe,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::PredictFormat;

pub fn emit_error(detail: &ErrorDetail) {
    match serde_json::to_string_pretty(&json!({ "error": detail })) {
        Ok(body) => eprintln!("{body}"),
        Err(_) => eprintln!("{}: {}", detail.code, detail.message),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolve and log configuration, then build the shared runtime.
fn load_runtime(inputs: &ConfigInputs, probe: &dyn GpuProbe) -> Result<PerioRuntime> {
    let config = RuntimeConfig::resolve(inputs, ResolveOptions::strict(), probe)?;
    for (key, value) in config.describe() {
        info!("{key}={value}");
    }
    for warning in &config.warnings {
        warn!("{warning}");
    }
    Ok(PerioRuntime::new(config))
}

pub async fn setup(inputs: &ConfigInputs, skip_download: bool) -> Result<i32> {
    let paths = ResolvedPaths::from_inputs(inputs);
    info!("Checkpoint directory: {:?}", paths.checkpoint_dir);

    let manager = ArtifactManager::new(paths.checkpoint_dir);
    let report = tokio::task::spawn_blocking(move || manager.fetch_and_prepare(skip_download))
        .await
        .map_err(|e| Error::Inference(format!("setup task failed: {e}")))??;

    print_json(&report)?;
    Ok(0)
}

pub fn doctor(inputs: &ConfigInputs) -> Result<i32> {
    let report = check_environment(inputs, &SystemGpuProbe);
    print_json(&report)?;
    Ok(report.exit_code())
}

pub async fn predict(
    inputs: &ConfigInputs,
    smiles: &str,
    property: &str,
    return_embedding: bool,
    format: PredictFormat,
) -> Result<i32> {
    let runtime = load_runtime(inputs, &SystemGpuProbe)?;
    let request = PredictionRequest::new(smiles, property).with_embedding(return_embedding);
    let request_id = Uuid::new_v4().to_string();
    let result = runtime.predict(&request, &request_id).await?;

    match format {
        PredictFormat::Json => print_json(&result.to_response())?,
        PredictFormat::Csv => write_prediction_csv(std::io::stdout().lock(), &result)?,
    }
    Ok(0)
}

const PREDICTION_CSV_HEADER: [&str; 5] = [
    "smiles",
    "property",
    "prediction_value",
    "prediction_units",
    "request_id",
];

/// One header row plus one quoted record for a single prediction.
fn write_prediction_csv<W: std::io::Write>(
    out: W,
    result: &PredictionResult,
) -> std::io::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(PREDICTION_CSV_HEADER)?;
    let value = round_for_wire(result.value).to_string();
    writer.write_record([
        result.smiles.as_str(),
        result.property.as_str(),
        value.as_str(),
        result.units.as_str(),
        result.request_id.as_str(),
    ])?;
    writer.flush()
}

pub async fn embed(inputs: &ConfigInputs, smiles: &str) -> Result<i32> {
    let runtime = load_runtime(inputs, &SystemGpuProbe)?;
    let result = runtime.embed(smiles, &Uuid::new_v4().to_string()).await?;
    print_json(&result)?;
    Ok(0)
}

pub async fn batch(
    inputs: &ConfigInputs,
    input: &Path,
    property: &str,
    output: Option<&Path>,
) -> Result<i32> {
    run_batch(inputs, &SystemGpuProbe, input, property, output).await
}

async fn run_batch(
    inputs: &ConfigInputs,
    probe: &dyn GpuProbe,
    input: &Path,
    property: &str,
    output: Option<&Path>,
) -> Result<i32> {
    let rows = read_batch_csv(input)?;
    let runtime = load_runtime(inputs, probe)?;
    info!("Running {} rows for '{}' from {:?}", rows.len(), property, input);

    let report = BatchOrchestrator::new(&runtime).run_batch(&rows, property).await;
    if report.outcome == BatchOutcome::Fatal {
        if let Some(detail) = &report.fatal {
            emit_error(detail);
        }
        return Ok(report.exit_code());
    }

    let out_path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_path(input));
    let written = write_batch_csv(&out_path, &report)?;
    println!("Wrote batch results: {}", written.display());

    let failed = report.failed();
    if failed > 0 {
        eprintln!("Completed with {failed} row-level failures.");
    }
    Ok(report.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use periogt_core::testing::ArtifactFixture;
    use periogt_core::StaticGpuProbe;

    #[test]
    fn test_prediction_csv_quotes_fields_and_has_header() {
        let result = PredictionResult {
            smiles: "*CC(C=O)*".to_string(),
            property: "tg".to_string(),
            value: 373.123456789,
            units: "g/cm^3, approx".to_string(),
            embedding: None,
            checkpoint: "/ckpt/tg.safetensors".to_string(),
            request_id: "req-1".to_string(),
        };
        let mut buf = Vec::new();
        write_prediction_csv(&mut buf, &result).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(header, PREDICTION_CSV_HEADER);
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0][0], "*CC(C=O)*");
        assert_eq!(&records[0][3], "g/cm^3, approx");
        assert_eq!(&records[0][4], "req-1");
        assert!(text.contains("\"g/cm^3, approx\""));
    }

    #[tokio::test]
    async fn test_batch_partial_failure_exits_one() {
        let fixture = ArtifactFixture::new(&["eps"]);
        let input = fixture.base_dir().join("polymers.csv");
        std::fs::write(&input, "id,smiles\nok,*CC*\nbad,not-a-structure\n").unwrap();

        let code = run_batch(
            &fixture.config_inputs(),
            &StaticGpuProbe::default(),
            &input,
            "eps",
            None,
        )
        .await
        .unwrap();
        assert_eq!(code, 1);

        let text = std::fs::read_to_string(fixture.base_dir().join("polymers_predictions.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("ok,*CC*,eps,"));
        assert!(lines[1].contains(",true,"));
        assert!(lines[2].contains(",false,validation_error,"));
    }

    #[tokio::test]
    async fn test_batch_unknown_property_is_fatal() {
        let fixture = ArtifactFixture::new(&["eps"]);
        let input = fixture.base_dir().join("polymers.csv");
        let output = fixture.base_dir().join("out.csv");
        std::fs::write(&input, "smiles\n*CC*\n").unwrap();

        let code = run_batch(
            &fixture.config_inputs(),
            &StaticGpuProbe::default(),
            &input,
            "nope",
            Some(&output),
        )
        .await
        .unwrap();
        assert_eq!(code, 2);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_batch_missing_input_is_validation_error() {
        let fixture = ArtifactFixture::new(&["eps"]);
        let err = run_batch(
            &fixture.config_inputs(),
            &StaticGpuProbe::default(),
            &fixture.base_dir().join("missing.csv"),
            "eps",
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), periogt_core::ErrorCode::ValidationError);
        assert_eq!(err.code().exit_code(), 2);
    }
}
