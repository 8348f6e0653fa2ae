//! CSV input/output for batch runs.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;

use super::batch::{BatchReport, BatchRow, RowOutcome};
use super::types::round_for_wire;
use crate::error::{Error, Result};

pub const OUTPUT_COLUMNS: [&str; 9] = [
    "id",
    "smiles",
    "property",
    "prediction_value",
    "prediction_units",
    "ok",
    "error_code",
    "error_message",
    "request_id",
];

#[derive(Debug, Serialize)]
struct OutputRecord<'a> {
    id: &'a str,
    smiles: &'a str,
    property: &'a str,
    prediction_value: Option<f64>,
    prediction_units: &'a str,
    ok: bool,
    error_code: &'a str,
    error_message: &'a str,
    request_id: &'a str,
}

/// Read batch rows from a CSV with a `smiles` column and an optional `id`.
///
/// Rows with an empty structure keep their positional id so the failure can
/// be traced back to the input line.
pub fn read_batch_csv(path: &Path) -> Result<Vec<BatchRow>> {
    if !path.is_file() {
        return Err(Error::Validation(format!(
            "Input CSV does not exist: {}",
            path.display()
        )));
    }

    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(csv_error)?;
    let headers = reader.headers().map_err(csv_error)?.clone();
    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(Error::validation("Input CSV has no header row."));
    }
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let smiles_col = column("smiles").ok_or_else(|| {
        Error::Validation(format!(
            "Input CSV must include a 'smiles' column. Found: {}",
            json!(headers.iter().collect::<Vec<_>>())
        ))
    })?;
    let id_col = column("id");

    let mut rows = Vec::new();
    for (i, record) in reader.byte_records().enumerate() {
        let record = record.map_err(csv_error)?;
        let position = (i + 1).to_string();
        let smiles = decode_cell(record.get(smiles_col));
        let id = id_col.map(|c| decode_cell(record.get(c)));

        let row_id = if smiles.text.is_empty() {
            position.clone()
        } else {
            id.as_ref()
                .filter(|id| id.valid && !id.text.is_empty())
                .map(|id| id.text.clone())
                .unwrap_or_else(|| position.clone())
        };
        let mut row = BatchRow::new(Some(row_id), smiles.text);
        if !smiles.valid || id.as_ref().is_some_and(|id| !id.valid) {
            row = row.with_input_error(format!("Row {position} is not valid UTF-8."));
        }
        rows.push(row);
    }
    Ok(rows)
}

struct Cell {
    text: String,
    valid: bool,
}

/// Trimmed cell text; undecodable bytes are replaced and flagged.
fn decode_cell(bytes: Option<&[u8]>) -> Cell {
    let bytes = bytes.unwrap_or_default();
    match std::str::from_utf8(bytes) {
        Ok(text) => Cell {
            text: text.trim().to_string(),
            valid: true,
        },
        Err(_) => Cell {
            text: String::from_utf8_lossy(bytes).trim().to_string(),
            valid: false,
        },
    }
}

/// `<dir>/<stem>_predictions.csv` next to the input.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "batch".to_string());
    input.with_file_name(format!("{stem}_predictions.csv"))
}

/// Write one output line per batch row, in input order.
pub fn write_batch_csv(path: &Path, report: &BatchReport) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = ::csv::Writer::from_path(path).map_err(csv_error)?;
    if report.results.is_empty() {
        writer.write_record(OUTPUT_COLUMNS).map_err(csv_error)?;
    }
    for row in &report.results {
        let record = match &row.outcome {
            RowOutcome::Success(result) => OutputRecord {
                id: &row.row_id,
                smiles: &row.smiles,
                property: &row.property,
                prediction_value: Some(round_for_wire(result.value)),
                prediction_units: &result.units,
                ok: true,
                error_code: "",
                error_message: "",
                request_id: &row.request_id,
            },
            RowOutcome::Failure(detail) => OutputRecord {
                id: &row.row_id,
                smiles: &row.smiles,
                property: &row.property,
                prediction_value: None,
                prediction_units: "",
                ok: false,
                error_code: detail.code.as_str(),
                error_message: &detail.message,
                request_id: &row.request_id,
            },
        };
        writer.serialize(record).map_err(csv_error)?;
    }
    writer.flush()?;
    Ok(path.to_path_buf())
}

fn csv_error(err: ::csv::Error) -> Error {
    match err.into_kind() {
        ::csv::ErrorKind::Io(io) => Error::Io(io),
        other => Error::Validation(format!("Malformed CSV: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, ErrorDetail};
    use crate::runtime::batch::{BatchOutcome, BatchRowResult};
    use crate::runtime::types::PredictionResult;
    use tempfile::TempDir;

    #[test]
    fn test_read_ids_fall_back_to_row_number() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("input.csv");
        std::fs::write(&input, "id,smiles\nabc,*CC*\n,*CC(*)C\n7,\n").unwrap();

        let rows = read_batch_csv(&input).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].row_id.as_deref(), Some("abc"));
        assert_eq!(rows[1].row_id.as_deref(), Some("2"));
        assert_eq!(rows[1].smiles, "*CC(*)C");
        assert_eq!(rows[2].row_id.as_deref(), Some("3"));
        assert!(rows[2].smiles.is_empty());
    }

    #[test]
    fn test_undecodable_record_becomes_row_error() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("input.csv");
        let mut bytes = b"id,smiles\na,*CC*\nb,*C".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(b"C*\n\xc3,*OCCO*\nd,*CC(C)*\n");
        std::fs::write(&input, bytes).unwrap();

        let rows = read_batch_csv(&input).unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows[0].input_error.is_none());
        assert_eq!(rows[1].row_id.as_deref(), Some("b"));
        assert!(rows[1].input_error.as_deref().unwrap().contains("Row 2"));
        assert_eq!(rows[2].row_id.as_deref(), Some("3"));
        assert_eq!(rows[2].smiles, "*OCCO*");
        assert!(rows[2].input_error.is_some());
        assert_eq!(rows[3].row_id.as_deref(), Some("d"));
        assert!(rows[3].input_error.is_none());
    }

    #[test]
    fn test_read_requires_smiles_column() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("bad.csv");
        std::fs::write(&input, "id,value\n1,foo\n").unwrap();

        let err = read_batch_csv(&input).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert!(err.to_string().contains("'smiles' column"));
    }

    #[test]
    fn test_read_missing_file_is_validation_error() {
        let tmp = TempDir::new().unwrap();
        let err = read_batch_csv(&tmp.path().join("nope.csv")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("/data/polymers.csv")),
            PathBuf::from("/data/polymers_predictions.csv")
        );
    }

    #[test]
    fn test_write_success_and_failure_rows() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("nested/out.csv");
        let report = BatchReport {
            outcome: BatchOutcome::Partial,
            fatal: None,
            results: vec![
                BatchRowResult {
                    row_id: "1".into(),
                    smiles: "*CC*".into(),
                    property: "eps".into(),
                    request_id: "req-1".into(),
                    outcome: RowOutcome::Success(PredictionResult {
                        smiles: "*CC*".into(),
                        property: "eps".into(),
                        value: 2.123456789,
                        units: "".into(),
                        embedding: None,
                        checkpoint: "/c/eps.safetensors".into(),
                        request_id: "req-1".into(),
                    }),
                },
                BatchRowResult {
                    row_id: "2".into(),
                    smiles: "not-a-structure".into(),
                    property: "eps".into(),
                    request_id: "req-2".into(),
                    outcome: RowOutcome::Failure(ErrorDetail {
                        code: ErrorCode::ValidationError,
                        message: "SMILES must include polymer connection points using '*'."
                            .into(),
                        details: None,
                    }),
                },
            ],
        };

        write_batch_csv(&output, &report).unwrap();
        let text = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], OUTPUT_COLUMNS.join(","));
        assert_eq!(lines[1], "1,*CC*,eps,2.123457,,true,,,req-1");
        assert!(lines[2].starts_with("2,not-a-structure,eps,,,false,validation_error,"));
        assert!(lines[2].ends_with(",req-2"));
    }
}
