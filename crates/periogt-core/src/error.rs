//! Error taxonomy shared by the hosted API and the HPC command line.
//!
//! Every failure carries a stable [`ErrorCode`] so callers can branch on it
//! programmatically, plus a human-readable message.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Stable, wire-visible error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ValidationError,
    UnsupportedProperty,
    CheckpointMissing,
    ChecksumMismatch,
    ModelLoadFailed,
    CudaUnavailable,
    GpuUnsupported,
    DriverIncompatible,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::UnsupportedProperty => "unsupported_property",
            ErrorCode::CheckpointMissing => "checkpoint_missing",
            ErrorCode::ChecksumMismatch => "checksum_mismatch",
            ErrorCode::ModelLoadFailed => "model_load_failed",
            ErrorCode::CudaUnavailable => "cuda_unavailable",
            ErrorCode::GpuUnsupported => "gpu_unsupported",
            ErrorCode::DriverIncompatible => "driver_incompatible",
            ErrorCode::InternalError => "internal_error",
        }
    }

    /// HTTP status the hosted surface answers with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ValidationError | ErrorCode::UnsupportedProperty => 422,
            _ => 500,
        }
    }

    /// Process exit code for fatal single-item and setup failures.
    pub fn exit_code(&self) -> i32 {
        2
    }

    /// Configuration/setup failures that must stop a batch before any row runs.
    pub fn is_fatal_setup(&self) -> bool {
        matches!(
            self,
            ErrorCode::CheckpointMissing
                | ErrorCode::ChecksumMismatch
                | ErrorCode::CudaUnavailable
                | ErrorCode::GpuUnsupported
                | ErrorCode::DriverIncompatible
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One required artifact that was not found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingArtifact {
    pub name: String,
    pub path: PathBuf,
}

impl fmt::Display for MissingArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.path.display())
    }
}

/// Serializable error payload: `{code, message, details?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("Unsupported property '{property}'. Supported: {}", supported.join(", "))]
    UnsupportedProperty {
        property: String,
        supported: Vec<String>,
    },

    #[error("Required {what} does not exist: {}", path.display())]
    CheckpointMissing { what: String, path: PathBuf },

    #[error(
        "Missing artifacts: {}. Run `periogt setup` first.",
        missing.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(", ")
    )]
    MissingArtifacts { missing: Vec<MissingArtifact> },

    #[error("Invalid artifact {}: {reason}", path.display())]
    InvalidArtifact { path: PathBuf, reason: String },

    #[error(
        "Checksum mismatch for {name}: expected {expected}, got {actual}. File {} deleted.",
        path.display()
    )]
    ChecksumMismatch {
        name: String,
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Failed to load model weights from {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("{0}")]
    CudaUnavailable(String),

    #[error(
        "Detected GPU {device} has compute capability {detected}, below the supported minimum {minimum}"
    )]
    GpuUnsupported {
        device: String,
        detected: String,
        minimum: String,
    },

    #[error("NVIDIA driver {detected} is too old for CUDA 12.6 (minimum {minimum})")]
    DriverIncompatible { detected: String, minimum: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("{0}")]
    Busy(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn invalid_artifact(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidArtifact {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn model_load(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Error::ModelLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Validation(_) | Error::Config(_) => ErrorCode::ValidationError,
            Error::UnsupportedProperty { .. } => ErrorCode::UnsupportedProperty,
            Error::CheckpointMissing { .. }
            | Error::MissingArtifacts { .. }
            | Error::InvalidArtifact { .. } => ErrorCode::CheckpointMissing,
            Error::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            Error::ModelLoad { .. } => ErrorCode::ModelLoadFailed,
            Error::CudaUnavailable(_) => ErrorCode::CudaUnavailable,
            Error::GpuUnsupported { .. } => ErrorCode::GpuUnsupported,
            Error::DriverIncompatible { .. } => ErrorCode::DriverIncompatible,
            Error::Download(_)
            | Error::Busy(_)
            | Error::Inference(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Candle(_) => ErrorCode::InternalError,
        }
    }

    /// Network failures may be retried by the caller; nothing else helps on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Download(_) | Error::Busy(_))
    }

    /// Structured context for operators (paths, devices, digests).
    pub fn details(&self) -> Option<Value> {
        match self {
            Error::UnsupportedProperty { property, supported } => {
                Some(json!({ "property": property, "supported": supported }))
            }
            Error::CheckpointMissing { what, path } => {
                Some(json!({ "what": what, "path": path.display().to_string() }))
            }
            Error::MissingArtifacts { missing } => Some(Value::Object(
                missing
                    .iter()
                    .map(|m| (m.name.clone(), json!(m.path.display().to_string())))
                    .collect(),
            )),
            Error::InvalidArtifact { path, .. } | Error::ModelLoad { path, .. } => {
                Some(json!({ "path": path.display().to_string() }))
            }
            Error::ChecksumMismatch {
                name,
                path,
                expected,
                actual,
            } => Some(json!({
                "archive": name,
                "path": path.display().to_string(),
                "expected": expected,
                "actual": actual,
            })),
            Error::GpuUnsupported {
                device,
                detected,
                minimum,
            } => Some(json!({
                "gpu_name": device,
                "compute_capability": detected,
                "minimum": minimum,
            })),
            Error::DriverIncompatible { detected, minimum } => {
                Some(json!({ "detected": detected, "minimum": minimum }))
            }
            _ => None,
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            code: self.code(),
            message: self.to_string(),
            details: self.details(),
        }
    }
}
