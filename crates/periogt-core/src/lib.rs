//! PerioGT Core - shared polymer property inference runtime
//!
//! One runtime backs both the hosted API and the HPC command line:
//!
//! - configuration and device selection ([`config`], [`models::device`])
//! - checkpoint download, verification and indexing ([`model`])
//! - SMILES validation and graph featurization ([`chem`])
//! - cached backbone/head loading and forward passes ([`models`], [`inference`])
//! - request handling and fault-isolated batches ([`runtime`])
//! - environment checks ([`diagnostics`])
//!
//! # Example
//!
//! ```ignore
//! use periogt_core::{PerioRuntime, PredictionRequest};
//!
//! let runtime = PerioRuntime::from_env()?;
//! let result = runtime
//!     .predict(&PredictionRequest::new("*CC*", "tg"), "req-1")
//!     .await?;
//! println!("{} {}", result.value, result.units);
//! ```

pub mod chem;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod inference;
pub mod model;
pub mod models;
pub mod runtime;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::{ConfigInputs, ResolveOptions, ResolvedPaths, RuntimeConfig};
pub use diagnostics::{check_environment, CheckResult, DiagnosticReport, Verdict};
pub use error::{Error, ErrorCode, ErrorDetail, Result};
pub use model::{ArtifactManager, PropertyInfo, SetupReport};
pub use models::{DeviceKind, DeviceRequest, GpuDetails, GpuProbe, StaticGpuProbe, SystemGpuProbe};
pub use runtime::{
    BatchOrchestrator, BatchOutcome, BatchReport, BatchRow, EmbeddingResult, HealthStatus,
    PerioRuntime, PredictionRequest, PredictionResponse, PredictionResult, RowOutcome,
};
