//! Request-level runtime shared by every surface.

mod batch;
mod csv_io;
mod service;
mod types;

pub use batch::{BatchOrchestrator, BatchOutcome, BatchReport, BatchRow, BatchRowResult, RowOutcome};
pub use csv_io::{default_output_path, read_batch_csv, write_batch_csv, OUTPUT_COLUMNS};
pub use service::PerioRuntime;
pub use types::{
    round_for_wire, EmbeddingResult, HealthStatus, ModelDescriptor, PredictionRequest,
    PredictionResponse, PredictionResult, PredictionValue, MODEL_NAME, WIRE_DECIMALS,
};
