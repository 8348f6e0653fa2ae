//! Forward passes and label denormalization.

mod engine;

pub use engine::{Embedding, InferenceEngine, Prediction};
