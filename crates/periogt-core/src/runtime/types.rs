//! Request/response types shared by the hosted API and the CLI.

use serde::{Deserialize, Serialize};

pub const MODEL_NAME: &str = "PerioGT";

/// Decimal places kept for predicted values on the wire.
pub const WIRE_DECIMALS: i32 = 6;

pub fn round_for_wire(value: f64) -> f64 {
    let factor = 10f64.powi(WIRE_DECIMALS);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub smiles: String,
    pub property: String,
    #[serde(default)]
    pub return_embedding: bool,
}

impl PredictionRequest {
    pub fn new(smiles: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            smiles: smiles.into(),
            property: property.into(),
            return_embedding: false,
        }
    }

    pub fn with_embedding(mut self, return_embedding: bool) -> Self {
        self.return_embedding = return_embedding;
        self
    }
}

/// Unrounded prediction as produced by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub smiles: String,
    pub property: String,
    pub value: f64,
    pub units: String,
    pub embedding: Option<Vec<f32>>,
    pub checkpoint: String,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionValue {
    pub value: f64,
    pub units: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub checkpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub smiles: String,
    pub property: String,
    pub prediction: PredictionValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub model: ModelDescriptor,
    pub request_id: String,
}

impl PredictionResult {
    pub fn to_response(&self) -> PredictionResponse {
        PredictionResponse {
            smiles: self.smiles.clone(),
            property: self.property.clone(),
            prediction: PredictionValue {
                value: round_for_wire(self.value),
                units: self.units.clone(),
            },
            embedding: self.embedding.clone(),
            model: ModelDescriptor {
                name: MODEL_NAME.to_string(),
                checkpoint: self.checkpoint.clone(),
            },
            request_id: self.request_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub smiles: String,
    pub embedding: Vec<f32>,
    pub dim: usize,
    pub request_id: String,
}

/// Readiness snapshot; building one never fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub artifacts_ready: bool,
    pub model_loaded: bool,
    pub device: String,
    pub gpu_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_name: Option<String>,
    pub properties_available: usize,
    pub loaded_properties: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_rounding() {
        assert_eq!(round_for_wire(1.23456789), 1.234568);
        assert_eq!(round_for_wire(-0.0000004), -0.0);
    }

    #[test]
    fn test_response_shape() {
        let result = PredictionResult {
            smiles: "*CC*".into(),
            property: "tg".into(),
            value: 300.1234567,
            units: "K".into(),
            embedding: None,
            checkpoint: "/ckpt/tg.safetensors".into(),
            request_id: "r1".into(),
        };
        let json = serde_json::to_value(result.to_response()).unwrap();
        assert_eq!(json["prediction"]["value"], 300.123457);
        assert_eq!(json["model"]["name"], "PerioGT");
        assert!(json.get("embedding").is_none());
    }

    #[test]
    fn test_request_defaults_embedding_flag() {
        let req: PredictionRequest =
            serde_json::from_str(r#"{"smiles": "*CC*", "property": "tg"}"#).unwrap();
        assert!(!req.return_embedding);
    }
}
