//! Structure preprocessing: repeat-unit SMILES → graph + fingerprint + descriptors.

pub mod element;
pub mod features;
pub mod molecule;
pub mod smiles;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::error::{Error, Result};
use crate::model::DescriptorScaler;
pub use features::{
    ATOM_FEATURE_DIM, BOND_FEATURE_DIM, DESCRIPTOR_DIM, FINGERPRINT_BITS, FINGERPRINT_RADIUS,
};
pub use molecule::{Atom, Bond, BondOrder, Molecule};

pub const MAX_SMILES_LENGTH: usize = 2000;
pub const OLIGOMER_UNITS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmilesError {
    #[error("{message} at position {position}")]
    Syntax { position: usize, message: String },
    #[error("{0}")]
    Structure(String),
}

/// Model-ready features of one repeat unit.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphFeatures {
    pub num_nodes: usize,
    /// Row-major `[num_nodes, ATOM_FEATURE_DIM]`.
    pub node_features: Vec<f32>,
    pub edge_src: Vec<u32>,
    pub edge_dst: Vec<u32>,
    /// Row-major `[num_edges, BOND_FEATURE_DIM]`.
    pub edge_features: Vec<f32>,
    pub fingerprint: Vec<f32>,
    /// Scaled descriptors.
    pub descriptors: Vec<f32>,
}

impl GraphFeatures {
    pub fn num_edges(&self) -> usize {
        self.edge_src.len()
    }
}

/// Validates structures and computes features. Pure apart from the scaler.
#[derive(Debug, Clone)]
pub struct StructurePreprocessor {
    scaler: Arc<DescriptorScaler>,
    oligomer_units: usize,
}

impl StructurePreprocessor {
    pub fn new(scaler: Arc<DescriptorScaler>) -> Self {
        Self {
            scaler,
            oligomer_units: OLIGOMER_UNITS,
        }
    }

    /// Load the fitted scaler and check it matches the descriptor width.
    pub fn load(scaler_path: &Path) -> Result<Self> {
        let scaler = DescriptorScaler::load(scaler_path)?;
        if scaler.dim() != DESCRIPTOR_DIM {
            return Err(Error::invalid_artifact(
                scaler_path,
                format!(
                    "scaler has {} features, descriptors have {}",
                    scaler.dim(),
                    DESCRIPTOR_DIM
                ),
            ));
        }
        Ok(Self::new(Arc::new(scaler)))
    }

    /// Check a structure string without featurizing it.
    pub fn validate(&self, smiles: &str) -> Result<Molecule> {
        if smiles.trim().is_empty() {
            return Err(Error::validation("SMILES string is empty."));
        }
        let length = smiles.chars().count();
        if length > MAX_SMILES_LENGTH {
            return Err(Error::validation(format!(
                "SMILES too long ({length} chars, max {MAX_SMILES_LENGTH})."
            )));
        }
        if !smiles.contains('*') {
            return Err(Error::validation(
                "SMILES must include polymer connection points using '*'.",
            ));
        }
        let mol = smiles::parse(smiles.trim())
            .map_err(|e| Error::validation(format!("Invalid SMILES: {e}")))?;
        let stars = mol.connection_points().len();
        if stars != 2 {
            return Err(Error::validation(format!(
                "Expected exactly 2 '*' connection points, found {stars}."
            )));
        }
        Ok(mol)
    }

    pub fn preprocess(&self, smiles: &str) -> Result<GraphFeatures> {
        let unit = self.validate(smiles)?;
        let oligomer = unit.oligomer(self.oligomer_units).map_err(Error::validation)?;

        let num_nodes = unit.atom_count();
        let mut node_features = Vec::with_capacity(num_nodes * ATOM_FEATURE_DIM);
        for i in 0..num_nodes {
            node_features.extend_from_slice(&features::atom_features(&unit, i));
        }

        let num_edges = unit.bonds().len() * 2;
        let mut edge_src = Vec::with_capacity(num_edges);
        let mut edge_dst = Vec::with_capacity(num_edges);
        let mut edge_features = Vec::with_capacity(num_edges * BOND_FEATURE_DIM);
        for (idx, bond) in unit.bonds().iter().enumerate() {
            let f = features::bond_features(&unit, idx);
            for (src, dst) in [(bond.a, bond.b), (bond.b, bond.a)] {
                edge_src.push(src as u32);
                edge_dst.push(dst as u32);
                edge_features.extend_from_slice(&f);
            }
        }

        let fingerprint =
            features::circular_fingerprint(&oligomer, FINGERPRINT_RADIUS, FINGERPRINT_BITS);

        let points = unit.connection_points();
        let backbone = unit.shortest_path_len(points[0], points[1]).unwrap_or(0);
        let raw = features::descriptors(&oligomer, backbone);
        let descriptors = self.scaler.transform(&raw)?;

        Ok(GraphFeatures {
            num_nodes,
            node_features,
            edge_src,
            edge_dst,
            edge_features,
            fingerprint,
            descriptors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn preprocessor() -> StructurePreprocessor {
        StructurePreprocessor::new(Arc::new(DescriptorScaler::identity(DESCRIPTOR_DIM)))
    }

    fn validation_message(smiles: &str) -> String {
        let err = preprocessor().preprocess(smiles).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError, "{smiles}");
        err.to_string()
    }

    #[test]
    fn test_preprocess_shapes() {
        let g = preprocessor().preprocess("*CC(C)*").unwrap();
        assert_eq!(g.num_nodes, 5);
        assert_eq!(g.node_features.len(), 5 * ATOM_FEATURE_DIM);
        assert_eq!(g.num_edges(), 8);
        assert_eq!(g.edge_features.len(), 8 * BOND_FEATURE_DIM);
        assert_eq!(g.fingerprint.len(), FINGERPRINT_BITS);
        assert_eq!(g.descriptors.len(), DESCRIPTOR_DIM);
    }

    #[test]
    fn test_preprocess_is_deterministic() {
        let p = preprocessor();
        assert_eq!(p.preprocess("*CC*").unwrap(), p.preprocess("*CC*").unwrap());
    }

    #[test]
    fn test_validation_order_and_messages() {
        assert_eq!(validation_message("   "), "SMILES string is empty.");
        assert!(validation_message(&format!("*{}*", "C".repeat(2000))).contains("too long"));
        assert!(validation_message("CCO").contains("connection points using '*'"));
        assert!(validation_message("not-a-structure*").starts_with("Invalid SMILES"));
        assert_eq!(
            validation_message("*CC(*)C*"),
            "Expected exactly 2 '*' connection points, found 3."
        );
        assert_eq!(
            validation_message("*CC"),
            "Expected exactly 2 '*' connection points, found 1."
        );
    }

    #[test]
    fn test_scaler_is_applied() {
        let mut scaler = DescriptorScaler::identity(DESCRIPTOR_DIM);
        scaler.mean[0] = 6.0;
        scaler.scale[0] = 2.0;
        let p = StructurePreprocessor::new(Arc::new(scaler));
        let g = p.preprocess("*CC*").unwrap();
        assert_eq!(g.descriptors[0], 0.0);
    }
}
