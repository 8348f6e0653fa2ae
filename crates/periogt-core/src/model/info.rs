//! Built-in catalogue of property labels and units.

use serde::{Deserialize, Serialize};

/// Public description of a supported property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub id: String,
    pub label: String,
    pub units: String,
}

const PROPERTY_METADATA: &[(&str, &str, &str)] = &[
    ("eat", "Atomization energy", "eV"),
    ("eps", "Dielectric constant (ε)", ""),
    ("density", "Density", "g/cm³"),
    ("tg", "Glass transition temperature (Tg)", "K"),
    ("nc", "Refractive index (nc)", ""),
    ("eea", "Electron affinity", "eV"),
    ("eip", "Ionization potential", "eV"),
    ("xi", "Chi parameter", ""),
    ("cp", "Heat capacity (Cp)", "J/(mol·K)"),
    ("e_amorph", "Young's modulus (amorphous)", "GPa"),
    ("egc", "Band gap (chain)", "eV"),
    ("egb", "Band gap (bulk)", "eV"),
];

/// `(label, units)` for a property id; unknown ids are labelled by their id.
pub fn property_metadata(id: &str) -> (String, String) {
    PROPERTY_METADATA
        .iter()
        .find(|(pid, _, _)| *pid == id)
        .map(|(_, label, units)| (label.to_string(), units.to_string()))
        .unwrap_or_else(|| (id.to_string(), String::new()))
}
