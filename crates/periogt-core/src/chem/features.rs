//! Atom/bond feature vectors, circular fingerprints and descriptors.

use std::collections::HashSet;

use xxhash_rust::xxh64::xxh64;

use super::molecule::{BondOrder, Molecule};

pub const ATOM_FEATURE_DIM: usize = 30;
pub const BOND_FEATURE_DIM: usize = 6;
pub const FINGERPRINT_BITS: usize = 1024;
pub const FINGERPRINT_RADIUS: usize = 2;

const ELEMENT_SLOTS: [&str; 12] = ["C", "N", "O", "S", "F", "Si", "P", "Cl", "Br", "I", "B", "*"];
const COUNTED_ELEMENTS: [&str; 11] = ["C", "N", "O", "S", "F", "Si", "P", "Cl", "Br", "I", "B"];
const MAX_DESCRIPTOR_MAGNITUDE: f32 = 1e12;

/// Names of the descriptor vector entries, in order.
pub const DESCRIPTOR_NAMES: &[&str] = &[
    "heavy_atoms",
    "count_c",
    "count_n",
    "count_o",
    "count_s",
    "count_f",
    "count_si",
    "count_p",
    "count_cl",
    "count_br",
    "count_i",
    "count_b",
    "count_other",
    "bonds_single",
    "bonds_double",
    "bonds_triple",
    "bonds_aromatic",
    "rings",
    "aromatic_fraction",
    "mol_weight",
    "heteroatoms",
    "rotatable_bonds",
    "hbond_donors",
    "hbond_acceptors",
    "net_charge",
    "fraction_csp3",
    "hydrogens",
    "backbone_length",
];

pub const DESCRIPTOR_DIM: usize = DESCRIPTOR_NAMES.len();

/// 30-wide node features: element (13), degree (6), charge (3), H count (5),
/// aromatic, in ring, connection point.
pub fn atom_features(mol: &Molecule, idx: usize) -> [f32; ATOM_FEATURE_DIM] {
    let atom = &mol.atoms()[idx];
    let mut f = [0.0f32; ATOM_FEATURE_DIM];

    let slot = ELEMENT_SLOTS
        .iter()
        .position(|s| *s == atom.element.symbol)
        .unwrap_or(ELEMENT_SLOTS.len());
    f[slot] = 1.0;

    let degree = mol.degree(idx).min(5);
    f[13 + degree] = 1.0;

    match atom.charge.signum() {
        -1 => f[19] = 1.0,
        0 => f[20] = 1.0,
        _ => f[21] = 1.0,
    }

    let h = (atom.hydrogens as usize).min(4);
    f[22 + h] = 1.0;

    f[27] = atom.aromatic as u8 as f32;
    f[28] = atom.in_ring as u8 as f32;
    f[29] = atom.is_connection_point() as u8 as f32;
    f
}

/// 6-wide edge features: bond type (4), in ring, touches a connection point.
pub fn bond_features(mol: &Molecule, bond_idx: usize) -> [f32; BOND_FEATURE_DIM] {
    let bond = &mol.bonds()[bond_idx];
    let mut f = [0.0f32; BOND_FEATURE_DIM];
    match bond.order {
        BondOrder::Single => f[0] = 1.0,
        BondOrder::Double => f[1] = 1.0,
        BondOrder::Triple | BondOrder::Quadruple => f[2] = 1.0,
        BondOrder::Aromatic => f[3] = 1.0,
    }
    f[4] = bond.in_ring as u8 as f32;
    let atoms = mol.atoms();
    f[5] = (atoms[bond.a].is_connection_point() || atoms[bond.b].is_connection_point()) as u8
        as f32;
    f
}

fn atom_invariant(mol: &Molecule, idx: usize) -> u64 {
    let atom = &mol.atoms()[idx];
    let bytes = [
        atom.element.atomic_number,
        mol.degree(idx) as u8,
        atom.hydrogens,
        atom.charge as u8,
        atom.in_ring as u8,
        atom.aromatic as u8,
    ];
    xxh64(&bytes, 0)
}

/// Hashed circular fingerprint as a 0/1 vector.
pub fn circular_fingerprint(mol: &Molecule, radius: usize, bits: usize) -> Vec<f32> {
    let mut fp = vec![0.0f32; bits];
    if bits == 0 {
        return fp;
    }
    let mut ids: Vec<u64> = (0..mol.atom_count()).map(|i| atom_invariant(mol, i)).collect();
    let mut seen = HashSet::new();
    for id in &ids {
        if seen.insert(*id) {
            fp[(*id % bits as u64) as usize] = 1.0;
        }
    }

    for layer in 1..=radius {
        let mut next = Vec::with_capacity(ids.len());
        for i in 0..mol.atom_count() {
            let mut env: Vec<(u8, u64)> = mol
                .neighbors(i)
                .map(|(n, bond)| (bond.order.code(), ids[n]))
                .collect();
            env.sort_unstable();

            let mut buf = Vec::with_capacity(16 + env.len() * 9);
            buf.extend_from_slice(&(layer as u64).to_le_bytes());
            buf.extend_from_slice(&ids[i].to_le_bytes());
            for (code, id) in env {
                buf.push(code);
                buf.extend_from_slice(&id.to_le_bytes());
            }
            next.push(xxh64(&buf, 0));
        }
        ids = next;
        for id in &ids {
            if seen.insert(*id) {
                fp[(*id % bits as u64) as usize] = 1.0;
            }
        }
    }
    fp
}

/// Raw (unscaled) descriptor vector of `mol`; `backbone_length` is measured
/// on the repeat unit.
pub fn descriptors(mol: &Molecule, backbone_length: usize) -> Vec<f32> {
    let atoms = mol.atoms();
    let bonds = mol.bonds();
    let mut d = vec![0.0f32; DESCRIPTOR_DIM];

    let heavy: Vec<usize> = (0..atoms.len())
        .filter(|&i| !atoms[i].is_connection_point() && atoms[i].element.atomic_number > 1)
        .collect();
    d[0] = heavy.len() as f32;

    for &i in &heavy {
        let symbol = atoms[i].element.symbol;
        match COUNTED_ELEMENTS.iter().position(|s| *s == symbol) {
            Some(slot) => d[1 + slot] += 1.0,
            None => d[12] += 1.0,
        }
    }

    for bond in bonds {
        let slot = match bond.order {
            BondOrder::Single => 13,
            BondOrder::Double => 14,
            BondOrder::Triple | BondOrder::Quadruple => 15,
            BondOrder::Aromatic => 16,
        };
        d[slot] += 1.0;
    }

    d[17] = mol.ring_count() as f32;
    let aromatic = heavy.iter().filter(|&&i| atoms[i].aromatic).count();
    d[18] = if heavy.is_empty() {
        0.0
    } else {
        aromatic as f32 / heavy.len() as f32
    };

    let hydrogen_mass = 1.008f32;
    d[19] = atoms
        .iter()
        .filter(|a| !a.is_connection_point())
        .map(|a| a.element.mass + a.hydrogens as f32 * hydrogen_mass)
        .sum();

    d[20] = heavy
        .iter()
        .filter(|&&i| atoms[i].element.symbol != "C")
        .count() as f32;

    let heavy_degree = |i: usize| {
        mol.neighbors(i)
            .filter(|(n, _)| !atoms[*n].is_connection_point())
            .count()
    };
    d[21] = bonds
        .iter()
        .filter(|b| {
            b.order == BondOrder::Single
                && !b.in_ring
                && !atoms[b.a].is_connection_point()
                && !atoms[b.b].is_connection_point()
                && heavy_degree(b.a) > 1
                && heavy_degree(b.b) > 1
        })
        .count() as f32;

    let is_n_or_o = |i: &usize| matches!(atoms[*i].element.symbol, "N" | "O");
    d[22] = heavy
        .iter()
        .filter(|i| is_n_or_o(i) && atoms[**i].hydrogens > 0)
        .count() as f32;
    d[23] = heavy.iter().filter(|i| is_n_or_o(i)).count() as f32;

    d[24] = atoms.iter().map(|a| a.charge as f32).sum();

    let carbons: Vec<usize> = heavy
        .iter()
        .copied()
        .filter(|&i| atoms[i].element.symbol == "C")
        .collect();
    let sp3 = carbons
        .iter()
        .filter(|&&i| {
            !atoms[i].aromatic && mol.neighbors(i).all(|(_, b)| b.order == BondOrder::Single)
        })
        .count();
    d[25] = if carbons.is_empty() {
        0.0
    } else {
        sp3 as f32 / carbons.len() as f32
    };

    d[26] = atoms.iter().map(|a| a.hydrogens as f32).sum();
    d[27] = backbone_length as f32;

    for v in d.iter_mut() {
        if !v.is_finite() {
            *v = 0.0;
        }
        *v = v.clamp(-MAX_DESCRIPTOR_MAGNITUDE, MAX_DESCRIPTOR_MAGNITUDE);
    }
    d
}
