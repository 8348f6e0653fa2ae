//! Molecular graph with ring perception, valence checks and oligomer assembly.

use std::collections::VecDeque;

use super::element::Element;
use super::SmilesError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BondOrder {
    Single,
    Double,
    Triple,
    Quadruple,
    Aromatic,
}

impl BondOrder {
    /// Integer contribution to the valence sum; aromatic counts as one.
    pub fn valence(&self) -> u8 {
        match self {
            BondOrder::Single | BondOrder::Aromatic => 1,
            BondOrder::Double => 2,
            BondOrder::Triple => 3,
            BondOrder::Quadruple => 4,
        }
    }

    /// Contribution to bond-order weighted sums (aromatic = 1.5).
    pub fn weight(&self) -> f32 {
        match self {
            BondOrder::Aromatic => 1.5,
            other => other.valence() as f32,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            BondOrder::Single => 1,
            BondOrder::Double => 2,
            BondOrder::Triple => 3,
            BondOrder::Quadruple => 4,
            BondOrder::Aromatic => 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub element: Element,
    pub aromatic: bool,
    pub charge: i8,
    pub isotope: Option<u16>,
    pub atom_class: Option<u32>,
    /// Written inside brackets, so hydrogens are explicit.
    pub bracket: bool,
    pub explicit_h: u8,
    /// Total hydrogen count, filled in by sanitization.
    pub hydrogens: u8,
    pub in_ring: bool,
}

impl Atom {
    pub fn new(element: Element) -> Self {
        Self {
            element,
            aromatic: false,
            charge: 0,
            isotope: None,
            atom_class: None,
            bracket: false,
            explicit_h: 0,
            hydrogens: 0,
            in_ring: false,
        }
    }

    pub fn is_connection_point(&self) -> bool {
        self.element.is_wildcard()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bond {
    pub a: usize,
    pub b: usize,
    pub order: BondOrder,
    pub in_ring: bool,
}

impl Bond {
    pub fn other(&self, atom: usize) -> usize {
        if self.a == atom {
            self.b
        } else {
            self.a
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Molecule {
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
    adjacency: Vec<Vec<(usize, usize)>>,
}

impl Molecule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    pub fn add_atom(&mut self, atom: Atom) -> usize {
        self.atoms.push(atom);
        self.adjacency.push(Vec::new());
        self.atoms.len() - 1
    }

    /// Add a bond; self-bonds and duplicate bonds are rejected.
    pub fn add_bond(&mut self, a: usize, b: usize, order: BondOrder) -> Result<usize, String> {
        if a == b {
            return Err(format!("atom {a} cannot be bonded to itself"));
        }
        if self.bond_between(a, b).is_some() {
            return Err(format!("duplicate bond between atoms {a} and {b}"));
        }
        let idx = self.bonds.len();
        self.bonds.push(Bond {
            a,
            b,
            order,
            in_ring: false,
        });
        self.adjacency[a].push((b, idx));
        self.adjacency[b].push((a, idx));
        Ok(idx)
    }

    pub fn bond_between(&self, a: usize, b: usize) -> Option<usize> {
        self.adjacency
            .get(a)?
            .iter()
            .find(|(n, _)| *n == b)
            .map(|(_, bond)| *bond)
    }

    /// `(neighbour, bond)` pairs of an atom.
    pub fn neighbors(&self, atom: usize) -> impl Iterator<Item = (usize, &Bond)> + '_ {
        self.adjacency[atom]
            .iter()
            .map(move |(n, b)| (*n, &self.bonds[*b]))
    }

    pub fn degree(&self, atom: usize) -> usize {
        self.adjacency[atom].len()
    }

    pub fn connection_points(&self) -> Vec<usize> {
        self.atoms
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_connection_point())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn fragment_count(&self) -> usize {
        let mut seen = vec![false; self.atoms.len()];
        let mut count = 0;
        for start in 0..self.atoms.len() {
            if seen[start] {
                continue;
            }
            count += 1;
            let mut queue = VecDeque::from([start]);
            seen[start] = true;
            while let Some(cur) = queue.pop_front() {
                for (n, _) in &self.adjacency[cur] {
                    if !seen[*n] {
                        seen[*n] = true;
                        queue.push_back(*n);
                    }
                }
            }
        }
        count
    }

    /// Independent cycle count (cyclomatic number).
    pub fn ring_count(&self) -> usize {
        (self.bonds.len() + self.fragment_count()).saturating_sub(self.atoms.len())
    }

    /// Bond count of the shortest path between two atoms.
    pub fn shortest_path_len(&self, from: usize, to: usize) -> Option<usize> {
        let mut dist = vec![usize::MAX; self.atoms.len()];
        dist[from] = 0;
        let mut queue = VecDeque::from([from]);
        while let Some(cur) = queue.pop_front() {
            if cur == to {
                return Some(dist[cur]);
            }
            for (n, _) in &self.adjacency[cur] {
                if dist[*n] == usize::MAX {
                    dist[*n] = dist[cur] + 1;
                    queue.push_back(*n);
                }
            }
        }
        None
    }

    /// Mark ring bonds and atoms. A bond is in a ring when its ends stay
    /// connected without it.
    pub fn perceive_rings(&mut self) {
        for idx in 0..self.bonds.len() {
            let Bond { a, b, .. } = self.bonds[idx];
            self.bonds[idx].in_ring = self.connected_without(a, b, idx);
        }
        for atom in self.atoms.iter_mut() {
            atom.in_ring = false;
        }
        for bond in &self.bonds {
            if bond.in_ring {
                self.atoms[bond.a].in_ring = true;
                self.atoms[bond.b].in_ring = true;
            }
        }
    }

    fn connected_without(&self, from: usize, to: usize, skip: usize) -> bool {
        let mut seen = vec![false; self.atoms.len()];
        seen[from] = true;
        let mut queue = VecDeque::from([from]);
        while let Some(cur) = queue.pop_front() {
            for (n, b) in &self.adjacency[cur] {
                if *b == skip || seen[*n] {
                    continue;
                }
                if *n == to {
                    return true;
                }
                seen[*n] = true;
                queue.push_back(*n);
            }
        }
        false
    }

    fn bond_valence(&self, atom: usize) -> i32 {
        self.neighbors(atom)
            .map(|(_, b)| b.order.valence() as i32)
            .sum()
    }

    /// Aromatic atoms that donate one electron to the pi system carry an
    /// implied extra bond.
    fn aromatic_extra(&self, atom: usize, bond_valence: i32, hydrogens: i32) -> i32 {
        let a = &self.atoms[atom];
        if !a.aromatic || !matches!(a.element.symbol, "B" | "C" | "N" | "P" | "As") {
            return 0;
        }
        match a.element.allowed_valence(a.charge) {
            Some(limit) if bond_valence + hydrogens + 1 > limit => 0,
            _ => 1,
        }
    }

    /// Validate the parsed graph and derive hydrogens and ring flags.
    pub fn sanitize(&mut self) -> Result<(), SmilesError> {
        if self.atoms.is_empty() {
            return Err(SmilesError::Structure("structure has no atoms".to_string()));
        }
        let fragments = self.fragment_count();
        if fragments > 1 {
            return Err(SmilesError::Structure(format!(
                "structure has {fragments} disconnected fragments; a repeat unit must be one fragment"
            )));
        }

        self.perceive_rings();
        for (i, atom) in self.atoms.iter().enumerate() {
            if atom.aromatic && !atom.in_ring {
                return Err(SmilesError::Structure(format!(
                    "non-ring atom {i} ({}) marked aromatic",
                    atom.element.symbol
                )));
            }
        }

        for i in 0..self.atoms.len() {
            let bond_valence = self.bond_valence(i);
            let atom = &self.atoms[i];
            let hydrogens = if atom.bracket || atom.is_connection_point() {
                atom.explicit_h as i32
            } else {
                let extra = self.aromatic_extra(i, bond_valence, 0);
                let used = bond_valence + extra;
                atom.element
                    .default_valences()
                    .iter()
                    .map(|v| *v as i32)
                    .find(|v| *v >= used)
                    .map(|v| v - used)
                    .unwrap_or(0)
            };

            let extra = self.aromatic_extra(i, bond_valence, hydrogens);
            let total = bond_valence + extra + hydrogens;
            let atom = &self.atoms[i];
            if let Some(limit) = atom.element.allowed_valence(atom.charge) {
                if total > limit {
                    return Err(SmilesError::Structure(format!(
                        "explicit valence for atom {i} ({}) is {total}, greater than permitted {limit}",
                        atom.element.symbol
                    )));
                }
            }
            self.atoms[i].hydrogens = hydrogens.clamp(0, u8::MAX as i32) as u8;
        }
        Ok(())
    }

    /// The atoms bonded to each connection point, head first.
    pub fn connection_neighbors(&self) -> Result<[(usize, usize, BondOrder); 2], String> {
        let points = self.connection_points();
        if points.len() != 2 {
            return Err(format!(
                "Expected exactly 2 '*' connection points, found {}.",
                points.len()
            ));
        }
        let mut out = [(0, 0, BondOrder::Single); 2];
        for (slot, &star) in points.iter().enumerate() {
            let mut nbrs = self.neighbors(star);
            let (Some((n, bond)), None) = (nbrs.next(), nbrs.next()) else {
                return Err(format!(
                    "connection point {star} must be bonded to exactly one atom"
                ));
            };
            if self.atoms[n].is_connection_point() {
                return Err("connection points cannot be bonded to each other".to_string());
            }
            out[slot] = (star, n, bond.order);
        }
        Ok(out)
    }

    /// Chain `units` copies head-to-tail, keeping the two outer connection points.
    pub fn oligomer(&self, units: usize) -> Result<Molecule, String> {
        let [(head, head_nb, _), (tail, tail_nb, link)] = self.connection_neighbors()?;
        let units = units.max(1);
        let mut out = Molecule::new();
        let mut copies: Vec<Vec<Option<usize>>> = Vec::with_capacity(units);

        for k in 0..units {
            let mut map = vec![None; self.atoms.len()];
            for (i, atom) in self.atoms.iter().enumerate() {
                let dropped = (i == head && k > 0) || (i == tail && k + 1 < units);
                if !dropped {
                    map[i] = Some(out.add_atom(atom.clone()));
                }
            }
            for bond in &self.bonds {
                if let (Some(a), Some(b)) = (map[bond.a], map[bond.b]) {
                    out.add_bond(a, b, bond.order)?;
                }
            }
            copies.push(map);
        }

        for k in 0..units.saturating_sub(1) {
            let from = copies[k][tail_nb];
            let to = copies[k + 1][head_nb];
            if let (Some(a), Some(b)) = (from, to) {
                out.add_bond(a, b, link)?;
            }
        }
        out.perceive_rings();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::chem::smiles::parse;

    #[test]
    fn test_implicit_hydrogens() {
        let mol = parse("*CC(=O)O*").unwrap();
        let h: Vec<u8> = mol.atoms().iter().map(|a| a.hydrogens).collect();
        assert_eq!(h, vec![0, 2, 0, 0, 0, 0]);

        let benzene = parse("*c1ccccc1*").unwrap();
        assert_eq!(benzene.atoms()[1].hydrogens, 0);
        assert_eq!(benzene.atoms()[2].hydrogens, 1);
        assert!(benzene.atoms()[3].in_ring);
        assert_eq!(benzene.ring_count(), 1);
    }

    #[test]
    fn test_valence_violation_is_rejected() {
        let err = parse("*C(C)(C)(C)(C)C*").unwrap_err();
        assert!(err.to_string().contains("valence"));
    }

    #[test]
    fn test_aromatic_outside_ring_is_rejected() {
        assert!(parse("*cc*").is_err());
    }

    #[test]
    fn test_multiple_fragments_are_rejected() {
        let err = parse("*CC*.CC").unwrap_err();
        assert!(err.to_string().contains("fragment"));
    }

    #[test]
    fn test_oligomer_chains_units() {
        let unit = parse("*CC*").unwrap();
        let trimer = unit.oligomer(3).unwrap();
        assert_eq!(trimer.atom_count(), 8);
        assert_eq!(trimer.connection_points().len(), 2);
        assert_eq!(trimer.fragment_count(), 1);
        let pts = trimer.connection_points();
        assert_eq!(trimer.shortest_path_len(pts[0], pts[1]), Some(7));
        assert!(trimer.atoms().iter().all(|a| !a.in_ring));
    }

    #[test]
    fn test_single_atom_unit_oligomer() {
        let unit = parse("*C*").unwrap();
        let trimer = unit.oligomer(3).unwrap();
        assert_eq!(trimer.atom_count(), 5);
        assert_eq!(trimer.bonds().len(), 4);
    }
}
