//! Element data needed for valence checks and descriptors.

/// Static properties of one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Element {
    pub symbol: &'static str,
    pub atomic_number: u8,
    pub mass: f32,
    /// Highest neutral valence accepted; `None` skips the check.
    pub max_valence: Option<u8>,
}

pub const WILDCARD: Element = Element {
    symbol: "*",
    atomic_number: 0,
    mass: 0.0,
    max_valence: None,
};

const ELEMENTS: &[Element] = &[
    el("H", 1, 1.008, Some(1)),
    el("He", 2, 4.003, Some(0)),
    el("Li", 3, 6.94, Some(1)),
    el("Be", 4, 9.012, Some(2)),
    el("B", 5, 10.81, Some(3)),
    el("C", 6, 12.011, Some(4)),
    el("N", 7, 14.007, Some(3)),
    el("O", 8, 15.999, Some(2)),
    el("F", 9, 18.998, Some(1)),
    el("Ne", 10, 20.180, Some(0)),
    el("Na", 11, 22.990, Some(1)),
    el("Mg", 12, 24.305, Some(2)),
    el("Al", 13, 26.982, Some(3)),
    el("Si", 14, 28.085, Some(4)),
    el("P", 15, 30.974, Some(5)),
    el("S", 16, 32.06, Some(6)),
    el("Cl", 17, 35.45, Some(1)),
    el("Ar", 18, 39.948, Some(0)),
    el("K", 19, 39.098, Some(1)),
    el("Ca", 20, 40.078, Some(2)),
    el("Ti", 22, 47.867, None),
    el("Cr", 24, 51.996, None),
    el("Mn", 25, 54.938, None),
    el("Fe", 26, 55.845, None),
    el("Co", 27, 58.933, None),
    el("Ni", 28, 58.693, None),
    el("Cu", 29, 63.546, None),
    el("Zn", 30, 65.38, None),
    el("Ga", 31, 69.723, Some(3)),
    el("Ge", 32, 72.630, Some(4)),
    el("As", 33, 74.922, Some(5)),
    el("Se", 34, 78.971, Some(6)),
    el("Br", 35, 79.904, Some(1)),
    el("Kr", 36, 83.798, None),
    el("Zr", 40, 91.224, None),
    el("Mo", 42, 95.95, None),
    el("Ru", 44, 101.07, None),
    el("Rh", 45, 102.91, None),
    el("Pd", 46, 106.42, None),
    el("Ag", 47, 107.87, None),
    el("Cd", 48, 112.41, None),
    el("Sn", 50, 118.71, Some(4)),
    el("Sb", 51, 121.76, Some(5)),
    el("Te", 52, 127.60, Some(6)),
    el("I", 53, 126.90, Some(5)),
    el("Xe", 54, 131.29, None),
    el("Cs", 55, 132.91, Some(1)),
    el("Ba", 56, 137.33, Some(2)),
    el("Hf", 72, 178.49, None),
    el("W", 74, 183.84, None),
    el("Pt", 78, 195.08, None),
    el("Au", 79, 196.97, None),
    el("Hg", 80, 200.59, None),
    el("Pb", 82, 207.2, None),
    el("Bi", 83, 208.98, None),
];

const fn el(symbol: &'static str, atomic_number: u8, mass: f32, max_valence: Option<u8>) -> Element {
    Element {
        symbol,
        atomic_number,
        mass,
        max_valence,
    }
}

pub fn by_symbol(symbol: &str) -> Option<Element> {
    if symbol == "*" {
        return Some(WILDCARD);
    }
    ELEMENTS.iter().copied().find(|e| e.symbol == symbol)
}

/// Elements that may be written in lowercase (aromatic) form.
pub fn aromatic_capable(symbol: &str) -> bool {
    matches!(symbol, "B" | "C" | "N" | "O" | "P" | "S" | "Se" | "As" | "Te")
}

impl Element {
    pub fn is_wildcard(&self) -> bool {
        self.atomic_number == 0
    }

    /// Allowed valence after accounting for formal charge.
    pub fn allowed_valence(&self, charge: i8) -> Option<i32> {
        let base = self.max_valence? as i32;
        let charge = charge as i32;
        Some(match self.symbol {
            // Isoelectronic shifts: C+/C- are trivalent, B- is tetravalent.
            "C" | "Si" | "Ge" | "Sn" => base - charge.abs(),
            "B" | "Al" | "Ga" => base - charge,
            _ => base + charge,
        })
    }

    /// Default valences used to infer implicit hydrogens on organic-subset atoms.
    pub fn default_valences(&self) -> &'static [u8] {
        match self.symbol {
            "B" => &[3],
            "C" => &[4],
            "N" => &[3, 5],
            "O" => &[2],
            "P" => &[3, 5],
            "S" => &[2, 4, 6],
            "F" | "Cl" | "Br" | "I" => &[1],
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_charge_adjusted_valence() {
        let n = by_symbol("N").unwrap();
        assert_eq!(n.allowed_valence(0), Some(3));
        assert_eq!(n.allowed_valence(1), Some(4));
        assert_eq!(by_symbol("C").unwrap().allowed_valence(-1), Some(3));
        assert_eq!(by_symbol("B").unwrap().allowed_valence(-1), Some(4));
        assert!(by_symbol("Xx").is_none());
        assert!(by_symbol("*").unwrap().is_wildcard());
    }
}
