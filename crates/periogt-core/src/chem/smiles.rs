//! SMILES reader.
//!
//! Covers the organic subset, bracket atoms, wildcards, branches and ring
//! closures. Stereo markers are accepted and dropped.

use std::collections::BTreeMap;

use super::element::{self, aromatic_capable};
use super::molecule::{Atom, BondOrder, Molecule};
use super::SmilesError;

/// Parse and sanitize a SMILES string.
pub fn parse(smiles: &str) -> Result<Molecule, SmilesError> {
    let mut parser = Parser::new(smiles);
    parser.run()?;
    let mut mol = parser.mol;
    mol.sanitize()?;
    Ok(mol)
}

struct RingOpen {
    atom: usize,
    order: Option<BondOrder>,
    position: usize,
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    mol: Molecule,
    prev: Option<usize>,
    pending: Option<(BondOrder, usize)>,
    branches: Vec<(usize, usize, usize)>,
    rings: BTreeMap<u32, RingOpen>,
    after_dot: bool,
}

impl<'a> Parser<'a> {
    fn new(smiles: &'a str) -> Self {
        Self {
            input: smiles.as_bytes(),
            pos: 0,
            mol: Molecule::new(),
            prev: None,
            pending: None,
            branches: Vec::new(),
            rings: BTreeMap::new(),
            after_dot: false,
        }
    }

    fn err(&self, position: usize, message: impl Into<String>) -> SmilesError {
        SmilesError::Syntax {
            position,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn run(&mut self) -> Result<(), SmilesError> {
        if self.input.is_empty() {
            return Err(self.err(0, "empty SMILES"));
        }
        while let Some(c) = self.peek() {
            let start = self.pos;
            match c {
                b'(' => {
                    let Some(prev) = self.prev else {
                        return Err(self.err(start, "branch without a preceding atom"));
                    };
                    if self.pending.is_some() {
                        return Err(self.err(start, "bond symbol before '('"));
                    }
                    self.branches.push((prev, self.mol.atom_count(), start));
                    self.pos += 1;
                }
                b')' => {
                    let Some((anchor, atoms_at_open, _)) = self.branches.pop() else {
                        return Err(self.err(start, "unmatched ')'"));
                    };
                    if self.pending.is_some() {
                        return Err(self.err(start, "dangling bond before ')'"));
                    }
                    if self.mol.atom_count() == atoms_at_open {
                        return Err(self.err(start, "empty branch"));
                    }
                    self.prev = Some(anchor);
                    self.pos += 1;
                }
                b'.' => {
                    if self.pending.is_some() || self.prev.is_none() {
                        return Err(self.err(start, "unexpected '.'"));
                    }
                    if !self.branches.is_empty() {
                        return Err(self.err(start, "'.' inside a branch"));
                    }
                    self.prev = None;
                    self.after_dot = true;
                    self.pos += 1;
                }
                b'-' | b'=' | b'#' | b'$' | b':' | b'/' | b'\\' => {
                    if self.prev.is_none() {
                        return Err(self.err(start, "bond without a preceding atom"));
                    }
                    if self.pending.is_some() {
                        return Err(self.err(start, "consecutive bond symbols"));
                    }
                    let order = match c {
                        b'=' => BondOrder::Double,
                        b'#' => BondOrder::Triple,
                        b'$' => BondOrder::Quadruple,
                        b':' => BondOrder::Aromatic,
                        _ => BondOrder::Single,
                    };
                    self.pending = Some((order, start));
                    self.pos += 1;
                }
                b'0'..=b'9' | b'%' => self.ring_closure()?,
                b'[' => {
                    let atom = self.bracket_atom()?;
                    self.attach(atom, start)?;
                }
                _ => {
                    let atom = self.organic_atom()?;
                    self.attach(atom, start)?;
                }
            }
        }

        if let Some((_, position)) = self.pending {
            return Err(self.err(position, "dangling bond at end of input"));
        }
        if let Some((_, _, position)) = self.branches.last() {
            return Err(self.err(*position, "unclosed branch"));
        }
        if let Some((num, open)) = self.rings.iter().next() {
            return Err(self.err(open.position, format!("unclosed ring {num}")));
        }
        if self.after_dot && self.prev.is_none() {
            return Err(self.err(self.input.len(), "unexpected end after '.'"));
        }
        Ok(())
    }

    fn default_order(&self, a: usize, b: usize) -> BondOrder {
        let atoms = self.mol.atoms();
        if atoms[a].aromatic && atoms[b].aromatic {
            BondOrder::Aromatic
        } else {
            BondOrder::Single
        }
    }

    fn attach(&mut self, atom: Atom, position: usize) -> Result<(), SmilesError> {
        let idx = self.mol.add_atom(atom);
        if let Some(prev) = self.prev {
            let order = match self.pending.take() {
                Some((order, _)) => order,
                None => self.default_order(prev, idx),
            };
            self.mol
                .add_bond(prev, idx, order)
                .map_err(|m| self.err(position, m))?;
        }
        self.prev = Some(idx);
        Ok(())
    }

    fn ring_closure(&mut self) -> Result<(), SmilesError> {
        let start = self.pos;
        let Some(current) = self.prev else {
            return Err(self.err(start, "ring closure without a preceding atom"));
        };
        let num = if self.peek() == Some(b'%') {
            match (self.peek_at(1), self.peek_at(2)) {
                (Some(d1), Some(d2)) if d1.is_ascii_digit() && d2.is_ascii_digit() => {
                    self.pos += 3;
                    ((d1 - b'0') * 10 + (d2 - b'0')) as u32
                }
                _ => return Err(self.err(start, "'%' must be followed by two digits")),
            }
        } else {
            let d = self.input[self.pos] - b'0';
            self.pos += 1;
            d as u32
        };
        let pending = self.pending.take().map(|(order, _)| order);

        match self.rings.remove(&num) {
            Some(open) => {
                let order = match (open.order, pending) {
                    (Some(a), Some(b)) if a != b => {
                        return Err(self.err(start, format!("conflicting bond orders for ring {num}")))
                    }
                    (Some(a), _) | (None, Some(a)) => a,
                    (None, None) => self.default_order(open.atom, current),
                };
                self.mol
                    .add_bond(open.atom, current, order)
                    .map_err(|m| self.err(start, m))?;
            }
            None => {
                self.rings.insert(
                    num,
                    RingOpen {
                        atom: current,
                        order: pending,
                        position: start,
                    },
                );
            }
        }
        Ok(())
    }

    fn organic_atom(&mut self) -> Result<Atom, SmilesError> {
        let start = self.pos;
        let c = self.input[self.pos];
        let (symbol, aromatic, len) = match (c, self.peek_at(1)) {
            (b'B', Some(b'r')) => ("Br", false, 2),
            (b'C', Some(b'l')) => ("Cl", false, 2),
            (b'B', _) => ("B", false, 1),
            (b'C', _) => ("C", false, 1),
            (b'N', _) => ("N", false, 1),
            (b'O', _) => ("O", false, 1),
            (b'P', _) => ("P", false, 1),
            (b'S', _) => ("S", false, 1),
            (b'F', _) => ("F", false, 1),
            (b'I', _) => ("I", false, 1),
            (b'*', _) => ("*", false, 1),
            (b'b', _) => ("B", true, 1),
            (b'c', _) => ("C", true, 1),
            (b'n', _) => ("N", true, 1),
            (b'o', _) => ("O", true, 1),
            (b'p', _) => ("P", true, 1),
            (b's', _) => ("S", true, 1),
            _ => {
                let shown = char::from(c);
                return Err(self.err(start, format!("unexpected character '{shown}'")));
            }
        };
        self.pos += len;
        let element = element::by_symbol(symbol)
            .ok_or_else(|| self.err(start, format!("unknown element '{symbol}'")))?;
        let mut atom = Atom::new(element);
        atom.aromatic = aromatic;
        Ok(atom)
    }

    /// Digits at the cursor; values past `u32::MAX` saturate so range
    /// checks downstream reject them.
    fn read_number(&mut self) -> Option<u32> {
        let start = self.pos;
        let mut value: u32 = 0;
        while let Some(c) = self.peek().filter(|c| c.is_ascii_digit()) {
            value = value.saturating_mul(10).saturating_add(u32::from(c - b'0'));
            self.pos += 1;
        }
        (self.pos > start).then_some(value)
    }

    fn bracket_atom(&mut self) -> Result<Atom, SmilesError> {
        let open = self.pos;
        self.pos += 1;

        let isotope = match self.read_number() {
            Some(n) => Some(
                u16::try_from(n).map_err(|_| self.err(open, "isotope out of range"))?,
            ),
            None => None,
        };

        let (symbol, aromatic) = self.bracket_symbol()?;
        let element = element::by_symbol(&symbol)
            .ok_or_else(|| self.err(open + 1, format!("unknown element '{symbol}'")))?;
        if aromatic && !aromatic_capable(element.symbol) {
            return Err(self.err(open + 1, format!("element '{symbol}' cannot be aromatic")));
        }

        // Chirality: @, @@, and @TH1/@AL2/... forms.
        while self.peek() == Some(b'@') {
            self.pos += 1;
        }
        if let (Some(a), Some(b)) = (self.peek(), self.peek_at(1)) {
            if matches!(&[a, b], b"TH" | b"AL" | b"SP" | b"TB" | b"OH") {
                self.pos += 2;
                self.read_number();
            }
        }

        let mut explicit_h = 0u8;
        if self.peek() == Some(b'H') {
            self.pos += 1;
            explicit_h = match self.read_number() {
                Some(n) => u8::try_from(n).map_err(|_| self.err(open, "hydrogen count out of range"))?,
                None => 1,
            };
        }

        let mut charge: i32 = 0;
        if let Some(sign @ (b'+' | b'-')) = self.peek() {
            let unit = if sign == b'+' { 1 } else { -1 };
            self.pos += 1;
            charge = match self.read_number() {
                Some(n) => i32::try_from(n)
                    .ok()
                    .and_then(|n| n.checked_mul(unit))
                    .ok_or_else(|| self.err(open, "formal charge out of range"))?,
                None => {
                    let mut count = 1;
                    while self.peek() == Some(sign) {
                        self.pos += 1;
                        count += 1;
                    }
                    unit * count
                }
            };
            if !(-15..=15).contains(&charge) {
                return Err(self.err(open, "formal charge out of range"));
            }
        }

        let mut atom_class = None;
        if self.peek() == Some(b':') {
            self.pos += 1;
            atom_class = Some(
                self.read_number()
                    .ok_or_else(|| self.err(self.pos, "atom class must be a number"))?,
            );
        }

        if self.peek() != Some(b']') {
            return Err(self.err(open, "unterminated bracket atom"));
        }
        self.pos += 1;

        let mut atom = Atom::new(element);
        atom.aromatic = aromatic;
        atom.bracket = true;
        atom.isotope = isotope;
        atom.explicit_h = explicit_h;
        atom.charge = charge as i8;
        atom.atom_class = atom_class;
        Ok(atom)
    }

    fn bracket_symbol(&mut self) -> Result<(String, bool), SmilesError> {
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Err(self.err(start, "unterminated bracket atom"));
        };
        if c == b'*' {
            self.pos += 1;
            return Ok(("*".to_string(), false));
        }
        if c.is_ascii_uppercase() {
            if let Some(next) = self.peek_at(1).filter(|n| n.is_ascii_lowercase()) {
                let two = format!("{}{}", char::from(c), char::from(next));
                if element::by_symbol(&two).is_some() {
                    self.pos += 2;
                    return Ok((two, false));
                }
            }
            self.pos += 1;
            return Ok((char::from(c).to_string(), false));
        }
        if c.is_ascii_lowercase() {
            if let Some(next) = self.peek_at(1) {
                let two = [c, next];
                if matches!(&two, b"se" | b"as" | b"te") {
                    self.pos += 2;
                    let symbol = format!("{}{}", char::from(c.to_ascii_uppercase()), char::from(next));
                    return Ok((symbol, true));
                }
            }
            self.pos += 1;
            return Ok((char::from(c.to_ascii_uppercase()).to_string(), true));
        }
        Err(self.err(start, format!("unexpected character '{}' in bracket atom", char::from(c))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chem::molecule::BondOrder;

    #[test]
    fn test_parse_polymer_units() {
        for smiles in [
            "*CC*",
            "*CC(*)c1ccccc1",
            "*OCCO*",
            "*C(=O)c1ccc(cc1)C(=O)OCCO*",
            "[*]CC([*])C",
            "*Nc1ccc(cc1)N*",
            "*CC(F)(F)*",
            "*[Si](C)(C)O*",
            "*c1ccc(s1)*",
            "*C/C=C/C*",
            "*CC%10CCCCC%10*",
        ] {
            let mol = parse(smiles).unwrap_or_else(|e| panic!("{smiles}: {e}"));
            assert_eq!(mol.connection_points().len(), 2, "{smiles}");
        }
    }

    #[test]
    fn test_bracket_atom_fields() {
        let mol = parse("*[13CH2][N+](C)(C)C*").unwrap();
        let c = &mol.atoms()[1];
        assert_eq!(c.isotope, Some(13));
        assert_eq!(c.hydrogens, 2);
        let n = &mol.atoms()[2];
        assert_eq!(n.charge, 1);
        assert_eq!(n.hydrogens, 0);
    }

    #[test]
    fn test_ring_closure_bond_orders() {
        let mol = parse("*C1=CCCC1*").unwrap();
        assert_eq!(mol.ring_count(), 1);
        let bond = mol.bond_between(1, 2).unwrap();
        assert_eq!(mol.bonds()[bond].order, BondOrder::Double);

        assert!(parse("*C=1CCCC#1*").is_err());
    }

    #[test]
    fn test_oversized_bracket_numbers_are_rejected() {
        for smiles in [
            "*[C-2147483648]*",
            "*[N+4294967295]*",
            "*[N+99999999999999999999]*",
            "*[CH300]*",
            "*[N+16]*",
        ] {
            let err = parse(smiles).unwrap_err();
            assert!(matches!(err, SmilesError::Syntax { .. }), "{smiles}");
        }
    }

    #[test]
    fn test_syntax_errors_report_position() {
        let err = parse("not-a-structure").unwrap_err();
        assert!(matches!(err, SmilesError::Syntax { .. }));

        let err = parse("*CC(C*").unwrap_err();
        assert!(err.to_string().contains("unclosed branch"));

        let err = parse("*C1CC*").unwrap_err();
        assert!(err.to_string().contains("unclosed ring 1"));

        let err = parse("*CC[Xx]*").unwrap_err();
        assert!(err.to_string().contains("unknown element"));

        assert!(parse("*C11*").is_err());
        assert!(parse("*C()C*").is_err());
        assert!(parse("*C==C*").is_err());
    }
}
