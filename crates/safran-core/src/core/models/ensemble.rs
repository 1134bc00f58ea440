//! Ensemble storage for the conformer scanner.
//!
//! One arena owns every molecule of a scan; the scanner's working sets
//! (`accepted`, `rejected`, `threshold`) hold indices into it. A molecule is
//! in exactly one classification set at a time.

use super::molecule::Molecule;

/// Index of a molecule inside an [`EnsembleArena`].
pub type MoleculeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Pending,
    Accepted,
    Rejected,
    /// Rejected directly by the tight descriptor thresholds, without any
    /// alignment.
    Threshold,
}

#[derive(Debug, Default)]
pub struct EnsembleArena {
    molecules: Vec<Molecule>,
    classification: Vec<Classification>,
    /// Ids sorted ascending by energy; the scanner's iteration order.
    energy_order: Vec<MoleculeId>,
}

impl EnsembleArena {
    pub fn new() -> EnsembleArena {
        EnsembleArena::default()
    }

    pub fn push(&mut self, molecule: Molecule) -> MoleculeId {
        self.molecules.push(molecule);
        self.classification.push(Classification::Pending);
        self.molecules.len() - 1
    }

    pub fn len(&self) -> usize {
        self.molecules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.molecules.is_empty()
    }

    pub fn get(&self, id: MoleculeId) -> &Molecule {
        &self.molecules[id]
    }

    pub fn get_mut(&mut self, id: MoleculeId) -> &mut Molecule {
        &mut self.molecules[id]
    }

    pub fn classification(&self, id: MoleculeId) -> Classification {
        self.classification[id]
    }

    pub fn classify(&mut self, id: MoleculeId, class: Classification) {
        self.classification[id] = class;
    }

    /// Recomputes the energy ordering; molecules without an energy sort
    /// last, ties keep load order. Call once after loading.
    pub fn sort_by_energy(&mut self) {
        let mut order: Vec<MoleculeId> = (0..self.molecules.len()).collect();
        order.sort_by(|&a, &b| {
            let ea = self.molecules[a].energy().unwrap_or(f64::INFINITY);
            let eb = self.molecules[b].energy().unwrap_or(f64::INFINITY);
            ea.partial_cmp(&eb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        self.energy_order = order;
    }

    pub fn energy_order(&self) -> &[MoleculeId] {
        &self.energy_order
    }

    pub fn lowest_energy(&self) -> Option<f64> {
        self.energy_order
            .first()
            .and_then(|&id| self.molecules[id].energy())
    }

    pub fn ids_with(&self, class: Classification) -> Vec<MoleculeId> {
        self.energy_order
            .iter()
            .copied()
            .filter(|&id| self.classification[id] == class)
            .collect()
    }

    /// Resets every classification to `Pending`, keeping the molecules and
    /// their energy ordering. Used between scanner passes that re-walk the
    /// full ensemble.
    pub fn reset_classification(&mut self) {
        for class in &mut self.classification {
            *class = Classification::Pending;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::element::Element;
    use nalgebra::Point3;

    fn atom(energy: f64) -> Molecule {
        let mut m = Molecule::new(vec![Element::HYDROGEN], vec![Point3::origin()]);
        m.set_energy(energy);
        m
    }

    #[test]
    fn energy_order_is_ascending() {
        let mut arena = EnsembleArena::new();
        arena.push(atom(3.0));
        arena.push(atom(1.0));
        arena.push(atom(2.0));
        arena.sort_by_energy();
        assert_eq!(arena.energy_order(), &[1, 2, 0]);
        assert_eq!(arena.lowest_energy(), Some(1.0));
    }

    #[test]
    fn equal_energies_keep_load_order() {
        let mut arena = EnsembleArena::new();
        arena.push(atom(1.0));
        arena.push(atom(1.0));
        arena.sort_by_energy();
        assert_eq!(arena.energy_order(), &[0, 1]);
    }

    #[test]
    fn classification_sets_are_disjoint_views() {
        let mut arena = EnsembleArena::new();
        let a = arena.push(atom(1.0));
        let b = arena.push(atom(2.0));
        arena.sort_by_energy();
        arena.classify(a, Classification::Accepted);
        arena.classify(b, Classification::Rejected);
        assert_eq!(arena.ids_with(Classification::Accepted), vec![a]);
        assert_eq!(arena.ids_with(Classification::Rejected), vec![b]);
        assert!(arena.ids_with(Classification::Threshold).is_empty());
    }

    #[test]
    fn reset_returns_everything_to_pending() {
        let mut arena = EnsembleArena::new();
        let a = arena.push(atom(1.0));
        arena.sort_by_energy();
        arena.classify(a, Classification::Accepted);
        arena.reset_classification();
        assert_eq!(arena.classification(a), Classification::Pending);
    }
}
