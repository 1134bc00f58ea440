//! The molecule model.
//!
//! A molecule is an ordered list of atoms with an immutable element sequence
//! and replaceable Cartesian positions. Derived quantities (rotational
//! constants, persistence image, bond topology, fragments) are cached and
//! invalidated atomically whenever the geometry is replaced — callers never
//! observe a half-updated molecule.

use super::element::Element;
use super::permutation::Permutation;
use crate::core::descriptors;
use crate::core::geometry::{self, BOND_SCALING};
use nalgebra::{DMatrix, Point3, Vector3};

#[derive(Debug, Clone, Default)]
struct DerivedCache {
    rotational_constants: Option<[f64; 3]>,
    persistence_image: Option<DMatrix<f64>>,
    topology: Option<DMatrix<bool>>,
    fragments: Option<Vec<Vec<usize>>>,
}

#[derive(Debug, Clone)]
pub struct Molecule {
    name: String,
    elements: Vec<Element>,
    positions: Vec<Point3<f64>>,
    energy: Option<f64>,
    cache: DerivedCache,
}

impl Molecule {
    pub fn new(elements: Vec<Element>, positions: Vec<Point3<f64>>) -> Molecule {
        debug_assert_eq!(elements.len(), positions.len());
        Molecule {
            name: String::new(),
            elements,
            positions,
            energy: None,
            cache: DerivedCache::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Molecule {
        self.name = name.into();
        self
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn atom_count(&self) -> usize {
        self.elements.len()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    pub fn energy(&self) -> Option<f64> {
        self.energy
    }

    pub fn set_energy(&mut self, energy: f64) {
        self.energy = Some(energy);
    }

    /// Replaces the geometry atomically; every cached derived quantity is
    /// dropped in the same call.
    pub fn set_positions(&mut self, positions: Vec<Point3<f64>>) {
        debug_assert_eq!(positions.len(), self.elements.len());
        self.positions = positions;
        self.cache = DerivedCache::default();
    }

    /// Translates the structure so its (plain or mass-weighted) centroid is
    /// at the origin.
    pub fn center(&mut self, mass_weighted: bool) {
        let c = if mass_weighted {
            let masses: Vec<f64> = self.elements.iter().map(|e| e.mass()).collect();
            geometry::mass_centroid(&self.positions, &masses)
        } else {
            geometry::centroid(&self.positions)
        };
        let shifted = self
            .positions
            .iter()
            .map(|p| Point3::from(p - c.coords))
            .collect();
        self.set_positions(shifted);
    }

    /// Whether this molecule has the same atom count and element multiset as
    /// another (the precondition of any RMSD comparison).
    pub fn is_comparable_to(&self, other: &Molecule) -> bool {
        if self.atom_count() != other.atom_count() {
            return false;
        }
        let mut a: Vec<u8> = self.elements.iter().map(|e| e.0).collect();
        let mut b: Vec<u8> = other.elements.iter().map(|e| e.0).collect();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    }

    /// Returns a reordered copy; `perm[j]` becomes atom `j`.
    pub fn reordered(&self, perm: &Permutation) -> Molecule {
        let mut out = Molecule::new(perm.apply(&self.elements), perm.apply(&self.positions));
        out.name = self.name.clone();
        out.energy = self.energy;
        out
    }

    /// Restriction to an atom subset, preserving subset order.
    pub fn subset(&self, indices: &[usize]) -> Molecule {
        let elements = indices.iter().map(|&i| self.elements[i]).collect();
        let positions = indices.iter().map(|&i| self.positions[i]).collect();
        let mut out = Molecule::new(elements, positions);
        out.name = self.name.clone();
        out.energy = self.energy;
        out
    }

    pub fn rotational_constants(&mut self) -> [f64; 3] {
        if self.cache.rotational_constants.is_none() {
            self.cache.rotational_constants = Some(descriptors::rotational_constants(
                &self.elements,
                &self.positions,
            ));
        }
        self.cache.rotational_constants.unwrap()
    }

    pub fn cached_rotational_constants(&self) -> Option<[f64; 3]> {
        self.cache.rotational_constants
    }

    pub fn persistence_image(&mut self) -> &DMatrix<f64> {
        if self.cache.persistence_image.is_none() {
            let lower = geometry::lower_distance_vector(&self.positions);
            self.cache.persistence_image = Some(descriptors::persistence_image(&lower));
        }
        self.cache.persistence_image.as_ref().unwrap()
    }

    pub fn cached_persistence_image(&self) -> Option<&DMatrix<f64>> {
        self.cache.persistence_image.as_ref()
    }

    pub fn topology(&mut self) -> &DMatrix<bool> {
        if self.cache.topology.is_none() {
            self.cache.topology = Some(geometry::bond_topology(
                &self.elements,
                &self.positions,
                BOND_SCALING,
            ));
        }
        self.cache.topology.as_ref().unwrap()
    }

    pub fn fragments(&mut self) -> &[Vec<usize>] {
        if self.cache.fragments.is_none() {
            let topo = self.topology().clone();
            self.cache.fragments = Some(geometry::fragments(&topo));
        }
        self.cache.fragments.as_ref().unwrap()
    }

    /// Center-of-mass of one fragment.
    pub fn fragment_centroid(&mut self, fragment: usize, mass_weighted: bool) -> Point3<f64> {
        let indices = self.fragments()[fragment].clone();
        let positions: Vec<Point3<f64>> = indices.iter().map(|&i| self.positions[i]).collect();
        if mass_weighted {
            let masses: Vec<f64> = indices.iter().map(|&i| self.elements[i].mass()).collect();
            geometry::mass_centroid(&positions, &masses)
        } else {
            geometry::centroid(&positions)
        }
    }

    /// Fills every derived-descriptor cache in one go. The scanner calls
    /// this on load so parallel comparison phases only ever read.
    pub fn compute_descriptors(&mut self, rotational: bool, image: bool) {
        if rotational {
            self.rotational_constants();
        }
        if image {
            self.persistence_image();
        }
        self.topology();
        self.fragments();
    }

    pub fn translate(&mut self, shift: Vector3<f64>) {
        let shifted = self
            .positions
            .iter()
            .map(|p| Point3::from(p.coords + shift))
            .collect();
        self.set_positions(shifted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water() -> Molecule {
        Molecule::new(
            vec![Element::OXYGEN, Element::HYDROGEN, Element::HYDROGEN],
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(0.9572, 0.0, 0.0),
                Point3::new(-0.24, 0.9266, 0.0),
            ],
        )
    }

    #[test]
    fn set_positions_drops_every_cached_descriptor() {
        let mut mol = water();
        mol.compute_descriptors(true, true);
        assert!(mol.cached_rotational_constants().is_some());

        let moved: Vec<Point3<f64>> = mol
            .positions()
            .iter()
            .map(|p| p + Vector3::new(0.0, 0.0, 2.0))
            .collect();
        mol.set_positions(moved);
        assert!(mol.cached_rotational_constants().is_none());
        assert!(mol.cached_persistence_image().is_none());
    }

    #[test]
    fn comparable_ignores_atom_order() {
        let a = water();
        let b = Molecule::new(
            vec![Element::HYDROGEN, Element::OXYGEN, Element::HYDROGEN],
            vec![
                Point3::new(0.9572, 0.0, 0.0),
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(-0.24, 0.9266, 0.0),
            ],
        );
        assert!(a.is_comparable_to(&b));
    }

    #[test]
    fn comparable_rejects_different_composition() {
        let a = water();
        let b = Molecule::new(
            vec![Element::CARBON, Element::HYDROGEN, Element::HYDROGEN],
            water().positions().to_vec(),
        );
        assert!(!a.is_comparable_to(&b));
    }

    #[test]
    fn reordered_moves_elements_with_positions() {
        let mol = water();
        let perm = Permutation::new(vec![1, 0, 2]).unwrap();
        let swapped = mol.reordered(&perm);
        assert_eq!(swapped.elements()[0], Element::HYDROGEN);
        assert_eq!(swapped.elements()[1], Element::OXYGEN);
        assert_eq!(swapped.positions()[1], Point3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn center_moves_centroid_to_origin() {
        let mut mol = water();
        mol.center(false);
        let c = crate::core::geometry::centroid(mol.positions());
        assert!(c.coords.norm() < 1e-12);
    }

    #[test]
    fn water_is_a_single_fragment() {
        let mut mol = water();
        assert_eq!(mol.fragments().len(), 1);
    }
}
