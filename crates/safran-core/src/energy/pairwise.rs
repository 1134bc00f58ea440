//! Simple pairwise reference models.
//!
//! These are not force fields; they exist so the MD engine can be exercised
//! end-to-end (tests, demos) without an external electronic-structure
//! backend. [`LennardJonesModel`] treats every atom pair with one 12-6 well;
//! [`HarmonicBondModel`] adds harmonic springs on the initial bond topology,
//! which is enough to keep small molecules intact at low temperature.

use super::EnergyModel;
use crate::core::models::Molecule;
use nalgebra::{DMatrix, Vector3};

/// Lennard-Jones 12-6 over all atom pairs with a single (ε, r_min) pair.
///
/// Defaults approximate argon in atomic units.
pub struct LennardJonesModel {
    /// Well depth, Hartree.
    pub well_depth: f64,
    /// Position of the minimum, Bohr.
    pub r_min: f64,
    positions: Vec<Vector3<f64>>,
    gradient: Vec<Vector3<f64>>,
    nan_seen: bool,
}

impl LennardJonesModel {
    pub fn argon() -> LennardJonesModel {
        LennardJonesModel {
            // ε = 120 K · k_B, r_min = 3.82 Å for Ar–Ar
            well_depth: 120.0 * crate::core::constants::KB_HARTREE,
            r_min: 3.82 * crate::core::constants::BOHR_PER_ANGSTROM,
            positions: Vec::new(),
            gradient: Vec::new(),
            nan_seen: false,
        }
    }

    pub fn new(well_depth: f64, r_min: f64) -> LennardJonesModel {
        LennardJonesModel {
            well_depth,
            r_min,
            positions: Vec::new(),
            gradient: Vec::new(),
            nan_seen: false,
        }
    }
}

impl EnergyModel for LennardJonesModel {
    fn set_molecule(&mut self, molecule: &Molecule) {
        self.positions = molecule
            .positions()
            .iter()
            .map(|p| p.coords * crate::core::constants::BOHR_PER_ANGSTROM)
            .collect();
        self.gradient = vec![Vector3::zeros(); self.positions.len()];
    }

    fn update_geometry(&mut self, positions: &[Vector3<f64>]) {
        self.positions.clear();
        self.positions.extend_from_slice(positions);
    }

    fn calculate(&mut self, with_gradient: bool) -> f64 {
        let n = self.positions.len();
        if with_gradient {
            self.gradient = vec![Vector3::zeros(); n];
        }
        let mut energy = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                let rij = self.positions[i] - self.positions[j];
                let dist = rij.norm();
                if dist < 1e-6 {
                    self.nan_seen = true;
                    continue;
                }
                let rho = self.r_min / dist;
                let rho6 = rho.powi(6);
                let rho12 = rho6 * rho6;
                energy += self.well_depth * (rho12 - 2.0 * rho6);
                if with_gradient {
                    // dV/dr = 12 ε (ρ⁶ − ρ¹²) / r
                    let dv_dr = 12.0 * self.well_depth * (rho6 - rho12) / dist;
                    let g = rij * (dv_dr / dist);
                    self.gradient[i] += g;
                    self.gradient[j] -= g;
                }
            }
        }
        self.nan_seen |= energy.is_nan();
        energy
    }

    fn gradient(&self) -> &[Vector3<f64>] {
        &self.gradient
    }

    fn has_nan(&self) -> bool {
        self.nan_seen || self.gradient.iter().any(|g| g.iter().any(|x| x.is_nan()))
    }
}

/// Harmonic springs on the bond topology captured at `set_molecule` time,
/// plus a soft repulsion between non-bonded pairs.
pub struct HarmonicBondModel {
    /// Spring constant, Hartree/Bohr².
    pub force_constant: f64,
    bonds: Vec<(usize, usize, f64)>,
    positions: Vec<Vector3<f64>>,
    gradient: Vec<Vector3<f64>>,
    nan_seen: bool,
}

impl HarmonicBondModel {
    pub fn new(force_constant: f64) -> HarmonicBondModel {
        HarmonicBondModel {
            force_constant,
            bonds: Vec::new(),
            positions: Vec::new(),
            gradient: Vec::new(),
            nan_seen: false,
        }
    }

    fn capture_bonds(&mut self, topology: &DMatrix<bool>) {
        self.bonds.clear();
        let n = topology.nrows();
        for i in 0..n {
            for j in (i + 1)..n {
                if topology[(i, j)] {
                    let r0 = (self.positions[i] - self.positions[j]).norm();
                    self.bonds.push((i, j, r0));
                }
            }
        }
    }
}

impl EnergyModel for HarmonicBondModel {
    fn set_molecule(&mut self, molecule: &Molecule) {
        self.positions = molecule
            .positions()
            .iter()
            .map(|p| p.coords * crate::core::constants::BOHR_PER_ANGSTROM)
            .collect();
        self.gradient = vec![Vector3::zeros(); self.positions.len()];
        let topology = crate::core::geometry::bond_topology(
            molecule.elements(),
            molecule.positions(),
            crate::core::geometry::BOND_SCALING,
        );
        self.capture_bonds(&topology);
    }

    fn update_geometry(&mut self, positions: &[Vector3<f64>]) {
        self.positions.clear();
        self.positions.extend_from_slice(positions);
    }

    fn calculate(&mut self, with_gradient: bool) -> f64 {
        if with_gradient {
            self.gradient = vec![Vector3::zeros(); self.positions.len()];
        }
        let mut energy = 0.0;
        for &(i, j, r0) in &self.bonds {
            let rij = self.positions[i] - self.positions[j];
            let dist = rij.norm();
            if dist < 1e-6 {
                self.nan_seen = true;
                continue;
            }
            let dr = dist - r0;
            energy += 0.5 * self.force_constant * dr * dr;
            if with_gradient {
                let g = rij * (self.force_constant * dr / dist);
                self.gradient[i] += g;
                self.gradient[j] -= g;
            }
        }
        self.nan_seen |= energy.is_nan();
        energy
    }

    fn gradient(&self) -> &[Vector3<f64>] {
        &self.gradient
    }

    fn has_nan(&self) -> bool {
        self.nan_seen || self.gradient.iter().any(|g| g.iter().any(|x| x.is_nan()))
    }
}
