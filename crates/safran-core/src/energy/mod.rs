//! The energy-backend seam.
//!
//! Quantum-chemical energy models live outside this crate; the MD engine
//! talks to them exclusively through [`EnergyModel`]. The trait mirrors the
//! calculator contract of the upstream tooling: hand over the molecule once,
//! push geometry updates, pull energy/gradient, and poll the error flags
//! after every evaluation. A model is a scoped resource — construct it, use
//! it, drop it; nothing here shares backend state behind the caller's back.

pub mod pairwise;

use crate::core::models::Molecule;
use nalgebra::Vector3;

pub use pairwise::{HarmonicBondModel, LennardJonesModel};

/// Contract for an energy/gradient backend.
///
/// Geometry is exchanged in Bohr, energies in Hartree, gradients in
/// Hartree/Bohr. Implementations cache whatever they need from
/// [`set_molecule`](EnergyModel::set_molecule); between calls only the
/// coordinates change.
pub trait EnergyModel: Send {
    /// Installs atom identities and the initial geometry.
    fn set_molecule(&mut self, molecule: &Molecule);

    /// Pushes new coordinates (Bohr) without re-deriving topology.
    fn update_geometry(&mut self, positions: &[Vector3<f64>]);

    /// Evaluates the energy (Hartree); when `with_gradient` is set the
    /// gradient becomes available through [`gradient`](EnergyModel::gradient).
    fn calculate(&mut self, with_gradient: bool) -> f64;

    /// Gradient of the last [`calculate`](EnergyModel::calculate) call,
    /// Hartree/Bohr.
    fn gradient(&self) -> &[Vector3<f64>];

    /// Dipole moment, only meaningful for backends that compute one.
    fn dipole(&self) -> Option<Vector3<f64>> {
        None
    }

    /// Partial charges, when the backend provides them.
    fn charges(&self) -> Option<Vec<f64>> {
        None
    }

    /// Whether the last evaluation signalled an internal error.
    fn had_error(&self) -> bool {
        false
    }

    /// Whether the last evaluation produced a NaN energy or gradient.
    fn has_nan(&self) -> bool;
}
