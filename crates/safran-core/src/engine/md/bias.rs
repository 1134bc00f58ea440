//! RMSD metadynamics.
//!
//! A growing pool of deposited reference structures defines the bias
//!   V(x) = k · Σ_k w_k · exp(−α · RMSD(x, s_k)²)
//! whose gradient is chained through ∂RMSD/∂x from the alignment driver.
//! Deposited structures are partitioned round-robin over worker slots; each
//! step the workers evaluate their partial energy and gradient in parallel
//! and the driver sums them. Only the main thread ever appends a structure,
//! and only between steps.

use super::config::MtdSettings;
use crate::core::constants::{bohr_to_angstrom, KB_HARTREE};
use crate::core::io::xyz::append_frame;
use crate::core::models::{Element, Molecule};
use crate::engine::align::{ReorderMethod, RmsdConfig, RmsdDriver};
use crate::engine::error::EngineError;
use nalgebra::{Point3, Vector3};
use std::path::PathBuf;
use tracing::{debug, info};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// One deposited reference structure.
#[derive(Debug, Clone)]
pub struct BiasStructure {
    /// Snapshot of the biased atom subset, Å.
    pub geometry: Vec<Point3<f64>>,
    /// RMSD to the first deposited structure at deposition time.
    pub rmsd_reference: f64,
    /// Accumulated deposited bias energy (well-tempering accumulator).
    pub energy: f64,
    /// Current weight w_k.
    pub factor: f64,
    /// Visit counter.
    pub counter: u64,
    /// Step index at deposition.
    pub step_deposited: usize,
    /// Global structure index across all worker slots.
    pub index: usize,
}

/// Partial result of one worker slot for one step.
#[derive(Debug, Clone, Default)]
struct SlotResult {
    energy: f64,
    gradient: Vec<Vector3<f64>>,
    counter: u64,
    rmsd_first: Option<f64>,
}

/// One worker slot owning a disjoint subset of the deposited structures.
#[derive(Debug, Clone, Default)]
struct BiasSlot {
    structures: Vec<BiasStructure>,
}

impl BiasSlot {
    /// Evaluates this slot's bias terms against the current subset
    /// geometry. Mutates only this slot's own structures (counters,
    /// weights, accumulators).
    fn evaluate(
        &mut self,
        elements: &[Element],
        current: &[Point3<f64>],
        settings: &MtdSettings,
        pool_size: usize,
    ) -> Result<SlotResult, EngineError> {
        let mut result = SlotResult {
            gradient: vec![Vector3::zeros(); current.len()],
            ..SlotResult::default()
        };
        if self.structures.is_empty() {
            return Ok(result);
        }

        let current_mol = Molecule::new(elements.to_vec(), current.to_vec());
        let rmsd_config = RmsdConfig {
            method: ReorderMethod::None,
            ..RmsdConfig::default()
        };

        for structure in &mut self.structures {
            let reference = Molecule::new(elements.to_vec(), structure.geometry.clone());
            let driver = RmsdDriver::new(&reference, &current_mol, rmsd_config.clone());
            let rmsd = driver.best_fit_rmsd()?;
            let expr = (-rmsd * rmsd * settings.alpha_rmsd).exp();

            if structure.index == 0 {
                result.rmsd_first = Some(rmsd);
            }

            // weight evolution: plain counting or well-tempered decay
            if settings.wtmtd {
                structure.factor +=
                    (-structure.energy / (KB_HARTREE * settings.delta_t)).exp();
            } else {
                structure.factor = structure.counter as f64;
            }

            // a walker sitting on this structure counts as a visit
            if expr * settings.econv > pool_size as f64 {
                structure.counter += 1;
                structure.energy += expr * settings.k_rmsd;
            }

            let term_energy = settings.k_rmsd * structure.factor * expr;
            result.energy += term_energy;
            result.counter += structure.counter;

            let de_drmsd = -2.0
                * settings.alpha_rmsd
                * settings.k_rmsd
                * expr
                * structure.factor
                / current.len().max(1) as f64;
            for (g, d) in result.gradient.iter_mut().zip(driver.gradient()?) {
                *g += d * de_drmsd;
            }
        }
        Ok(result)
    }
}

/// Outcome of one bias evaluation step.
#[derive(Debug, Clone)]
pub struct BiasStep {
    pub energy: f64,
    /// RMSD to the first deposited structure, the reaction-coordinate
    /// readout.
    pub rmsd_reference: f64,
    pub total_visits: u64,
}

pub struct RmsdBias {
    settings: MtdSettings,
    /// Biased atom indices into the full system.
    indices: Vec<usize>,
    elements: Vec<Element>,
    slots: Vec<BiasSlot>,
    structure_count: usize,
    trajectory: Option<PathBuf>,
}

impl RmsdBias {
    pub fn new(
        settings: MtdSettings,
        system_elements: &[Element],
        trajectory: Option<PathBuf>,
    ) -> Result<RmsdBias, EngineError> {
        let indices: Vec<usize> = match &settings.atoms {
            Some(selected) => {
                for &i in selected {
                    if i >= system_elements.len() {
                        return Err(EngineError::Config(format!(
                            "biased atom index {} is out of range",
                            i
                        )));
                    }
                }
                selected.clone()
            }
            None => (0..system_elements.len()).collect(),
        };
        let elements = indices.iter().map(|&i| system_elements[i]).collect();
        let workers = settings.workers.max(1);
        Ok(RmsdBias {
            settings,
            indices,
            elements,
            slots: vec![BiasSlot::default(); workers],
            structure_count: 0,
            trajectory,
        })
    }

    pub fn structure_count(&self) -> usize {
        self.structure_count
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Gathers the biased subset (Å) from the full position set (Bohr).
    fn subset(&self, positions: &[Vector3<f64>]) -> Vec<Point3<f64>> {
        self.indices
            .iter()
            .map(|&i| {
                Point3::new(
                    bohr_to_angstrom(positions[i].x),
                    bohr_to_angstrom(positions[i].y),
                    bohr_to_angstrom(positions[i].z),
                )
            })
            .collect()
    }

    /// Evaluates the bias and scatters its gradient into the full-system
    /// gradient (Hartree/Bohr) at the biased indices.
    pub fn apply(
        &mut self,
        positions: &[Vector3<f64>],
        gradient: &mut [Vector3<f64>],
    ) -> Result<BiasStep, EngineError> {
        let current = self.subset(positions);
        let pool_size = self.structure_count;
        let settings = &self.settings;
        let elements = &self.elements;

        let results: Vec<Result<SlotResult, EngineError>> = {
            #[cfg(feature = "parallel")]
            let iter = self.slots.par_iter_mut();
            #[cfg(not(feature = "parallel"))]
            let iter = self.slots.iter_mut();
            iter.map(|slot| slot.evaluate(elements, &current, settings, pool_size))
                .collect()
        };

        let mut step = BiasStep {
            energy: 0.0,
            rmsd_reference: 0.0,
            total_visits: 0,
        };
        // ∂RMSD is in 1/Å; the full-system gradient is Hartree/Bohr
        let to_bohr = bohr_to_angstrom(1.0);
        for result in results {
            let result = result?;
            step.energy += result.energy;
            step.total_visits += result.counter;
            if let Some(rmsd) = result.rmsd_first {
                step.rmsd_reference = rmsd;
            }
            for (&system_index, d) in self.indices.iter().zip(result.gradient.iter()) {
                gradient[system_index] += d * to_bohr;
            }
        }
        Ok(step)
    }

    /// Deposits the current geometry, unless the pool is frozen, full, or
    /// the bias has not relaxed yet: a structure is only added while
    /// `current_bias · econv < structure_count` (the landscape around a
    /// well-visited walker is already filled).
    pub fn maybe_deposit(
        &mut self,
        positions: &[Vector3<f64>],
        current_bias: f64,
        rmsd_reference: f64,
        step: usize,
    ) -> Result<bool, EngineError> {
        if self.settings.fix_structures && self.structure_count > 0 {
            return Ok(false);
        }
        if self.structure_count >= self.settings.max_structures {
            return Ok(false);
        }
        if self.structure_count > 0
            && current_bias * self.settings.econv >= self.structure_count as f64
        {
            debug!(current_bias, "bias saturated, deposition skipped");
            return Ok(false);
        }
        self.deposit(self.subset(positions), rmsd_reference, step)?;
        Ok(true)
    }

    /// Seeds the pool with an external reference structure before the run.
    pub fn seed(&mut self, geometry: &Molecule) -> Result<(), EngineError> {
        if geometry.atom_count() != self.indices.len() {
            return Err(EngineError::Config(format!(
                "bias reference has {} atoms, the biased subset {}",
                geometry.atom_count(),
                self.indices.len()
            )));
        }
        self.deposit(geometry.positions().to_vec(), 0.0, 0)
    }

    fn deposit(
        &mut self,
        geometry: Vec<Point3<f64>>,
        rmsd_reference: f64,
        step: usize,
    ) -> Result<(), EngineError> {
        let index = self.structure_count;
        let slot = index % self.slots.len();
        self.slots[slot].structures.push(BiasStructure {
            geometry: geometry.clone(),
            rmsd_reference,
            energy: 0.0,
            factor: 1.0,
            counter: 1,
            step_deposited: step,
            index,
        });
        self.structure_count += 1;
        info!(
            index,
            slot, step, "metadynamics structure deposited"
        );
        if let Some(path) = &self.trajectory {
            let mut snapshot = Molecule::new(self.elements.clone(), geometry)
                .with_name(format!("{} {:.6}", index, rmsd_reference));
            snapshot.set_energy(0.0);
            append_frame(path, &snapshot)?;
        }
        Ok(())
    }

    /// Flattened view of every deposited structure, ordered by global
    /// index, for the restart record.
    pub fn structures(&self) -> Vec<&BiasStructure> {
        let mut all: Vec<&BiasStructure> = self
            .slots
            .iter()
            .flat_map(|slot| slot.structures.iter())
            .collect();
        all.sort_by_key(|s| s.index);
        all
    }

    /// Restores a deposited pool from restart data, preserving the
    /// round-robin slot assignment.
    pub fn restore(&mut self, structures: Vec<BiasStructure>) {
        for slot in &mut self.slots {
            slot.structures.clear();
        }
        self.structure_count = 0;
        let mut ordered = structures;
        ordered.sort_by_key(|s| s.index);
        for mut structure in ordered {
            structure.index = self.structure_count;
            let slot = structure.index % self.slots.len();
            self.slots[slot].structures.push(structure);
            self.structure_count += 1;
        }
    }
}
