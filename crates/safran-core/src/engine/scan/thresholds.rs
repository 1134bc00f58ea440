//! Descriptor deltas and threshold calibration.
//!
//! During the initial pass every compared pair contributes a sample
//! (RMSD → ΔE, ΔH, ΔI). When no RMSD threshold τ was given, τ becomes the
//! smallest best-fit RMSD seen; the loose-threshold magnitudes are the
//! largest descriptor deltas among samples below the calibration cutoff,
//! and the tight magnitudes the largest among samples below the (much
//! smaller) tight fractions of τ. τ is frozen before the reorder pass
//! begins.

use super::config::DescriptorMask;
use crate::core::constants::HARTREE_TO_KJMOL;
use crate::core::descriptors;
use crate::core::models::Molecule;

/// The three cheap deltas between a candidate and a reference:
/// energy (kJ/mol), persistence image (absolute sum), rotational constants
/// (MHz, averaged over the three axes).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorDeltas {
    pub energy: f64,
    pub image: f64,
    pub rotational: f64,
}

impl DescriptorDeltas {
    /// Both molecules must have their descriptor caches filled; the scanner
    /// guarantees that before any parallel phase.
    pub fn between(a: &Molecule, b: &Molecule) -> DescriptorDeltas {
        let energy = (a.energy().unwrap_or(0.0) - b.energy().unwrap_or(0.0)).abs()
            * HARTREE_TO_KJMOL;
        let rotational = match (a.cached_rotational_constants(), b.cached_rotational_constants())
        {
            (Some(ra), Some(rb)) => {
                ((ra[0] - rb[0]).abs() + (ra[1] - rb[1]).abs() + (ra[2] - rb[2]).abs()) / 3.0
            }
            _ => 0.0,
        };
        let image = match (a.cached_persistence_image(), b.cached_persistence_image()) {
            (Some(ia), Some(ib)) => descriptors::image_difference(ia, ib),
            _ => 0.0,
        };
        DescriptorDeltas {
            energy,
            image,
            rotational,
        }
    }

    /// The bits of this sample below the given limits.
    pub fn mask_below(&self, limits: &ThresholdTriple) -> DescriptorMask {
        let mut mask = DescriptorMask::empty();
        if self.rotational < limits.rotational {
            mask |= DescriptorMask::ROTATIONAL;
        }
        if self.image < limits.image {
            mask |= DescriptorMask::IMAGE;
        }
        if self.energy < limits.energy {
            mask |= DescriptorMask::ENERGY;
        }
        mask
    }
}

/// One (energy, image, rotational) threshold set.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ThresholdTriple {
    pub energy: f64,
    pub image: f64,
    pub rotational: f64,
}

impl ThresholdTriple {
    pub fn scaled(&self, energy: f64, image: f64, rotational: f64) -> ThresholdTriple {
        ThresholdTriple {
            energy: self.energy * energy,
            image: self.image * image,
            rotational: self.rotational * rotational,
        }
    }

    /// Whether all three limits are effectively disabled; the pair filter
    /// then compares every pair (the reuse pass runs this way).
    pub fn is_disabled(&self) -> bool {
        self.energy <= 1e-8 && self.image <= 1e-8 && self.rotational <= 1e-8
    }

    fn absorb(&mut self, deltas: &DescriptorDeltas) {
        self.energy = self.energy.max(deltas.energy);
        self.image = self.image.max(deltas.image);
        self.rotational = self.rotational.max(deltas.rotational);
    }
}

/// Threshold state of a scan run.
#[derive(Debug, Clone)]
pub struct ThresholdModel {
    tau: f64,
    tau_fixed: bool,
    pub loose: ThresholdTriple,
    pub tight: ThresholdTriple,
    samples: Vec<(f64, DescriptorDeltas)>,
}

impl ThresholdModel {
    pub fn new(rmsd_threshold: Option<f64>) -> ThresholdModel {
        match rmsd_threshold {
            Some(tau) if tau > 0.0 => ThresholdModel {
                tau,
                tau_fixed: true,
                loose: ThresholdTriple::default(),
                tight: ThresholdTriple::default(),
                samples: Vec::new(),
            },
            _ => ThresholdModel {
                tau: 1e5,
                tau_fixed: false,
                loose: ThresholdTriple::default(),
                tight: ThresholdTriple::default(),
                samples: Vec::new(),
            },
        }
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn tau_is_fixed(&self) -> bool {
        self.tau_fixed
    }

    /// Records one pass-1 sample and, while calibrating, shrinks τ towards
    /// the smallest observed RMSD.
    pub fn record_sample(&mut self, rmsd: f64, deltas: DescriptorDeltas) {
        self.samples.push((rmsd, deltas));
        if !self.tau_fixed {
            self.tau = self.tau.min(rmsd);
        }
    }

    /// Updates the tight magnitudes with a sample, per descriptor: a delta
    /// contributes only when its pair's RMSD is below the tight fraction of
    /// τ. Only meaningful once τ is known.
    pub fn absorb_tight(&mut self, rmsd: f64, deltas: &DescriptorDeltas, ste: f64, sti: f64, sth: f64) {
        if rmsd <= ste * self.tau {
            self.tight.energy = self.tight.energy.max(deltas.energy);
        }
        if rmsd <= sti * self.tau {
            self.tight.rotational = self.tight.rotational.max(deltas.rotational);
        }
        if rmsd <= sth * self.tau {
            self.tight.image = self.tight.image.max(deltas.image);
        }
    }

    /// Finishes pass-1 calibration: freezes τ and derives the loose
    /// magnitudes from every sample below the calibration cutoff.
    pub fn finalize(&mut self, getrmsd_thresh: f64) {
        let mut sorted = std::mem::take(&mut self.samples);
        sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        for (rmsd, deltas) in &sorted {
            if *rmsd > getrmsd_thresh {
                break;
            }
            self.loose.absorb(deltas);
        }
        self.samples = sorted;
        self.tau_fixed = true;
    }

    pub fn samples(&self) -> &[(f64, DescriptorDeltas)] {
        &self.samples
    }

    /// Restores calibrated magnitudes from a restart record.
    pub fn restore(&mut self, loose: ThresholdTriple, tight: ThresholdTriple) {
        self.loose = loose;
        self.tight = tight;
    }
}
