//! Scanner configuration.

use crate::engine::align::RmsdConfig;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

bitflags! {
    /// Which descriptor deltas must fall below their loose/tight thresholds
    /// for the combined check to fire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescriptorMask: u8 {
        const ROTATIONAL = 0b001;
        const IMAGE      = 0b010;
        const ENERGY     = 0b100;
    }
}

bitflags! {
    /// Early-break switches: a set bit enables the break in that pass.
    /// Enabling trades determinism for speed — the accepted set becomes
    /// dependent on thread scheduling.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EarlyBreak: u8 {
        const REUSE   = 0b01;
        const REORDER = 0b10;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// RMSD threshold τ in Å. `None` auto-calibrates from the ensemble
    /// during the initial pass.
    pub rmsd_threshold: Option<f64>,

    /// Calibration cutoff: pass-1 samples with RMSD below this feed the
    /// loose-threshold magnitudes.
    pub getrmsd_thresh: f64,

    /// Loose-threshold step multipliers; one reorder pass runs per entry.
    /// The three vectors must have equal length.
    pub sle: Vec<f64>,
    pub sli: Vec<f64>,
    pub slh: Vec<f64>,

    /// Tight-threshold multipliers on τ for the calibration of the direct
    /// rejection deltas.
    pub ste: f64,
    pub sti: f64,
    pub sth: f64,

    /// Bits (see [`DescriptorMask`]) that must all be below the loose
    /// thresholds before a pair is considered for reordering.
    pub loose_thresh: u8,

    /// Bits that must all be below the tight thresholds to reject a pair
    /// outright, without alignment.
    pub tight_thresh: u8,

    /// Early-break bits (see [`EarlyBreak`]); set bit = enabled.
    pub earlybreak: u8,

    /// Alignment settings for the reorder pass.
    pub rmsd: RmsdConfig,

    /// Highest conformer energy above the minimum, kJ/mol; `None` keeps
    /// everything.
    pub max_energy: Option<f64>,

    /// Cap on the number of accepted structures.
    pub max_rank: Option<usize>,

    /// Largest tolerated bond-topology difference for a rejection; `None`
    /// disables the gate.
    pub max_topo_diff: Option<usize>,

    pub skip_init: bool,
    pub skip_reorder: bool,
    pub skip_reuse: bool,

    /// Do not cache newly found reorder rules.
    pub skip_rules: bool,

    /// Whether trajectory side files are written at all.
    pub write_files: bool,
    /// Keep only the accepted-structures file.
    pub reduced_files: bool,

    /// Ensemble of structures accepted by a previous run; candidates
    /// matching any of them are rejected and the joined set is written.
    pub previous_accepted: Option<PathBuf>,

    /// Load reorder rules and thresholds from the restart record if one is
    /// present.
    pub restart: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            rmsd_threshold: None,
            getrmsd_thresh: 5.5,
            sle: vec![1.0, 2.0],
            sli: vec![1.0, 2.0],
            slh: vec![1.0, 2.0],
            ste: 0.1,
            sti: 0.1,
            sth: 0.1,
            loose_thresh: (DescriptorMask::ROTATIONAL
                | DescriptorMask::IMAGE
                | DescriptorMask::ENERGY)
                .bits(),
            tight_thresh: (DescriptorMask::ROTATIONAL | DescriptorMask::IMAGE).bits(),
            earlybreak: EarlyBreak::empty().bits(),
            rmsd: RmsdConfig::default(),
            max_energy: None,
            max_rank: None,
            max_topo_diff: None,
            skip_init: false,
            skip_reorder: false,
            skip_reuse: false,
            skip_rules: false,
            write_files: true,
            reduced_files: false,
            previous_accepted: None,
            restart: false,
        }
    }
}

impl ScanConfig {
    pub fn loose_mask(&self) -> DescriptorMask {
        DescriptorMask::from_bits_truncate(self.loose_thresh)
    }

    pub fn tight_mask(&self) -> DescriptorMask {
        DescriptorMask::from_bits_truncate(self.tight_thresh)
    }

    pub fn early_break(&self) -> EarlyBreak {
        EarlyBreak::from_bits_truncate(self.earlybreak)
    }

    /// Whether the rotational-constant / persistence-image descriptors are
    /// needed at all, i.e. referenced by the loose mask.
    pub fn needs_rotational(&self) -> bool {
        self.loose_mask().contains(DescriptorMask::ROTATIONAL)
    }

    pub fn needs_image(&self) -> bool {
        self.loose_mask().contains(DescriptorMask::IMAGE)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sle.len() != self.sli.len() || self.sle.len() != self.slh.len() {
            return Err(format!(
                "threshold step vectors differ in length: sLE {} / sLI {} / sLH {}",
                self.sle.len(),
                self.sli.len(),
                self.slh.len()
            ));
        }
        if self.sle.is_empty() && !self.skip_reorder {
            return Err("threshold step vectors are empty".into());
        }
        Ok(())
    }
}
