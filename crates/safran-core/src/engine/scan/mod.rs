//! Three-pass conformer-ensemble deduplication.
//!
//! Candidates are consumed in ascending energy order and compared against
//! the currently accepted set. Pass 1 uses plain best-fit RMSD and
//! calibrates the thresholds; pass 2 runs the reordering search on pairs
//! the cheap descriptors mark as promising, caching every successful
//! permutation; pass 3 only replays cached permutations. The first
//! candidate is always accepted, τ is frozen once pass 2 begins, and every
//! pass ends with a restart record on disk.

pub mod config;
pub mod restart;
pub mod thresholds;

pub use config::{DescriptorMask, EarlyBreak, ScanConfig};
pub use restart::ScanRestart;
pub use thresholds::{DescriptorDeltas, ThresholdModel, ThresholdTriple};

use crate::core::constants::HARTREE_TO_KJMOL;
use crate::core::io::xyz::{append_frame, XyzReader, XyzWriter};
use crate::core::models::ensemble::{Classification, EnsembleArena, MoleculeId};
use crate::core::models::permutation::{Permutation, ReorderRuleCache};
use crate::core::models::Molecule;
use crate::engine::align::{ReorderMethod, RmsdConfig, RmsdDriver};
use crate::engine::error::EngineError;
use crate::engine::progress::ProgressReporter;
use crate::engine::stop::StopCheck;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanStats {
    pub accepted: usize,
    pub rejected: usize,
    pub rejected_directly: usize,
    pub reordered: usize,
    pub reorder_successful: usize,
    pub reused: usize,
    pub skipped: usize,
    pub duplicates: usize,
}

#[derive(Debug)]
pub struct ScanOutcome {
    /// Arena ids of the deduplicated ensemble, energy-ascending.
    pub accepted: Vec<MoleculeId>,
    pub tau: f64,
    pub stats: ScanStats,
    /// Whether the run ended through the stop file.
    pub stopped: bool,
}

/// A comparison reference: either a structure of this run's arena or one of
/// the previously accepted ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RefMol {
    Internal(MoleculeId),
    External(usize),
}

/// Outcome of one candidate-vs-reference comparison worker.
#[derive(Debug)]
struct CompareOutcome {
    rejecting: bool,
    rmsd: f64,
    /// Newly discovered permutation (reorder hit only).
    new_rule: Option<Permutation>,
    reused: bool,
    skipped_by_break: bool,
}

pub struct ConfScan<'a> {
    config: ScanConfig,
    arena: EnsembleArena,
    previously_accepted: Vec<Molecule>,
    rules: ReorderRuleCache,
    thresholds: ThresholdModel,
    stats: ScanStats,
    basename: PathBuf,
    stop: StopCheck,
    reporter: &'a ProgressReporter<'a>,
    attempted_pairs: HashSet<(MoleculeId, RefMol)>,
}

impl<'a> ConfScan<'a> {
    pub fn new(
        config: ScanConfig,
        basename: impl Into<PathBuf>,
        reporter: &'a ProgressReporter<'a>,
    ) -> Result<ConfScan<'a>, EngineError> {
        config.validate().map_err(EngineError::Config)?;
        let basename = basename.into();
        let thresholds = ThresholdModel::new(config.rmsd_threshold);
        let stop = match basename.parent() {
            Some(dir) if dir.as_os_str().len() > 0 => StopCheck::at(dir),
            _ => StopCheck::in_working_dir(),
        };
        Ok(ConfScan {
            config,
            arena: EnsembleArena::new(),
            previously_accepted: Vec::new(),
            rules: ReorderRuleCache::new(),
            thresholds,
            stats: ScanStats::default(),
            basename,
            stop,
            reporter,
            attempted_pairs: HashSet::new(),
        })
    }

    fn out_path(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .basename
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "safran".into());
        name.push_str(suffix);
        self.basename.with_file_name(name)
    }

    /// Adds one structure; descriptor caches are filled immediately so the
    /// parallel comparison phases never mutate.
    pub fn add_molecule(&mut self, mut molecule: Molecule) -> MoleculeId {
        if molecule.energy().is_none() {
            warn!(name = molecule.name(), "structure without energy, using 0");
            molecule.set_energy(0.0);
        }
        molecule.compute_descriptors(self.config.needs_rotational(), self.config.needs_image());
        self.arena.push(molecule)
    }

    /// Streams an XYZ/TRJ trajectory into the arena.
    pub fn load_trajectory(&mut self, path: impl AsRef<Path>) -> Result<usize, EngineError> {
        let mut count = 0;
        for frame in XyzReader::open(path.as_ref())? {
            let mut molecule = frame?;
            if molecule.name().is_empty() {
                molecule.set_name(format!("MOL_{}", count));
            }
            self.add_molecule(molecule);
            count += 1;
        }
        info!(count, path = %path.as_ref().display(), "ensemble loaded");
        Ok(count)
    }

    fn load_previously_accepted(&mut self) -> Result<(), EngineError> {
        let Some(path) = self.config.previous_accepted.clone() else {
            return Ok(());
        };
        for frame in XyzReader::open(&path)? {
            let mut molecule = frame?;
            if molecule.energy().is_none() {
                molecule.set_energy(0.0);
            }
            molecule
                .compute_descriptors(self.config.needs_rotational(), self.config.needs_image());
            self.previously_accepted.push(molecule);
        }
        info!(
            count = self.previously_accepted.len(),
            "previously accepted ensemble loaded"
        );
        Ok(())
    }

    fn load_restart(&mut self) {
        if !self.config.restart {
            return;
        }
        let path = self.out_path(".restart.json");
        match ScanRestart::load(&path) {
            Ok(record) => {
                self.rules = record.rules();
                self.thresholds.restore(record.loose(), record.tight());
                info!(
                    rules = self.rules.len(),
                    "restart record loaded, starting with cached reorder rules"
                );
            }
            Err(e) => {
                // a broken or missing record degrades to defaults
                warn!("restart record skipped: {}", e);
            }
        }
    }

    fn write_restart(&self) -> Result<(), EngineError> {
        let mut record = ScanRestart::default();
        record.set_rules(&self.rules);
        record.set_thresholds(self.thresholds.loose, self.thresholds.tight);
        record.write(self.out_path(".restart.json"))
    }

    fn resolve(&self, reference: RefMol) -> &Molecule {
        match reference {
            RefMol::Internal(id) => self.arena.get(id),
            RefMol::External(i) => &self.previously_accepted[i],
        }
    }

    fn log_rejection(&self, candidate: &Molecule, reference: &Molecule, rmsd: f64, direct: bool) {
        if !(self.config.write_files && !self.config.reduced_files) {
            return;
        }
        let line = if direct {
            format!(
                "{} rejected against {}: descriptor differences below the tight thresholds (dE {:.3} kJ/mol)\n",
                candidate.name(),
                reference.name(),
                (candidate.energy().unwrap_or(0.0) - reference.energy().unwrap_or(0.0)).abs()
                    * HARTREE_TO_KJMOL
            )
        } else {
            format!(
                "{} rejected against {}: rmsd {:.6} below threshold (dE {:.3} kJ/mol)\n",
                candidate.name(),
                reference.name(),
                rmsd,
                (candidate.energy().unwrap_or(0.0) - reference.energy().unwrap_or(0.0)).abs()
                    * HARTREE_TO_KJMOL
            )
        };
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.out_path(".statistic.log"))
        {
            let _ = file.write_all(line.as_bytes());
        }
    }

    /// Runs the configured passes and finalizes the output files.
    #[instrument(skip_all, name = "confscan")]
    pub fn run(&mut self) -> Result<ScanOutcome, EngineError> {
        self.load_previously_accepted()?;
        self.load_restart();
        self.arena.sort_by_energy();
        if self.arena.is_empty() {
            return Err(EngineError::Config("the ensemble is empty".into()));
        }
        if self.config.write_files {
            // start the per-pass trajectories fresh
            XyzWriter::create(self.out_path(".accepted.xyz"))?;
            if !self.config.reduced_files {
                XyzWriter::create(self.out_path(".rejected.xyz"))?;
                XyzWriter::create(self.out_path(".thresh.xyz"))?;
                XyzWriter::create(self.out_path(".initial.xyz"))?;
                std::fs::write(self.out_path(".statistic.log"), "")?;
            }
        }

        let mut stopped = false;

        if !self.config.skip_init {
            self.reporter.pass("Initial pass (no reordering)");
            match self.initial_pass() {
                Ok(()) => {}
                Err(e) if e.is_stop() => stopped = true,
                Err(e) => return Err(e),
            }
            self.report_status("initial pass");
        } else {
            // everything proceeds to the reorder pass; thresholds open wide
            info!("initial pass skipped, opening thresholds");
            for id in self.arena.energy_order().to_vec() {
                self.arena.classify(id, Classification::Accepted);
            }
            if self.thresholds.tau_is_fixed() {
                self.thresholds.loose = ThresholdTriple {
                    energy: 1e23,
                    image: 1e23,
                    rotational: 1e23,
                };
            }
            self.config.skip_reuse = true;
        }
        self.thresholds.finalize(self.config.getrmsd_thresh);
        info!(tau = self.thresholds.tau(), "RMSD threshold frozen");
        self.write_restart()?;

        if !self.config.skip_reorder && !stopped {
            let steps: Vec<(f64, f64, f64)> = itertools::izip!(
                self.config.sle.iter().copied(),
                self.config.sli.iter().copied(),
                self.config.slh.iter().copied()
            )
            .collect();
            for (run, (se, si, sh)) in steps.into_iter().enumerate() {
                self.reporter
                    .pass(format!("Reorder pass {} (loose ×{:.1})", run + 1, se));
                let loose = self.thresholds.loose.scaled(se, sh, si);
                let pass_file = self.out_path(&format!(".reorder.{}.xyz", run + 1));
                match self.comparison_pass(loose, false, Some(pass_file)) {
                    Ok(()) => {}
                    Err(e) if e.is_stop() => {
                        stopped = true;
                    }
                    Err(e) => return Err(e),
                }
                self.report_status(&format!("reorder pass {}", run + 1));
                self.write_restart()?;
                if stopped {
                    break;
                }
            }
        }

        if !self.config.skip_reuse && !stopped {
            self.reporter.pass("Reuse pass (cached rules only)");
            let pass_file = self.out_path(".reuse.xyz");
            match self.comparison_pass(ThresholdTriple::default(), true, Some(pass_file)) {
                Ok(()) => {}
                Err(e) if e.is_stop() => stopped = true,
                Err(e) => return Err(e),
            }
            self.report_status("reuse pass");
            self.write_restart()?;
        }

        self.finalize()?;

        Ok(ScanOutcome {
            accepted: self.arena.ids_with(Classification::Accepted),
            tau: self.thresholds.tau(),
            stats: self.stats,
            stopped,
        })
    }

    /// Pass 1: best-fit comparisons, sample collection, τ calibration.
    fn initial_pass(&mut self) -> Result<(), EngineError> {
        let candidates = self.arena.energy_order().to_vec();
        let mut accepted: Vec<MoleculeId> = Vec::new();
        let tau_fixed = self.thresholds.tau_is_fixed();
        let (ste, sti, sth) = (self.config.ste, self.config.sti, self.config.sth);
        let rmsd_config = RmsdConfig {
            method: ReorderMethod::None,
            check_topology: self.config.max_topo_diff.is_some(),
            ..self.config.rmsd.clone()
        };

        for candidate_id in candidates {
            if self.stop.requested() {
                return Err(EngineError::StopRequested);
            }
            if accepted.is_empty() {
                self.accept(candidate_id, Some(&self.out_path(".initial.xyz")))?;
                accepted.push(candidate_id);
                continue;
            }

            let candidate = self.arena.get(candidate_id);
            let comparisons: Vec<Result<(f64, Option<usize>, DescriptorDeltas), EngineError>> = {
                #[cfg(feature = "parallel")]
                let iter = accepted.par_iter();
                #[cfg(not(feature = "parallel"))]
                let iter = accepted.iter();
                iter.map(|&ref_id| {
                    let reference = self.arena.get(ref_id);
                    let driver = RmsdDriver::new(reference, candidate, rmsd_config.clone());
                    let report = driver.run()?;
                    let deltas = DescriptorDeltas::between(reference, candidate);
                    Ok((report.rmsd, report.topology_difference, deltas))
                })
                .collect()
            };

            let mut keep = true;
            let mut rejecting: Option<(MoleculeId, f64)> = None;
            for (&ref_id, comparison) in accepted.iter().zip(comparisons) {
                let (rmsd, topo, deltas) = comparison?;
                self.thresholds.record_sample(rmsd, deltas);
                if tau_fixed {
                    self.thresholds.absorb_tight(rmsd, &deltas, ste, sti, sth);
                    let topo_ok = match (self.config.max_topo_diff, topo) {
                        (Some(max), Some(diff)) => diff <= max,
                        _ => true,
                    };
                    if keep && rmsd <= self.thresholds.tau() && topo_ok {
                        keep = false;
                        rejecting = Some((ref_id, rmsd));
                    }
                }
            }

            if keep {
                self.accept(candidate_id, Some(&self.out_path(".initial.xyz")))?;
                accepted.push(candidate_id);
            } else {
                let (ref_id, rmsd) = rejecting.unwrap();
                self.log_rejection(
                    self.arena.get(candidate_id),
                    self.arena.get(ref_id),
                    rmsd,
                    false,
                );
                self.reject(candidate_id);
            }
        }
        Ok(())
    }

    /// Passes 2 and 3: descriptor pre-filter, then rule reuse and (unless
    /// `reuse_only`) the reordering search.
    fn comparison_pass(
        &mut self,
        loose: ThresholdTriple,
        reuse_only: bool,
        pass_file: Option<PathBuf>,
    ) -> Result<(), EngineError> {
        let candidates = self.arena.ids_with(Classification::Accepted);
        for &id in &candidates {
            self.arena.classify(id, Classification::Pending);
        }
        self.stats.accepted = 0;

        let mut references: Vec<RefMol> = (0..self.previously_accepted.len())
            .map(RefMol::External)
            .collect();

        let lowest_energy = {
            let arena_low = self.arena.lowest_energy().unwrap_or(0.0);
            self.previously_accepted
                .iter()
                .filter_map(|m| m.energy())
                .fold(arena_low, f64::min)
        };

        let early_bit = if reuse_only {
            EarlyBreak::REUSE
        } else {
            EarlyBreak::REORDER
        };
        let early_enabled = self.config.early_break().contains(early_bit);
        let tau = self.thresholds.tau();
        let loose_mask = self.config.loose_mask();
        let tight_mask = self.config.tight_mask();
        let rmsd_config = RmsdConfig {
            check_topology: self.config.max_topo_diff.is_some(),
            ..self.config.rmsd.clone()
        };

        for candidate_id in candidates {
            if self.stop.requested() {
                return Err(EngineError::StopRequested);
            }
            if references.is_empty() {
                self.accept(candidate_id, pass_file.as_deref())?;
                references.push(RefMol::Internal(candidate_id));
                continue;
            }

            let delta_e = (self.arena.get(candidate_id).energy().unwrap_or(0.0)
                - lowest_energy)
                * HARTREE_TO_KJMOL;
            if let Some(max_energy) = self.config.max_energy {
                if delta_e > max_energy {
                    info!(
                        candidate = self.arena.get(candidate_id).name(),
                        delta_e, "energy window exhausted, stopping the pass"
                    );
                    self.reject(candidate_id);
                    continue;
                }
            }

            // phase A: sequential descriptor pre-filter
            let mut enabled: Vec<RefMol> = Vec::new();
            let mut direct_reject: Option<RefMol> = None;
            for &reference in &references {
                let deltas =
                    DescriptorDeltas::between(self.resolve(reference), self.arena.get(candidate_id));
                let worth_aligning = loose.is_disabled()
                    || deltas.mask_below(&loose).contains(loose_mask);
                if !worth_aligning {
                    self.stats.skipped += 1;
                    continue;
                }
                if self.attempted_pairs.contains(&(candidate_id, reference)) && !reuse_only {
                    self.stats.duplicates += 1;
                    continue;
                }
                let tight_hit = !tight_mask.is_empty()
                    && deltas
                        .mask_below(&self.thresholds.tight)
                        .contains(tight_mask);
                if tight_hit {
                    direct_reject = Some(reference);
                    break;
                }
                if !reuse_only {
                    self.attempted_pairs.insert((candidate_id, reference));
                }
                enabled.push(reference);
            }

            if let Some(reference) = direct_reject {
                self.stats.rejected_directly += 1;
                self.log_rejection(
                    self.arena.get(candidate_id),
                    self.resolve(reference),
                    -1.0,
                    true,
                );
                self.arena.classify(candidate_id, Classification::Threshold);
                self.stats.rejected += 1;
                continue;
            }

            // phase B: parallel alignment against the enabled references
            let mut rejection: Option<(RefMol, f64, bool)> = None;
            let mut new_rules: Vec<Permutation> = Vec::new();
            if !enabled.is_empty() {
                let candidate = self.arena.get(candidate_id);
                let rules_snapshot = self.rules.as_slice();
                let break_flag = AtomicBool::new(false);

                let outcomes: Vec<Result<CompareOutcome, EngineError>> = {
                    #[cfg(feature = "parallel")]
                    let iter = enabled.par_iter();
                    #[cfg(not(feature = "parallel"))]
                    let iter = enabled.iter();
                    iter.map(|&reference| {
                        compare_one(
                            self.resolve(reference),
                            candidate,
                            &rmsd_config,
                            rules_snapshot,
                            tau,
                            self.config.max_topo_diff,
                            reuse_only,
                            early_enabled,
                            &break_flag,
                        )
                    })
                    .collect()
                };

                for (&reference, outcome) in enabled.iter().zip(outcomes) {
                    let outcome = outcome?;
                    if outcome.skipped_by_break {
                        self.stats.skipped += 1;
                        continue;
                    }
                    if !reuse_only {
                        self.stats.reordered += 1;
                    }
                    if outcome.rejecting {
                        if outcome.reused {
                            self.stats.reused += 1;
                        } else if outcome.new_rule.is_some() {
                            self.stats.reorder_successful += 1;
                        }
                        if let Some(rule) = outcome.new_rule {
                            new_rules.push(rule);
                        }
                        if rejection.is_none() {
                            rejection = Some((reference, outcome.rmsd, outcome.reused));
                        }
                    }
                }
            }

            for rule in new_rules {
                if !self.config.skip_rules && self.rules.insert(rule) {
                    debug!(total = self.rules.len(), "reorder rule cached");
                }
            }

            match rejection {
                Some((reference, rmsd, _)) => {
                    self.log_rejection(
                        self.arena.get(candidate_id),
                        self.resolve(reference),
                        rmsd,
                        false,
                    );
                    self.reject(candidate_id);
                }
                None => {
                    self.accept(candidate_id, pass_file.as_deref())?;
                    references.push(RefMol::Internal(candidate_id));
                    if let Some(max_rank) = self.config.max_rank {
                        if references.len() >= max_rank {
                            info!(max_rank, "accepted-structure cap reached");
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn accept(&mut self, id: MoleculeId, pass_file: Option<&Path>) -> Result<(), EngineError> {
        self.arena.classify(id, Classification::Accepted);
        self.stats.accepted += 1;
        let molecule = self.arena.get(id);
        debug!(name = molecule.name(), "accept");
        if let Some(path) = pass_file {
            if self.config.write_files && !self.config.reduced_files {
                append_frame(path, molecule)?;
            }
        }
        Ok(())
    }

    fn reject(&mut self, id: MoleculeId) {
        self.arena.classify(id, Classification::Rejected);
        self.stats.rejected += 1;
        debug!(name = self.arena.get(id).name(), "reject");
    }

    fn report_status(&self, pass: &str) {
        self.reporter.status(format!(
            "{}: accepted {} / rejected {} (direct {}) / reordered {} (hits {}, reused {}) / skipped {}",
            pass,
            self.stats.accepted,
            self.stats.rejected,
            self.stats.rejected_directly,
            self.stats.reordered,
            self.stats.reorder_successful,
            self.stats.reused,
            self.stats.skipped,
        ));
    }

    /// Applies the rank/energy caps and writes the final trajectory files.
    fn finalize(&mut self) -> Result<(), EngineError> {
        let accepted = self.arena.ids_with(Classification::Accepted);
        let lowest = self.arena.lowest_energy().unwrap_or(0.0);
        let write_all = self.config.write_files;
        let write_side = write_all && !self.config.reduced_files;
        let joined = !self.previously_accepted.is_empty();

        for (rank, &id) in accepted.iter().enumerate() {
            let over_rank = self.config.max_rank.is_some_and(|max| rank >= max);
            let delta_e =
                (self.arena.get(id).energy().unwrap_or(0.0) - lowest) * HARTREE_TO_KJMOL;
            let over_energy = self.config.max_energy.is_some_and(|max| delta_e > max);
            if over_rank || over_energy {
                self.arena.classify(id, Classification::Rejected);
                continue;
            }
            if write_all {
                append_frame(self.out_path(".accepted.xyz"), self.arena.get(id))?;
            }
            if joined && write_all {
                append_frame(self.out_path(".joined.xyz"), self.arena.get(id))?;
            }
        }
        if joined && write_all {
            for molecule in &self.previously_accepted {
                append_frame(self.out_path(".joined.xyz"), molecule)?;
            }
        }
        if write_side {
            for id in self.arena.ids_with(Classification::Rejected) {
                append_frame(self.out_path(".rejected.xyz"), self.arena.get(id))?;
            }
            for id in self.arena.ids_with(Classification::Threshold) {
                append_frame(self.out_path(".thresh.xyz"), self.arena.get(id))?;
            }
        }
        self.write_restart()?;
        info!(
            kept = self.arena.ids_with(Classification::Accepted).len(),
            total = self.arena.len(),
            "scan finished"
        );
        Ok(())
    }

    pub fn rules(&self) -> &ReorderRuleCache {
        &self.rules
    }

    pub fn arena(&self) -> &EnsembleArena {
        &self.arena
    }
}

/// One candidate-vs-reference comparison: best fit, then cached rules, then
/// (unless reuse-only) the reordering search.
#[allow(clippy::too_many_arguments)]
fn compare_one(
    reference: &Molecule,
    candidate: &Molecule,
    rmsd_config: &RmsdConfig,
    rules: &[Permutation],
    tau: f64,
    max_topo_diff: Option<usize>,
    reuse_only: bool,
    early_enabled: bool,
    break_flag: &AtomicBool,
) -> Result<CompareOutcome, EngineError> {
    let kept = CompareOutcome {
        rejecting: false,
        rmsd: f64::INFINITY,
        new_rule: None,
        reused: false,
        skipped_by_break: false,
    };
    if early_enabled && break_flag.load(Ordering::Relaxed) {
        return Ok(CompareOutcome {
            skipped_by_break: true,
            ..kept
        });
    }

    let driver = RmsdDriver::new(reference, candidate, rmsd_config.clone());
    let topo_ok = |topo: Option<usize>| match (max_topo_diff, topo) {
        (Some(max), Some(diff)) => diff <= max,
        _ => true,
    };

    let best_fit = driver.best_fit_rmsd()?;
    if best_fit < tau {
        break_flag.store(true, Ordering::Relaxed);
        return Ok(CompareOutcome {
            rejecting: true,
            rmsd: best_fit,
            ..kept
        });
    }

    for rule in rules {
        if rule.len() != candidate.atom_count() {
            continue;
        }
        // rules from other element layouts simply do not apply
        let Ok((rmsd, topo)) = driver.rules_to_rmsd(rule) else {
            continue;
        };
        if rmsd < tau && topo_ok(topo) {
            if early_enabled {
                break_flag.store(true, Ordering::Relaxed);
            }
            return Ok(CompareOutcome {
                rejecting: true,
                rmsd,
                reused: true,
                ..kept
            });
        }
    }

    if reuse_only {
        return Ok(kept);
    }

    let report = driver.run()?;
    if report.rmsd <= tau && topo_ok(report.topology_difference) {
        if early_enabled {
            break_flag.store(true, Ordering::Relaxed);
        }
        return Ok(CompareOutcome {
            rejecting: true,
            rmsd: report.rmsd,
            new_rule: Some(report.permutation),
            reused: false,
            skipped_by_break: false,
        });
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Element;
    use nalgebra::Point3;

    fn methanol(energy: f64) -> Molecule {
        let mut m = Molecule::new(
            vec![
                Element::CARBON,
                Element::OXYGEN,
                Element::HYDROGEN,
                Element::HYDROGEN,
                Element::HYDROGEN,
                Element::HYDROGEN,
            ],
            vec![
                Point3::new(-0.046, 0.662, 0.0),
                Point3::new(-0.046, -0.758, 0.0),
                Point3::new(-1.086, 0.975, 0.0),
                Point3::new(0.44, 1.07, 0.89),
                Point3::new(0.44, 1.07, -0.89),
                Point3::new(0.865, -1.057, 0.0),
            ],
        );
        m.set_energy(energy);
        m
    }

    /// A second, clearly distinct conformer (OH hydrogen rotated).
    fn methanol_rotated(energy: f64) -> Molecule {
        let mut m = methanol(energy);
        let mut positions = m.positions().to_vec();
        positions[5] = Point3::new(-0.957, -1.057, 0.0);
        m.set_positions(positions);
        m.set_energy(energy);
        m
    }

    fn scan_config() -> ScanConfig {
        ScanConfig {
            write_files: false,
            ..ScanConfig::default()
        }
    }

    #[test]
    fn permuted_replicas_collapse_to_one_structure() {
        let reporter = ProgressReporter::new();
        let dir = tempfile::tempdir().unwrap();
        // identical replicas have zero descriptor deltas, so the loose
        // pre-filter (strict <) would never fire; disable it and fix τ
        let config = ScanConfig {
            rmsd_threshold: Some(0.1),
            loose_thresh: 0,
            ..scan_config()
        };
        let mut scan = ConfScan::new(config, dir.path().join("ens"), &reporter).unwrap();

        let shuffle = Permutation::new(vec![0, 1, 4, 2, 3, 5]).unwrap();
        for i in 0..6 {
            let base = methanol(-115.0 + 1e-7 * i as f64);
            let mol = if i % 2 == 0 {
                base
            } else {
                base.reordered(&shuffle)
            };
            scan.add_molecule(mol.with_name(format!("MOL_{}", i)));
        }

        let outcome = scan.run().unwrap();
        assert_eq!(outcome.accepted.len(), 1);
        assert!(!outcome.stopped);
        // the hydrogen shuffle had to be discovered exactly once
        assert_eq!(scan.rules().len(), 1);
    }

    #[test]
    fn distinct_conformers_all_survive() {
        // scanner idempotence: a deduplicated ensemble passes through
        let reporter = ProgressReporter::new();
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig {
            rmsd_threshold: Some(0.1),
            ..scan_config()
        };
        let mut scan = ConfScan::new(config, dir.path().join("ens"), &reporter).unwrap();
        scan.add_molecule(methanol(-115.0).with_name("a"));
        scan.add_molecule(methanol_rotated(-114.9).with_name("b"));

        let outcome = scan.run().unwrap();
        assert_eq!(outcome.accepted.len(), 2);
    }

    #[test]
    fn accepted_set_is_energy_ordered() {
        let reporter = ProgressReporter::new();
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig {
            rmsd_threshold: Some(0.1),
            ..scan_config()
        };
        let mut scan = ConfScan::new(config, dir.path().join("ens"), &reporter).unwrap();
        // load in descending energy order on purpose
        scan.add_molecule(methanol_rotated(-114.2).with_name("high"));
        scan.add_molecule(methanol(-115.0).with_name("low"));

        let outcome = scan.run().unwrap();
        let energies: Vec<f64> = outcome
            .accepted
            .iter()
            .map(|&id| scan.arena().get(id).energy().unwrap())
            .collect();
        assert_eq!(energies.len(), 2);
        assert!(energies[0] <= energies[1]);
    }

    #[test]
    fn max_rank_caps_the_accepted_set() {
        let reporter = ProgressReporter::new();
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig {
            rmsd_threshold: Some(0.01),
            max_rank: Some(1),
            ..scan_config()
        };
        let mut scan = ConfScan::new(config, dir.path().join("ens"), &reporter).unwrap();
        scan.add_molecule(methanol(-115.0).with_name("a"));
        scan.add_molecule(methanol_rotated(-114.9).with_name("b"));

        let outcome = scan.run().unwrap();
        assert_eq!(outcome.accepted.len(), 1);
    }

    #[test]
    fn stop_file_triggers_orderly_shutdown() {
        let reporter = ProgressReporter::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(crate::engine::stop::STOP_FILE), "").unwrap();

        let mut scan =
            ConfScan::new(scan_config(), dir.path().join("ens"), &reporter).unwrap();
        scan.add_molecule(methanol(-115.0));
        scan.add_molecule(methanol(-114.9));

        let outcome = scan.run().unwrap();
        assert!(outcome.stopped);
        // the restart record was still written
        assert!(dir.path().join("ens.restart.json").exists());
    }

    #[test]
    fn auto_threshold_is_frozen_before_the_reorder_pass() {
        let reporter = ProgressReporter::new();
        let dir = tempfile::tempdir().unwrap();
        let mut scan =
            ConfScan::new(scan_config(), dir.path().join("ens"), &reporter).unwrap();
        scan.add_molecule(methanol(-115.0));
        let shuffle = Permutation::new(vec![0, 1, 3, 4, 2, 5]).unwrap();
        scan.add_molecule(methanol(-115.0).reordered(&shuffle));

        let outcome = scan.run().unwrap();
        assert!(outcome.tau < 1e4, "tau {} was never calibrated", outcome.tau);
        assert!(outcome.tau > 0.0);
    }

    #[test]
    fn trajectory_files_are_written_when_enabled() {
        let reporter = ProgressReporter::new();
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig {
            rmsd_threshold: Some(0.1),
            write_files: true,
            ..ScanConfig::default()
        };
        let mut scan = ConfScan::new(config, dir.path().join("ens"), &reporter).unwrap();
        scan.add_molecule(methanol(-115.0).with_name("a"));
        scan.add_molecule(methanol_rotated(-114.9).with_name("b"));
        scan.run().unwrap();

        let accepted = dir.path().join("ens.accepted.xyz");
        assert!(accepted.exists());
        let frames: Vec<Molecule> = XyzReader::open(&accepted)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(frames.len(), 2);
    }
}
