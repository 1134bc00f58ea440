//! The reordering RMSD driver.
//!
//! Orchestrates the alignment strategies: plain best-fit, full cost-matrix
//! assignment, heavy-atom scaffolding, element templates, greedy distance
//! reordering and the incremental beam search. Every strategy funnels into
//! the same finish: apply the winning permutation, superpose, and report the
//! RMSD together with the rotation, per-atom contributions and the topology
//! difference.

use super::assignment;
use super::cost::{build_cost_matrix, CostKernel};
use super::incremental;
use crate::core::geometry::{self, BOND_SCALING};
use crate::core::models::{Element, Molecule, Permutation};
use crate::engine::error::EngineError;
use nalgebra::{Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Reordering strategy. Dispatch happens once at entry; per-strategy state
/// stays local to the strategy functions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReorderMethod {
    /// No reordering search; best-fit on the given ordering.
    None,
    /// Full cost-matrix assignment over all atoms.
    #[default]
    Free,
    /// Assignment on the heavy-atom scaffold, hydrogens filled by nearest
    /// neighbor afterwards.
    Heavy,
    /// Assignment restricted to atoms of the given elements, propagated to
    /// the rest by distance reordering.
    Template(Vec<u8>),
    /// `Template` with the nitrogen/oxygen default.
    Hybrid,
    /// Greedy nearest-neighbor within element classes, re-aligned for a
    /// bounded number of trials.
    Distance,
    /// Bounded beam search growing the permutation one atom at a time.
    Incremental,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RmsdConfig {
    pub method: ReorderMethod,
    pub costmatrix: CostKernel,
    /// Beam width of the incremental strategy.
    pub limit: usize,
    /// Re-alignment trials for the distance/free strategies.
    pub maxtrial: usize,
    /// Assignment-improvement convergence for the free strategy.
    pub km_conv: f64,
    /// Early-exit RMSD for the incremental strategy; 0 disables.
    pub target_rmsd: f64,
    /// Whether reports carry a bond-topology difference count.
    pub check_topology: bool,
}

impl Default for RmsdConfig {
    fn default() -> Self {
        RmsdConfig {
            method: ReorderMethod::Free,
            costmatrix: CostKernel::SquaredDistance,
            limit: 10,
            maxtrial: 5,
            km_conv: 1e-3,
            target_rmsd: 0.0,
            check_topology: false,
        }
    }
}

/// Everything a reordering run produces.
#[derive(Debug, Clone)]
pub struct AlignmentReport {
    /// RMSD after reordering and best-fit alignment.
    pub rmsd: f64,
    /// Best-fit RMSD of the original ordering, for comparison.
    pub raw_rmsd: f64,
    /// The winning permutation (identity when `method` is `None`).
    pub permutation: Permutation,
    /// Rotation aligning the centered, reordered target onto the centered
    /// reference.
    pub rotation: Rotation3<f64>,
    /// Per-atom deviations after alignment.
    pub per_atom: Vec<f64>,
    /// Differing bond pairs between reference and reordered target, when
    /// topology checking is enabled.
    pub topology_difference: Option<usize>,
}

pub struct RmsdDriver<'a> {
    reference: &'a Molecule,
    target: &'a Molecule,
    config: RmsdConfig,
}

impl<'a> RmsdDriver<'a> {
    pub fn new(reference: &'a Molecule, target: &'a Molecule, config: RmsdConfig) -> Self {
        RmsdDriver {
            reference,
            target,
            config,
        }
    }

    pub fn config(&self) -> &RmsdConfig {
        &self.config
    }

    fn check_comparable(&self) -> Result<(), EngineError> {
        if !self.reference.is_comparable_to(self.target) {
            return Err(EngineError::InputMismatch {
                reference_atoms: self.reference.atom_count(),
                target_atoms: self.target.atom_count(),
                detail: "element multisets differ".into(),
            });
        }
        Ok(())
    }

    /// Best-fit RMSD assuming the current atom ordering is correct.
    pub fn best_fit_rmsd(&self) -> Result<f64, EngineError> {
        self.check_comparable()?;
        Ok(
            geometry::superpose(self.reference.positions(), self.target.positions())
                .map(|sp| sp.rmsd)
                .unwrap_or(0.0),
        )
    }

    /// RMSD obtained by applying a cached permutation, with no search.
    /// Returns the RMSD and the topology difference (when enabled).
    pub fn rules_to_rmsd(&self, rule: &Permutation) -> Result<(f64, Option<usize>), EngineError> {
        self.check_comparable()?;
        if rule.len() != self.target.atom_count() {
            return Err(EngineError::InputMismatch {
                reference_atoms: self.reference.atom_count(),
                target_atoms: rule.len(),
                detail: "permutation length differs from atom count".into(),
            });
        }
        rule.preserves_elements(self.reference.elements(), self.target.elements())
            .map_err(|e| EngineError::InputMismatch {
                reference_atoms: self.reference.atom_count(),
                target_atoms: self.target.atom_count(),
                detail: e.to_string(),
            })?;
        let reordered = self.target.reordered(rule);
        let rmsd = geometry::superpose(self.reference.positions(), reordered.positions())
            .map(|sp| sp.rmsd)
            .unwrap_or(0.0);
        let topo = self
            .config
            .check_topology
            .then(|| self.topology_difference(&reordered));
        Ok((rmsd, topo))
    }

    /// Runs the configured reordering strategy and reports the best fit.
    pub fn run(&self) -> Result<AlignmentReport, EngineError> {
        self.check_comparable()?;
        let raw_rmsd = self.best_fit_rmsd()?;
        let n = self.target.atom_count();

        let permutation = match &self.config.method {
            ReorderMethod::None => Permutation::identity(n),
            ReorderMethod::Free => self.reorder_free()?,
            ReorderMethod::Heavy => self.reorder_heavy()?,
            ReorderMethod::Template(zs) => {
                let elements: Vec<Element> = zs.iter().map(|&z| Element(z)).collect();
                self.reorder_template(&elements)?
            }
            ReorderMethod::Hybrid => {
                self.reorder_template(&[Element::NITROGEN, Element::OXYGEN])?
            }
            ReorderMethod::Distance => self.reorder_distance()?,
            ReorderMethod::Incremental => incremental::beam_search(
                self.reference,
                self.target,
                self.config.limit,
                self.config.costmatrix,
                self.config.target_rmsd,
            )
            .ok_or(EngineError::AssignmentInfeasible { row: 0 })?,
        };

        self.finish(permutation, raw_rmsd)
    }

    fn finish(
        &self,
        permutation: Permutation,
        raw_rmsd: f64,
    ) -> Result<AlignmentReport, EngineError> {
        let reordered = self.target.reordered(&permutation);
        let sp = geometry::superpose(self.reference.positions(), reordered.positions()).ok_or(
            EngineError::InputMismatch {
                reference_atoms: self.reference.atom_count(),
                target_atoms: reordered.atom_count(),
                detail: "empty geometry".into(),
            },
        )?;
        let per_atom = geometry::per_atom_deviations(self.reference.positions(), reordered.positions());
        let topology_difference = self
            .config
            .check_topology
            .then(|| self.topology_difference(&reordered));

        Ok(AlignmentReport {
            rmsd: sp.rmsd,
            raw_rmsd,
            permutation,
            rotation: sp.rotation,
            per_atom,
            topology_difference,
        })
    }

    fn topology_difference(&self, reordered_target: &Molecule) -> usize {
        let ref_topo = geometry::bond_topology(
            self.reference.elements(),
            self.reference.positions(),
            BOND_SCALING,
        );
        let tar_topo = geometry::bond_topology(
            reordered_target.elements(),
            reordered_target.positions(),
            BOND_SCALING,
        );
        geometry::topology_difference(&ref_topo, &tar_topo)
    }

    /// ∂RMSD/∂(target positions) for the current ordering, used by the
    /// metadynamics bias. At the optimal rotation the only first-order term
    /// is the aligned pair residual rotated back into the target frame.
    pub fn gradient(&self) -> Result<Vec<Vector3<f64>>, EngineError> {
        self.check_comparable()?;
        let n = self.reference.atom_count();
        let ref_centered = geometry::centered(self.reference.positions());
        let tar_centered = geometry::centered(self.target.positions());
        let rotation = geometry::kabsch_rotation(&ref_centered, &tar_centered).ok_or(
            EngineError::InputMismatch {
                reference_atoms: n,
                target_atoms: n,
                detail: "empty geometry".into(),
            },
        )?;
        let aligned: Vec<Point3<f64>> = tar_centered.iter().map(|p| rotation * p).collect();
        let rmsd = geometry::paired_rmsd(&ref_centered, &aligned);
        if rmsd < 1e-12 {
            return Ok(vec![Vector3::zeros(); n]);
        }
        let scale = 1.0 / (n as f64 * rmsd);
        Ok(ref_centered
            .iter()
            .zip(aligned.iter())
            .map(|(a, b)| rotation.inverse() * ((b - a) * scale))
            .collect())
    }

    // --- strategies ---

    /// Full-matrix assignment, iterated with re-alignment until the
    /// permutation stops changing or the cost improvement falls below
    /// `km_conv`. Infeasible assignments fall back to distance reordering.
    fn reorder_free(&self) -> Result<Permutation, EngineError> {
        let n = self.reference.atom_count();
        let all: Vec<usize> = (0..n).collect();
        let ref_centered = geometry::centered(self.reference.positions());
        let tar_centered = geometry::centered(self.target.positions());

        let mut perm = Permutation::identity(n);
        let mut rotation = Rotation3::identity();
        let mut last_cost = f64::INFINITY;

        for trial in 0..self.config.maxtrial.max(1) {
            let rotated: Vec<Point3<f64>> = tar_centered.iter().map(|p| rotation * p).collect();
            let cm = build_cost_matrix(
                &ref_centered,
                &rotated,
                &all,
                &all,
                Some((self.reference.elements(), self.target.elements())),
                self.config.costmatrix,
            );
            let candidate = match assignment::solve(&cm.matrix) {
                Ok(p) => p,
                Err(EngineError::AssignmentInfeasible { row }) => {
                    warn!(row, "assignment infeasible, falling back to distance reorder");
                    return self.reorder_distance();
                }
                Err(e) => return Err(e),
            };
            let cost = assignment::assignment_cost(&cm.matrix, &candidate);
            let converged = candidate == perm || (last_cost - cost).abs() < self.config.km_conv;
            perm = candidate;
            last_cost = cost;

            let tar_perm: Vec<Point3<f64>> =
                perm.indices().iter().map(|&j| tar_centered[j]).collect();
            if let Some(r) = geometry::kabsch_rotation(&ref_centered, &tar_perm) {
                rotation = r;
            }
            if converged {
                debug!(trial, cost, "free reorder converged");
                break;
            }
        }

        // short Euler-angle refinement of the rotation, then one final solve
        let rotation = refine_rotation(
            &ref_centered,
            &tar_centered,
            rotation,
            self.config.costmatrix,
            self.reference.elements(),
            self.target.elements(),
        );
        let rotated: Vec<Point3<f64>> = tar_centered.iter().map(|p| rotation * p).collect();
        let cm = build_cost_matrix(
            &ref_centered,
            &rotated,
            &all,
            &all,
            Some((self.reference.elements(), self.target.elements())),
            self.config.costmatrix,
        );
        match assignment::solve(&cm.matrix) {
            Ok(p) => Ok(p),
            Err(EngineError::AssignmentInfeasible { .. }) => Ok(perm),
            Err(e) => Err(e),
        }
    }

    /// Assignment on the heavy-atom scaffold; hydrogens follow by nearest
    /// neighbor in the aligned frame.
    fn reorder_heavy(&self) -> Result<Permutation, EngineError> {
        let heavy_ref: Vec<usize> = (0..self.reference.atom_count())
            .filter(|&i| !self.reference.elements()[i].is_hydrogen())
            .collect();
        let heavy_tar: Vec<usize> = (0..self.target.atom_count())
            .filter(|&i| !self.target.elements()[i].is_hydrogen())
            .collect();
        if heavy_ref.is_empty() {
            // all-hydrogen systems have no scaffold to work from
            return self.reorder_distance();
        }
        if heavy_ref.len() < 3 {
            // two heavy atoms leave the rotation about their axis free, so
            // the hydrogen fill would be arbitrary
            return self.reorder_free();
        }

        let ref_subset = self.reference.subset(&heavy_ref);
        let tar_subset = self.target.subset(&heavy_tar);
        let sub_driver = RmsdDriver::new(&ref_subset, &tar_subset, self.config.clone());
        let heavy_perm = sub_driver.reorder_free()?;

        // rotation from the matched heavy scaffold
        let ref_heavy_pts = geometry::centered(ref_subset.positions());
        let tar_heavy_pts: Vec<Point3<f64>> = {
            let centered = geometry::centered(tar_subset.positions());
            heavy_perm.indices().iter().map(|&j| centered[j]).collect()
        };
        let rotation = geometry::kabsch_rotation(&ref_heavy_pts, &tar_heavy_pts)
            .unwrap_or_else(Rotation3::identity);

        self.fill_with_rotation(rotation, |slot, full_perm| {
            // pin the heavy scaffold from the subset assignment
            for (sub_slot, &sub_j) in heavy_perm.indices().iter().enumerate() {
                if heavy_ref[sub_slot] == slot {
                    return Some(heavy_tar[sub_j]);
                }
            }
            let _ = full_perm;
            None
        })
    }

    /// Assignment restricted to template elements, propagated by distance
    /// reordering under the template-derived rotation.
    fn reorder_template(&self, template: &[Element]) -> Result<Permutation, EngineError> {
        let sel_ref: Vec<usize> = (0..self.reference.atom_count())
            .filter(|&i| template.contains(&self.reference.elements()[i]))
            .collect();
        let sel_tar: Vec<usize> = (0..self.target.atom_count())
            .filter(|&i| template.contains(&self.target.elements()[i]))
            .collect();
        if sel_ref.len() < 2 || sel_ref.len() != sel_tar.len() {
            debug!(
                found = sel_ref.len(),
                "template too small, falling back to free reorder"
            );
            return self.reorder_free();
        }

        let ref_subset = self.reference.subset(&sel_ref);
        let tar_subset = self.target.subset(&sel_tar);
        let sub_driver = RmsdDriver::new(&ref_subset, &tar_subset, self.config.clone());
        let sub_perm = sub_driver.reorder_free()?;

        let ref_pts = geometry::centered(ref_subset.positions());
        let tar_pts: Vec<Point3<f64>> = {
            let centered = geometry::centered(tar_subset.positions());
            sub_perm.indices().iter().map(|&j| centered[j]).collect()
        };
        let rotation =
            geometry::kabsch_rotation(&ref_pts, &tar_pts).unwrap_or_else(Rotation3::identity);

        self.fill_with_rotation(rotation, |_, _| None)
    }

    /// Greedy nearest-neighbor within element classes, re-aligning between
    /// trials and keeping the best permutation found.
    fn reorder_distance(&self) -> Result<Permutation, EngineError> {
        let n = self.reference.atom_count();
        let ref_centered = geometry::centered(self.reference.positions());
        let tar_centered = geometry::centered(self.target.positions());

        let mut rotation = Rotation3::identity();
        let mut best: Option<(f64, Permutation)> = None;

        for _trial in 0..self.config.maxtrial.max(1) {
            let rotated: Vec<Point3<f64>> = tar_centered.iter().map(|p| rotation * p).collect();
            let mut used = vec![false; n];
            let mut indices = Vec::with_capacity(n);
            for slot in 0..n {
                let wanted = self.reference.elements()[slot];
                let mut nearest: Option<(f64, usize)> = None;
                for j in 0..n {
                    if used[j] || self.target.elements()[j] != wanted {
                        continue;
                    }
                    let d = (ref_centered[slot] - rotated[j]).norm_squared();
                    if nearest.map_or(true, |(bd, _)| d < bd) {
                        nearest = Some((d, j));
                    }
                }
                let (_, j) = nearest.ok_or(EngineError::AssignmentInfeasible { row: slot })?;
                used[j] = true;
                indices.push(j);
            }
            let perm = Permutation::new(indices)
                .map_err(|_| EngineError::AssignmentInfeasible { row: 0 })?;

            let tar_perm: Vec<Point3<f64>> =
                perm.indices().iter().map(|&j| tar_centered[j]).collect();
            let rmsd = match geometry::kabsch_rotation(&ref_centered, &tar_perm) {
                Some(r) => {
                    rotation = r;
                    let aligned: Vec<Point3<f64>> = tar_perm.iter().map(|p| r * p).collect();
                    geometry::paired_rmsd(&ref_centered, &aligned)
                }
                None => f64::INFINITY,
            };

            let improved = best.as_ref().map_or(true, |(b, _)| rmsd < *b);
            if improved {
                best = Some((rmsd, perm));
            } else {
                break;
            }
        }

        Ok(best.map(|(_, p)| p).unwrap_or_else(|| Permutation::identity(n)))
    }

    /// Builds a full permutation under a fixed rotation: pinned slots come
    /// from `pin`, the rest by nearest neighbor within the element class.
    fn fill_with_rotation(
        &self,
        rotation: Rotation3<f64>,
        pin: impl Fn(usize, &[usize]) -> Option<usize>,
    ) -> Result<Permutation, EngineError> {
        let n = self.reference.atom_count();
        let ref_centered = geometry::centered(self.reference.positions());
        let tar_centered = geometry::centered(self.target.positions());
        let rotated: Vec<Point3<f64>> = tar_centered.iter().map(|p| rotation * p).collect();

        let mut used = vec![false; n];
        let mut indices = vec![usize::MAX; n];

        for slot in 0..n {
            if let Some(j) = pin(slot, &indices) {
                indices[slot] = j;
                used[j] = true;
            }
        }
        for slot in 0..n {
            if indices[slot] != usize::MAX {
                continue;
            }
            let wanted = self.reference.elements()[slot];
            let mut nearest: Option<(f64, usize)> = None;
            for j in 0..n {
                if used[j] || self.target.elements()[j] != wanted {
                    continue;
                }
                let d = (ref_centered[slot] - rotated[j]).norm_squared();
                if nearest.map_or(true, |(bd, _)| d < bd) {
                    nearest = Some((d, j));
                }
            }
            let (_, j) = nearest.ok_or(EngineError::AssignmentInfeasible { row: slot })?;
            indices[slot] = j;
            used[j] = true;
        }

        Permutation::new(indices).map_err(|_| EngineError::AssignmentInfeasible { row: 0 })
    }
}

/// Coordinate-descent refinement of the alignment rotation over the three
/// Euler angles, minimizing the cost-matrix lower bound with central
/// differences. A compact stand-in for the quasi-Newton refiner of the
/// original design; the evaluation contract (same kernel, same matrix) is
/// identical.
fn refine_rotation(
    reference: &[Point3<f64>],
    target: &[Point3<f64>],
    start: Rotation3<f64>,
    kernel: CostKernel,
    ref_elements: &[Element],
    tar_elements: &[Element],
) -> Rotation3<f64> {
    let all: Vec<usize> = (0..reference.len()).collect();
    let evaluate = |angles: &[f64; 3]| -> f64 {
        let r = Rotation3::from_euler_angles(angles[0], angles[1], angles[2]) * start;
        let rotated: Vec<Point3<f64>> = target.iter().map(|p| r * p).collect();
        build_cost_matrix(
            reference,
            &rotated,
            &all,
            &all,
            Some((ref_elements, tar_elements)),
            kernel,
        )
        .lower_bound
    };

    let mut angles = [0.0_f64; 3];
    let mut current = evaluate(&angles);
    let dx = 1e-4;
    let mut step = 0.05;

    for _ in 0..30 {
        let mut gradient = [0.0_f64; 3];
        for k in 0..3 {
            let mut plus = angles;
            plus[k] += dx;
            let mut minus = angles;
            minus[k] -= dx;
            gradient[k] = (evaluate(&plus) - evaluate(&minus)) / (2.0 * dx);
        }
        let norm = (gradient[0].powi(2) + gradient[1].powi(2) + gradient[2].powi(2)).sqrt();
        if norm < 1e-10 {
            break;
        }
        let trial = [
            angles[0] - step * gradient[0] / norm,
            angles[1] - step * gradient[1] / norm,
            angles[2] - step * gradient[2] / norm,
        ];
        let value = evaluate(&trial);
        if value < current {
            angles = trial;
            current = value;
            step *= 1.2;
        } else {
            step *= 0.5;
            if step < 1e-6 {
                break;
            }
        }
    }
    Rotation3::from_euler_angles(angles[0], angles[1], angles[2]) * start
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h2() -> Molecule {
        Molecule::new(
            vec![Element::HYDROGEN, Element::HYDROGEN],
            vec![Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, 0.74)],
        )
    }

    fn methanol() -> Molecule {
        Molecule::new(
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
        )
    }

    #[test]
    fn two_atom_swap_recovers_zero_rmsd_and_the_swap() {
        // the S1 scenario: identical H2 with atoms swapped
        let reference = h2();
        let swapped = reference.reordered(&Permutation::new(vec![1, 0]).unwrap());
        let driver = RmsdDriver::new(&reference, &swapped, RmsdConfig::default());
        let report = driver.run().unwrap();
        assert!(report.rmsd < 1e-9, "rmsd {}", report.rmsd);
        assert_eq!(report.permutation.indices(), &[1, 0]);
    }

    #[test]
    fn rmsd_is_symmetric() {
        let a = methanol();
        let mut b = methanol();
        b.translate(Vector3::new(0.3, -0.2, 0.15));
        let moved: Vec<Point3<f64>> = b
            .positions()
            .iter()
            .map(|p| Point3::new(p.x + 0.05 * p.y, p.y, p.z))
            .collect();
        b.set_positions(moved);

        let fwd = RmsdDriver::new(&a, &b, RmsdConfig::default())
            .best_fit_rmsd()
            .unwrap();
        let rev = RmsdDriver::new(&b, &a, RmsdConfig::default())
            .best_fit_rmsd()
            .unwrap();
        assert!((fwd - rev).abs() < 1e-9);
    }

    #[test]
    fn self_rmsd_is_zero() {
        let m = methanol();
        let driver = RmsdDriver::new(&m, &m, RmsdConfig::default());
        assert_eq!(driver.best_fit_rmsd().unwrap(), 0.0);
    }

    #[test]
    fn free_reorder_recovers_a_hydrogen_shuffle() {
        let reference = methanol();
        let shuffle = Permutation::new(vec![0, 1, 4, 2, 3, 5]).unwrap();
        let shuffled = reference.reordered(&shuffle);

        let report = RmsdDriver::new(&reference, &shuffled, RmsdConfig::default())
            .run()
            .unwrap();
        assert!(report.rmsd < 1e-9, "rmsd {}", report.rmsd);
        assert!(report
            .permutation
            .preserves_elements(reference.elements(), shuffled.elements())
            .is_ok());
    }

    #[test]
    fn every_strategy_solves_the_shuffled_methanol() {
        let reference = methanol();
        let shuffle = Permutation::new(vec![0, 1, 3, 4, 2, 5]).unwrap();
        let shuffled = reference.reordered(&shuffle);

        for method in [
            ReorderMethod::Free,
            ReorderMethod::Heavy,
            ReorderMethod::Distance,
            ReorderMethod::Incremental,
        ] {
            let config = RmsdConfig {
                method: method.clone(),
                ..RmsdConfig::default()
            };
            let report = RmsdDriver::new(&reference, &shuffled, config).run().unwrap();
            assert!(
                report.rmsd < 1e-6,
                "method {:?} left rmsd {}",
                method,
                report.rmsd
            );
        }
    }

    #[test]
    fn rules_to_rmsd_matches_a_fresh_search() {
        let reference = methanol();
        let shuffle = Permutation::new(vec![0, 1, 4, 3, 2, 5]).unwrap();
        let shuffled = reference.reordered(&shuffle);

        let report = RmsdDriver::new(&reference, &shuffled, RmsdConfig::default())
            .run()
            .unwrap();
        let (replayed, _) = RmsdDriver::new(&reference, &shuffled, RmsdConfig::default())
            .rules_to_rmsd(&report.permutation)
            .unwrap();
        assert!((report.rmsd - replayed).abs() < 1e-12);
    }

    #[test]
    fn mismatched_composition_is_an_input_error() {
        let a = h2();
        let b = Molecule::new(
            vec![Element::HYDROGEN, Element::OXYGEN],
            a.positions().to_vec(),
        );
        let result = RmsdDriver::new(&a, &b, RmsdConfig::default()).run();
        assert!(matches!(result, Err(EngineError::InputMismatch { .. })));
    }

    #[test]
    fn gradient_vanishes_for_identical_structures() {
        let m = methanol();
        let g = RmsdDriver::new(&m, &m, RmsdConfig::default())
            .gradient()
            .unwrap();
        assert!(g.iter().all(|v| v.norm() < 1e-12));
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let reference = methanol();
        let mut target = methanol();
        let distorted: Vec<Point3<f64>> = target
            .positions()
            .iter()
            .enumerate()
            .map(|(i, p)| Point3::new(p.x + 0.02 * i as f64, p.y - 0.01, p.z))
            .collect();
        target.set_positions(distorted);

        let analytic = RmsdDriver::new(&reference, &target, RmsdConfig::default())
            .gradient()
            .unwrap();

        let h = 1e-6;
        let atom = 2;
        let axis = 0;
        let probe = |delta: f64| {
            let mut probe_mol = target.clone();
            let mut pts = probe_mol.positions().to_vec();
            pts[atom].x += delta;
            probe_mol.set_positions(pts);
            RmsdDriver::new(&reference, &probe_mol, RmsdConfig::default())
                .best_fit_rmsd()
                .unwrap()
        };
        let numeric = (probe(h) - probe(-h)) / (2.0 * h);
        assert!(
            (analytic[atom][axis] - numeric).abs() < 1e-5,
            "analytic {} vs numeric {}",
            analytic[atom][axis],
            numeric
        );
    }

    #[test]
    fn topology_difference_is_reported_when_enabled() {
        let reference = methanol();
        let config = RmsdConfig {
            check_topology: true,
            ..RmsdConfig::default()
        };
        let report = RmsdDriver::new(&reference, &reference, config).run().unwrap();
        assert_eq!(report.topology_difference, Some(0));
    }
}
