//! Incremental atom-reordering by bounded beam search.
//!
//! A partial permutation assigns target atoms to the first `m` reference
//! slots. Each level extends every surviving partial by one candidate atom
//! of the matching element, re-superposes the assigned subset, and scores it
//! with the configured cost kernel. Only the best `limit` partials survive
//! to the next level; ties break by lower cost, then by earlier candidate
//! atom index. The search ends when a completed permutation reaches the
//! target RMSD or all levels are exhausted.

use super::cost::CostKernel;
use crate::core::geometry;
use crate::core::models::{Molecule, Permutation};
use nalgebra::Point3;

#[derive(Debug, Clone)]
struct Partial {
    assigned: Vec<usize>,
    used: Vec<bool>,
    cost: f64,
}

/// Scores a partial assignment: kernel cost summed over the assigned pairs
/// after best-fit superposition of the assigned subsets.
fn partial_cost(
    reference: &[Point3<f64>],
    target: &[Point3<f64>],
    assigned: &[usize],
    kernel: CostKernel,
) -> f64 {
    let ref_subset: Vec<Point3<f64>> = reference[..assigned.len()].to_vec();
    let tar_subset: Vec<Point3<f64>> = assigned.iter().map(|&j| target[j]).collect();

    if assigned.len() < 2 {
        return 0.0;
    }
    match geometry::superpose(&ref_subset, &tar_subset) {
        Some(sp) => {
            let ref_centered = geometry::centered(&ref_subset);
            ref_centered
                .iter()
                .zip(sp.aligned_target.iter())
                .map(|(r, t)| {
                    let distance = (r - t).norm();
                    let norm = r.coords.norm() * t.coords.norm();
                    kernel.evaluate(distance, norm)
                })
                .sum()
        }
        None => f64::INFINITY,
    }
}

/// Runs the beam search; returns the best complete permutation found, or
/// `None` when the beam dies out (which only happens on element-mismatched
/// inputs).
pub fn beam_search(
    reference: &Molecule,
    target: &Molecule,
    limit: usize,
    kernel: CostKernel,
    target_rmsd: f64,
) -> Option<Permutation> {
    let n = reference.atom_count();
    if n == 0 || n != target.atom_count() {
        return None;
    }
    let limit = limit.max(1);
    let ref_positions = reference.positions();
    let tar_positions = target.positions();

    let mut beam = vec![Partial {
        assigned: Vec::new(),
        used: vec![false; n],
        cost: 0.0,
    }];

    for slot in 0..n {
        let wanted = reference.elements()[slot];
        let mut extended: Vec<Partial> = Vec::with_capacity(beam.len() * 4);

        for partial in &beam {
            for candidate in 0..n {
                if partial.used[candidate] || target.elements()[candidate] != wanted {
                    continue;
                }
                let mut assigned = partial.assigned.clone();
                assigned.push(candidate);
                let cost = partial_cost(ref_positions, tar_positions, &assigned, kernel);
                let mut used = partial.used.clone();
                used[candidate] = true;
                extended.push(Partial {
                    assigned,
                    used,
                    cost,
                });
            }
        }

        if extended.is_empty() {
            return None;
        }

        extended.sort_by(|a, b| {
            a.cost
                .partial_cmp(&b.cost)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.assigned.last().cmp(&b.assigned.last()))
        });
        extended.truncate(limit);

        // early exit: a completed partial already below the target RMSD wins
        if slot + 1 == n && target_rmsd > 0.0 {
            for candidate in &extended {
                let perm = Permutation::new(candidate.assigned.clone()).ok()?;
                let reordered = target.reordered(&perm);
                if let Some(sp) = geometry::superpose(ref_positions, reordered.positions()) {
                    if sp.rmsd <= target_rmsd {
                        return Some(perm);
                    }
                }
            }
        }

        beam = extended;
    }

    beam.into_iter()
        .min_by(|a, b| {
            a.cost
                .partial_cmp(&b.cost)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .and_then(|best| Permutation::new(best.assigned).ok())
}
