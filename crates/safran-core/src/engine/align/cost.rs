//! Assignment-cost matrices.
//!
//! Given a reference and a target geometry (already centered and rotated
//! into a common frame), the builder fills an n×n matrix of per-pair
//! assignment costs. Rows and columns outside the eligibility lists, and
//! element-incompatible pairs, carry a huge sentinel so the solver never
//! picks them. The sum of per-row minima doubles as a cheap lower bound for
//! the outer search.

use crate::core::constants::COST_SENTINEL;
use crate::core::models::Element;
use nalgebra::{DMatrix, Point3};
use serde::{Deserialize, Serialize};

/// The scalar kernel mapping a pair's (distance, norm product) to a cost.
/// The numeric names follow the `costmatrix` configuration parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum CostKernel {
    /// 1: squared Euclidean distance (the default).
    #[default]
    SquaredDistance,
    /// 2: plain Euclidean distance.
    Distance,
    /// 3: distance plus norm product.
    DistancePlusNorm,
    /// 4: squared distance plus squared norm product.
    SquaredDistancePlusNorm,
    /// 5: distance times norm product.
    DistanceTimesNorm,
    /// 6: squared distance times squared norm product.
    SquaredDistanceTimesNorm,
}

impl CostKernel {
    #[inline]
    pub fn evaluate(&self, distance: f64, norm: f64) -> f64 {
        match self {
            CostKernel::SquaredDistance => distance * distance,
            CostKernel::Distance => distance,
            CostKernel::DistancePlusNorm => distance + norm,
            CostKernel::SquaredDistancePlusNorm => distance * distance + norm * norm,
            CostKernel::DistanceTimesNorm => distance * norm,
            CostKernel::SquaredDistanceTimesNorm => distance * distance * norm * norm,
        }
    }
}

impl TryFrom<u8> for CostKernel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        // unknown selectors fall back to the default kernel, matching the
        // permissive behavior of the configuration surface
        Ok(match value {
            2 => CostKernel::Distance,
            3 => CostKernel::DistancePlusNorm,
            4 => CostKernel::SquaredDistancePlusNorm,
            5 => CostKernel::DistanceTimesNorm,
            6 => CostKernel::SquaredDistanceTimesNorm,
            _ => CostKernel::SquaredDistance,
        })
    }
}

impl From<CostKernel> for u8 {
    fn from(value: CostKernel) -> u8 {
        match value {
            CostKernel::SquaredDistance => 1,
            CostKernel::Distance => 2,
            CostKernel::DistancePlusNorm => 3,
            CostKernel::SquaredDistancePlusNorm => 4,
            CostKernel::DistanceTimesNorm => 5,
            CostKernel::SquaredDistanceTimesNorm => 6,
        }
    }
}

/// A built cost matrix plus the sum of per-row minima (a lower bound on the
/// optimal assignment cost).
#[derive(Debug, Clone)]
pub struct CostMatrix {
    pub matrix: DMatrix<f64>,
    pub lower_bound: f64,
}

/// Builds the assignment-cost matrix between `reference` and `target`.
///
/// `reference_atoms` / `target_atoms` restrict which rows/columns are
/// eligible; pass the full index range for an unrestricted build. When
/// element slices are provided, element-incompatible pairs are blocked with
/// the sentinel as well.
pub fn build_cost_matrix(
    reference: &[Point3<f64>],
    target: &[Point3<f64>],
    reference_atoms: &[usize],
    target_atoms: &[usize],
    elements: Option<(&[Element], &[Element])>,
    kernel: CostKernel,
) -> CostMatrix {
    let n = reference.len().max(target.len());
    let mut matrix = DMatrix::from_element(n, n, COST_SENTINEL);

    for &i in reference_atoms {
        for &j in target_atoms {
            if let Some((ref_elements, tar_elements)) = elements {
                if ref_elements[i] != tar_elements[j] {
                    continue;
                }
            }
            let distance = (reference[i] - target[j]).norm();
            let norm = reference[i].coords.norm() * target[j].coords.norm();
            matrix[(i, j)] = kernel.evaluate(distance, norm);
        }
    }

    let lower_bound = (0..matrix.nrows())
        .map(|i| {
            matrix
                .row(i)
                .iter()
                .fold(f64::INFINITY, |acc, &c| acc.min(c))
        })
        .filter(|&m| m < COST_SENTINEL)
        .sum();

    CostMatrix { matrix, lower_bound }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_table_matches_selectors() {
        assert_eq!(CostKernel::SquaredDistance.evaluate(2.0, 3.0), 4.0);
        assert_eq!(CostKernel::Distance.evaluate(2.0, 3.0), 2.0);
        assert_eq!(CostKernel::DistancePlusNorm.evaluate(2.0, 3.0), 5.0);
        assert_eq!(CostKernel::SquaredDistancePlusNorm.evaluate(2.0, 3.0), 13.0);
        assert_eq!(CostKernel::DistanceTimesNorm.evaluate(2.0, 3.0), 6.0);
        assert_eq!(
            CostKernel::SquaredDistanceTimesNorm.evaluate(2.0, 3.0),
            36.0
        );
    }

    #[test]
    fn unknown_selector_falls_back_to_squared_distance() {
        assert_eq!(CostKernel::try_from(0).unwrap(), CostKernel::SquaredDistance);
        assert_eq!(
            CostKernel::try_from(99).unwrap(),
            CostKernel::SquaredDistance
        );
    }

    #[test]
    fn element_incompatible_pairs_carry_the_sentinel() {
        let positions = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)];
        let ref_elements = vec![Element::OXYGEN, Element::HYDROGEN];
        let tar_elements = vec![Element::HYDROGEN, Element::OXYGEN];
        let cm = build_cost_matrix(
            &positions,
            &positions,
            &[0, 1],
            &[0, 1],
            Some((&ref_elements, &tar_elements)),
            CostKernel::SquaredDistance,
        );
        assert_eq!(cm.matrix[(0, 0)], COST_SENTINEL);
        assert_eq!(cm.matrix[(1, 1)], COST_SENTINEL);
        assert!(cm.matrix[(0, 1)] < COST_SENTINEL);
        assert!(cm.matrix[(1, 0)] < COST_SENTINEL);
    }

    #[test]
    fn lower_bound_is_the_sum_of_row_minima() {
        let reference = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)];
        let target = vec![Point3::new(0.0, 1.0, 0.0), Point3::new(2.0, 1.0, 0.0)];
        let cm = build_cost_matrix(
            &reference,
            &target,
            &[0, 1],
            &[0, 1],
            None,
            CostKernel::SquaredDistance,
        );
        // each row's minimum is 1.0 (the vertical offset squared)
        assert!((cm.lower_bound - 2.0).abs() < 1e-12);
    }

    #[test]
    fn restricted_rows_keep_the_sentinel_everywhere() {
        let positions = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)];
        let cm = build_cost_matrix(
            &positions,
            &positions,
            &[0],
            &[0, 1],
            None,
            CostKernel::SquaredDistance,
        );
        assert_eq!(cm.matrix[(1, 0)], COST_SENTINEL);
        assert_eq!(cm.matrix[(1, 1)], COST_SENTINEL);
    }
}
