//! Rigid-body geometry primitives.
//!
//! Everything here is pure: centroids, centering, the Kabsch best-fit
//! rotation, RMSD, distance/topology matrices and fragment decomposition.
//! Both engines and the alignment driver are built on these functions.

use super::models::element::Element;
use nalgebra::{DMatrix, Matrix3, Point3, Rotation3, Vector3};

/// Default scaling applied to covalent-radius sums when deciding whether two
/// atoms are bonded.
pub const BOND_SCALING: f64 = 1.3;

/// Arithmetic-mean centroid of a set of positions.
pub fn centroid(positions: &[Point3<f64>]) -> Point3<f64> {
    let sum: Vector3<f64> = positions.iter().map(|p| p.coords).sum();
    Point3::from(sum / positions.len().max(1) as f64)
}

/// Mass-weighted centroid (center of mass).
pub fn mass_centroid(positions: &[Point3<f64>], masses: &[f64]) -> Point3<f64> {
    let total: f64 = masses.iter().sum();
    let sum: Vector3<f64> = positions
        .iter()
        .zip(masses)
        .map(|(p, &m)| p.coords * m)
        .sum();
    Point3::from(sum / total.max(f64::MIN_POSITIVE))
}

/// Returns a copy of `positions` translated so its centroid sits at the
/// origin.
pub fn centered(positions: &[Point3<f64>]) -> Vec<Point3<f64>> {
    let c = centroid(positions);
    positions.iter().map(|p| Point3::from(p - c)).collect()
}

/// Best-fit rotation aligning the centered set `target` onto the centered set
/// `reference` (Kabsch): H = Σ tᵢ·rᵢᵀ is decomposed as H = UΣVᵀ and the
/// proper rotation is R = V·diag(1,1,d)·Uᵀ with d = sign(det(VUᵀ)).
///
/// Both inputs must already be centered; `reference` is never modified.
pub fn kabsch_rotation(
    reference: &[Point3<f64>],
    target: &[Point3<f64>],
) -> Option<Rotation3<f64>> {
    if reference.len() != target.len() || reference.is_empty() {
        return None;
    }
    let h = reference
        .iter()
        .zip(target.iter())
        .fold(Matrix3::zeros(), |acc, (r, t)| {
            acc + t.coords * r.coords.transpose()
        });

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    let d = (v_t.transpose() * u.transpose()).determinant();
    let mut correction = Matrix3::identity();
    if d < 0.0 {
        correction[(2, 2)] = -1.0;
    }

    let rotation_matrix = v_t.transpose() * correction * u.transpose();
    Some(Rotation3::from_matrix_unchecked(rotation_matrix))
}

/// RMSD between two paired position sets, assuming the pairing is correct
/// and no further alignment is wanted.
pub fn paired_rmsd(reference: &[Point3<f64>], target: &[Point3<f64>]) -> f64 {
    let n = reference.len().min(target.len());
    if n == 0 {
        return 0.0;
    }
    let sum: f64 = reference
        .iter()
        .zip(target.iter())
        .map(|(a, b)| (a - b).norm_squared())
        .sum();
    (sum / n as f64).sqrt()
}

/// Result of a best-fit superposition: the rotation applied to the centered
/// target, the aligned target coordinates (in the reference's centered
/// frame), and the residual RMSD.
#[derive(Debug, Clone)]
pub struct Superposition {
    pub rotation: Rotation3<f64>,
    pub aligned_target: Vec<Point3<f64>>,
    pub rmsd: f64,
}

/// Centers both sets, solves for the Kabsch rotation, and applies it to the
/// target. Returns `None` for empty or mismatched inputs.
pub fn superpose(reference: &[Point3<f64>], target: &[Point3<f64>]) -> Option<Superposition> {
    let ref_centered = centered(reference);
    let tar_centered = centered(target);
    let rotation = kabsch_rotation(&ref_centered, &tar_centered)?;
    let aligned: Vec<Point3<f64>> = tar_centered.iter().map(|p| rotation * p).collect();
    let rmsd = paired_rmsd(&ref_centered, &aligned);
    Some(Superposition {
        rotation,
        aligned_target: aligned,
        rmsd,
    })
}

/// Per-atom deviations |rᵢ − tᵢ| after best-fit superposition.
pub fn per_atom_deviations(reference: &[Point3<f64>], target: &[Point3<f64>]) -> Vec<f64> {
    match superpose(reference, target) {
        Some(sp) => {
            let ref_centered = centered(reference);
            ref_centered
                .iter()
                .zip(sp.aligned_target.iter())
                .map(|(a, b)| (a - b).norm())
                .collect()
        }
        None => Vec::new(),
    }
}

/// Full interatomic distance matrix.
pub fn distance_matrix(positions: &[Point3<f64>]) -> DMatrix<f64> {
    let n = positions.len();
    let mut m = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            let d = (positions[i] - positions[j]).norm();
            m[(i, j)] = d;
            m[(j, i)] = d;
        }
    }
    m
}

/// Lower-triangle distances in row order (d(1,0), d(2,0), d(2,1), ...), the
/// filtration input for the persistence-image descriptor.
pub fn lower_distance_vector(positions: &[Point3<f64>]) -> Vec<f64> {
    let n = positions.len();
    let mut v = Vec::with_capacity(n * (n - 1) / 2);
    for i in 1..n {
        for j in 0..i {
            v.push((positions[i] - positions[j]).norm());
        }
    }
    v
}

/// Bond-topology matrix: atoms are bonded when their distance is below the
/// covalent-radius sum scaled by `scaling`.
pub fn bond_topology(
    elements: &[Element],
    positions: &[Point3<f64>],
    scaling: f64,
) -> DMatrix<bool> {
    let n = elements.len();
    let mut topo = DMatrix::from_element(n, n, false);
    for i in 0..n {
        for j in (i + 1)..n {
            let cutoff = scaling * (elements[i].covalent_radius() + elements[j].covalent_radius());
            if (positions[i] - positions[j]).norm() < cutoff {
                topo[(i, j)] = true;
                topo[(j, i)] = true;
            }
        }
    }
    topo
}

/// Number of differing off-diagonal entries between two topology matrices
/// (counted once per pair).
pub fn topology_difference(a: &DMatrix<bool>, b: &DMatrix<bool>) -> usize {
    let n = a.nrows().min(b.nrows());
    let mut diff = 0;
    for i in 0..n {
        for j in (i + 1)..n {
            if a[(i, j)] != b[(i, j)] {
                diff += 1;
            }
        }
    }
    diff
}

/// Connected components of the bond graph, each sorted by atom index and the
/// component list sorted by its smallest member.
pub fn fragments(topology: &DMatrix<bool>) -> Vec<Vec<usize>> {
    let n = topology.nrows();
    let mut visited = vec![false; n];
    let mut result = Vec::new();
    for start in 0..n {
        if visited[start] {
            continue;
        }
        let mut component = Vec::new();
        let mut queue = vec![start];
        visited[start] = true;
        while let Some(i) = queue.pop() {
            component.push(i);
            for j in 0..n {
                if topology[(i, j)] && !visited[j] {
                    visited[j] = true;
                    queue.push(j);
                }
            }
        }
        component.sort_unstable();
        result.push(component);
    }
    result.sort_by_key(|c| c[0]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn water() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.9572, 0.0, 0.0),
            Point3::new(-0.24, 0.9266, 0.0),
        ]
    }

    #[test]
    fn centroid_of_symmetric_pair_is_midpoint() {
        let pts = vec![Point3::new(-1.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)];
        assert_eq!(centroid(&pts), Point3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn mass_centroid_is_pulled_toward_the_heavy_atom() {
        let pts = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)];
        let com = mass_centroid(&pts, &[15.999, 1.008]);
        assert!(com.x < 0.1);
    }

    #[test]
    fn superpose_identical_sets_gives_zero_rmsd() {
        let w = water();
        let sp = superpose(&w, &w).unwrap();
        assert!(sp.rmsd < 1e-12);
    }

    #[test]
    fn superpose_recovers_a_pure_rotation() {
        let w = water();
        let rot = Rotation3::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        let rotated: Vec<Point3<f64>> = w.iter().map(|p| rot * p).collect();
        let sp = superpose(&w, &rotated).unwrap();
        assert!(sp.rmsd < 1e-9, "rmsd was {}", sp.rmsd);
    }

    #[test]
    fn superpose_is_insensitive_to_translation() {
        let w = water();
        let shifted: Vec<Point3<f64>> = w
            .iter()
            .map(|p| p + Vector3::new(5.0, -3.0, 7.0))
            .collect();
        let sp = superpose(&w, &shifted).unwrap();
        assert!(sp.rmsd < 1e-12);
    }

    #[test]
    fn kabsch_rotation_is_proper() {
        let w = water();
        let mirrored: Vec<Point3<f64>> = w
            .iter()
            .map(|p| Point3::new(-p.x, p.y, p.z))
            .collect();
        let sp = superpose(&w, &mirrored).unwrap();
        let det = sp.rotation.matrix().determinant();
        assert!((det - 1.0).abs() < 1e-9, "det was {}", det);
    }

    #[test]
    fn bond_topology_finds_both_oh_bonds_and_no_hh_bond() {
        let elements = vec![Element::OXYGEN, Element::HYDROGEN, Element::HYDROGEN];
        let topo = bond_topology(&elements, &water(), BOND_SCALING);
        assert!(topo[(0, 1)]);
        assert!(topo[(0, 2)]);
        assert!(!topo[(1, 2)]);
    }

    #[test]
    fn fragments_separate_two_distant_molecules() {
        let elements = vec![
            Element::OXYGEN,
            Element::HYDROGEN,
            Element::HYDROGEN,
            Element::OXYGEN,
            Element::HYDROGEN,
            Element::HYDROGEN,
        ];
        let mut positions = water();
        for p in water() {
            positions.push(p + Vector3::new(10.0, 0.0, 0.0));
        }
        let topo = bond_topology(&elements, &positions, BOND_SCALING);
        let frags = fragments(&topo);
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0], vec![0, 1, 2]);
        assert_eq!(frags[1], vec![3, 4, 5]);
    }

    #[test]
    fn topology_difference_counts_changed_pairs_once() {
        let elements = vec![Element::OXYGEN, Element::HYDROGEN, Element::HYDROGEN];
        let a = bond_topology(&elements, &water(), BOND_SCALING);
        let stretched = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(5.0, 0.0, 0.0),
            Point3::new(-0.24, 0.9266, 0.0),
        ];
        let b = bond_topology(&elements, &stretched, BOND_SCALING);
        assert_eq!(topology_difference(&a, &b), 1);
    }

    #[test]
    fn lower_distance_vector_has_triangular_length() {
        let v = lower_distance_vector(&water());
        assert_eq!(v.len(), 3);
        assert!((v[0] - 0.9572).abs() < 1e-9);
    }
}
