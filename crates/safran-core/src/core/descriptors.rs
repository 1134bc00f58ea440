//! Cheap shape descriptors used by the scanner's pre-filter.
//!
//! Both are pure functions of a geometry: rotational constants from the
//! principal moments of inertia, and a persistence-image-style descriptor of
//! the interatomic-distance filtration. The scanner only ever compares the
//! element-wise absolute difference of these between two structures, so the
//! descriptors need to be stable, not spectroscopically exact.

use super::constants::{AMU_ANGSTROM2_TO_KG_M2, PLANCK_J_S};
use super::models::element::Element;
use nalgebra::{DMatrix, Matrix3, Point3};
use std::f64::consts::PI;

/// Side length of the square persistence-image grid.
pub const IMAGE_RESOLUTION: usize = 10;

/// Gaussian spread (Å) used when smearing distance pairs onto the grid.
const IMAGE_SIGMA: f64 = 0.35;

/// Rotational constants (Ia ≥ Ib ≥ Ic order by constant, i.e. ascending
/// moment of inertia) in MHz, from the mass-weighted inertia tensor.
///
/// Linear molecules produce one (near-)zero moment; the corresponding
/// constant is reported as 0 rather than infinity.
pub fn rotational_constants(elements: &[Element], positions: &[Point3<f64>]) -> [f64; 3] {
    let masses: Vec<f64> = elements.iter().map(|e| e.mass()).collect();
    let com = super::geometry::mass_centroid(positions, &masses);

    let mut tensor: Matrix3<f64> = Matrix3::zeros();
    for (p, &m) in positions.iter().zip(&masses) {
        let r = p - com;
        let (x, y, z) = (r.x, r.y, r.z);
        tensor[(0, 0)] += m * (y * y + z * z);
        tensor[(1, 1)] += m * (x * x + z * z);
        tensor[(2, 2)] += m * (x * x + y * y);
        tensor[(0, 1)] -= m * x * y;
        tensor[(0, 2)] -= m * x * z;
        tensor[(1, 2)] -= m * y * z;
    }
    tensor[(1, 0)] = tensor[(0, 1)];
    tensor[(2, 0)] = tensor[(0, 2)];
    tensor[(2, 1)] = tensor[(1, 2)];

    let eigen = nalgebra::SymmetricEigen::new(tensor);
    let mut moments: Vec<f64> = eigen.eigenvalues.iter().copied().collect();
    moments.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let mut constants = [0.0; 3];
    for (k, &moment) in moments.iter().enumerate() {
        if moment > 1e-10 {
            let inertia_si = moment * AMU_ANGSTROM2_TO_KG_M2;
            constants[k] = PLANCK_J_S / (8.0 * PI * PI * inertia_si) / 1e6;
        }
    }
    constants
}

/// Persistence-image descriptor of the interatomic-distance filtration.
///
/// The lower-triangle distance vector is interpreted as a set of
/// (birth, persistence) samples on a fixed grid spanning [0, d_max]; each
/// sample is smeared with a Gaussian and weighted by its persistence. The
/// output is a fixed-size dense matrix so two structures with the same atom
/// count always produce comparable images.
pub fn persistence_image(lower_distances: &[f64]) -> DMatrix<f64> {
    let mut image = DMatrix::zeros(IMAGE_RESOLUTION, IMAGE_RESOLUTION);
    if lower_distances.is_empty() {
        return image;
    }
    let d_max = lower_distances
        .iter()
        .fold(0.0_f64, |acc, &d| acc.max(d))
        .max(1e-6);
    let cell = d_max / IMAGE_RESOLUTION as f64;
    let two_sigma2 = 2.0 * IMAGE_SIGMA * IMAGE_SIGMA;

    let mut sorted = lower_distances.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    for (rank, &birth) in sorted.iter().enumerate() {
        // persistence of a pair: how long it survives the filtration,
        // approximated by its gap to the next larger distance
        let death = sorted.get(rank + 1).copied().unwrap_or(d_max);
        let persistence = (death - birth).max(cell * 0.1);

        for row in 0..IMAGE_RESOLUTION {
            for col in 0..IMAGE_RESOLUTION {
                let gx = (col as f64 + 0.5) * cell;
                let gy = (row as f64 + 0.5) * cell;
                let dx = gx - birth;
                let dy = gy - persistence;
                image[(row, col)] += persistence * (-(dx * dx + dy * dy) / two_sigma2).exp();
            }
        }
    }
    image
}

/// Sum of absolute element-wise differences of two images, the scalar ΔH the
/// scanner thresholds on.
pub fn image_difference(a: &DMatrix<f64>, b: &DMatrix<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water_positions() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.9572, 0.0, 0.0),
            Point3::new(-0.24, 0.9266, 0.0),
        ]
    }

    fn water_elements() -> Vec<Element> {
        vec![Element::OXYGEN, Element::HYDROGEN, Element::HYDROGEN]
    }

    #[test]
    fn water_constants_are_positive_and_descending() {
        let c = rotational_constants(&water_elements(), &water_positions());
        assert!(c[0] > c[1] && c[1] > c[2]);
        assert!(c[2] > 0.0);
        // water's A constant is on the order of hundreds of GHz
        assert!(c[0] > 1e5 && c[0] < 1e7, "A = {} MHz", c[0]);
    }

    #[test]
    fn rotational_constants_are_invariant_under_rotation() {
        use nalgebra::{Rotation3, Vector3};
        let rot = Rotation3::from_axis_angle(&Vector3::y_axis(), 1.1);
        let rotated: Vec<Point3<f64>> = water_positions().iter().map(|p| rot * p).collect();
        let a = rotational_constants(&water_elements(), &water_positions());
        let b = rotational_constants(&water_elements(), &rotated);
        for k in 0..3 {
            assert!((a[k] - b[k]).abs() / a[k].max(1.0) < 1e-9);
        }
    }

    #[test]
    fn linear_molecule_reports_zero_for_the_vanishing_moment() {
        let elements = vec![Element::OXYGEN, Element::OXYGEN];
        let positions = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.21, 0.0, 0.0)];
        let c = rotational_constants(&elements, &positions);
        assert_eq!(c[0], 0.0);
        assert!(c[1] > 0.0);
    }

    #[test]
    fn identical_geometries_give_identical_images() {
        let lower = crate::core::geometry::lower_distance_vector(&water_positions());
        let a = persistence_image(&lower);
        let b = persistence_image(&lower);
        assert_eq!(image_difference(&a, &b), 0.0);
    }

    #[test]
    fn distorted_geometry_gives_a_different_image() {
        let lower = crate::core::geometry::lower_distance_vector(&water_positions());
        let stretched = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.6, 0.0, 0.0),
            Point3::new(-0.24, 0.9266, 0.0),
        ];
        let lower2 = crate::core::geometry::lower_distance_vector(&stretched);
        let diff = image_difference(&persistence_image(&lower), &persistence_image(&lower2));
        assert!(diff > 1e-3);
    }

    #[test]
    fn empty_input_yields_a_zero_image() {
        let img = persistence_image(&[]);
        assert_eq!(img.sum(), 0.0);
    }
}
