// not every test binary uses every helper
#![allow(dead_code)]

use nalgebra::Point3;
use safran_core::core::models::{Element, Molecule, Permutation};

/// Gas-phase water monomer.
pub fn water(origin: [f64; 3]) -> Molecule {
    Molecule::new(
        vec![Element::OXYGEN, Element::HYDROGEN, Element::HYDROGEN],
        vec![
            Point3::new(origin[0], origin[1], origin[2]),
            Point3::new(origin[0] + 0.9572, origin[1], origin[2]),
            Point3::new(origin[0] - 0.24, origin[1] + 0.9266, origin[2]),
        ],
    )
}

/// A hydrogen-bonded water dimer (donor and acceptor are inequivalent, so
/// permutations never coincide with a symmetry operation).
pub fn water_dimer() -> Molecule {
    let donor = water([0.0, 0.0, 0.0]);
    let acceptor = water([2.9, 0.4, 0.3]);
    let mut elements = donor.elements().to_vec();
    elements.extend_from_slice(acceptor.elements());
    let mut positions = donor.positions().to_vec();
    positions.extend_from_slice(acceptor.positions());
    Molecule::new(elements, positions)
}

/// Methanol with a slightly asymmetric methyl group; `oh_site` in {0, 1, 2}
/// selects the hydroxyl-hydrogen torsion site, giving geometrically
/// distinct conformers.
pub fn methanol_conformer(oh_site: usize) -> Molecule {
    let oh = [
        Point3::new(0.865, -1.057, 0.0),
        Point3::new(-0.43, -1.057, 0.75),
        Point3::new(-0.43, -1.057, -0.75),
    ];
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
            oh[oh_site % 3],
        ],
    )
}

pub fn perm(indices: &[usize]) -> Permutation {
    Permutation::new(indices.to_vec()).expect("test permutation must be valid")
}
