pub mod element;
pub mod ensemble;
pub mod molecule;
pub mod permutation;

pub use element::Element;
pub use ensemble::EnsembleArena;
pub use molecule::Molecule;
pub use permutation::Permutation;
