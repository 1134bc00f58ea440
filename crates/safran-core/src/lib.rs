//! # Safran Core Library
//!
//! A toolkit for conformer-ensemble deduplication and molecular dynamics,
//! built around a root-mean-square-deviation aligner that solves the
//! atom-permutation problem between chemically identical structures.
//!
//! ## Architectural Philosophy
//!
//! The library is designed with a strict three-layer architecture to ensure a
//! clear separation of concerns, making it modular, testable, and extensible.
//!
//! - **[`core`]: The Foundation.** Contains stateless data models
//!   ([`core::models::Molecule`], permutations, the ensemble arena), pure
//!   geometry (centroid, Kabsch alignment, bond topology, fragments),
//!   descriptor functions (rotational constants, persistence images) and
//!   XYZ trajectory I/O.
//!
//! - **[`engine`]: The Logic Core.** This stateful layer hosts the two
//!   engines and their shared machinery: the reordering RMSD driver
//!   (cost matrices, Hungarian assignment, incremental beam search), the
//!   three-pass conformer scanner, and the MD integrator with constraints,
//!   thermostats, confining walls and RMSD metadynamics.
//!
//! - **[`workflows`]: The Public API.** The highest-level, user-facing layer.
//!   It ties the `engine` and `core` together into complete procedures:
//!   scanning a trajectory file into a deduplicated ensemble, or running a
//!   full dynamics simulation from a configuration blob.
//!
//! The quantum-chemical energy backend is deliberately *not* part of this
//! crate: it enters through the [`energy::EnergyModel`] trait, and only a
//! simple pairwise reference model ships here.

pub mod core;
pub mod energy;
pub mod engine;
pub mod workflows;
