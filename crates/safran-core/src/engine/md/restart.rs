//! MD restart records.
//!
//! Everything needed to continue a run bit-for-bit: integrator settings,
//! phase-space state, running averages, constraint tables, thermostat chain
//! variables and the metadynamics pool. Vectors are stored as plain triples
//! so the record stays readable and independent of the linear-algebra
//! crate's serialization.

use super::bias::BiasStructure;
use crate::engine::error::EngineError;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub type Triple = [f64; 3];

pub fn to_triples(vectors: &[Vector3<f64>]) -> Vec<Triple> {
    vectors.iter().map(|v| [v.x, v.y, v.z]).collect()
}

pub fn from_triples(triples: &[Triple]) -> Vec<Vector3<f64>> {
    triples
        .iter()
        .map(|t| Vector3::new(t[0], t[1], t[2]))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConstraintRecord {
    pub i: usize,
    pub j: usize,
    /// Squared reference distance, Bohr².
    pub d: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BiasRecord {
    pub geometry: Vec<Triple>,
    pub rmsd_reference: f64,
    pub energy: f64,
    pub factor: f64,
    pub counter: u64,
    pub step_deposited: usize,
    pub index: usize,
}

impl From<&BiasStructure> for BiasRecord {
    fn from(s: &BiasStructure) -> BiasRecord {
        BiasRecord {
            geometry: s.geometry.iter().map(|p| [p.x, p.y, p.z]).collect(),
            rmsd_reference: s.rmsd_reference,
            energy: s.energy,
            factor: s.factor,
            counter: s.counter,
            step_deposited: s.step_deposited,
            index: s.index,
        }
    }
}

impl From<&BiasRecord> for BiasStructure {
    fn from(r: &BiasRecord) -> BiasStructure {
        BiasStructure {
            geometry: r
                .geometry
                .iter()
                .map(|t| Point3::new(t[0], t[1], t[2]))
                .collect(),
            rmsd_reference: r.rmsd_reference,
            energy: r.energy,
            factor: r.factor,
            counter: r.counter,
            step_deposited: r.step_deposited,
            index: r.index,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MdRestart {
    pub method: String,
    pub thermostat: String,
    /// fs.
    pub dt: f64,
    /// fs.
    pub max_time: f64,
    pub temperature: f64,
    pub step: usize,
    /// Simulated time, fs.
    pub time: f64,
    pub seed: u64,

    /// Bohr.
    pub positions: Vec<Triple>,
    /// Bohr per atomic time unit.
    pub velocities: Vec<Triple>,
    /// Hartree/Bohr.
    pub gradient: Vec<Triple>,

    pub average_temperature: f64,
    pub average_epot: f64,
    pub average_ekin: f64,
    pub average_etot: f64,
    pub average_wall: f64,
    pub average_virial: f64,

    pub xi: Vec<f64>,
    pub q: Vec<f64>,

    pub constraints_12: Vec<ConstraintRecord>,
    pub constraints_13: Vec<ConstraintRecord>,

    pub bias: Vec<BiasRecord>,
    pub ekin_exchange: f64,
}

impl MdRestart {
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::RestartCorrupt(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<MdRestart, EngineError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EngineError::RestartCorrupt(e.to_string()))?;
        let record: MdRestart = serde_json::from_str(&text)
            .map_err(|e| EngineError::RestartCorrupt(e.to_string()))?;
        if record.positions.len() != record.velocities.len() {
            return Err(EngineError::RestartCorrupt(
                "positions and velocities differ in length".into(),
            ));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("md.restart.json");

        let record = MdRestart {
            method: "lj".into(),
            thermostat: "csvr".into(),
            dt: 1.0,
            step: 42,
            positions: vec![[0.1, 0.2, 0.3], [1.0, 2.0, 3.0]],
            velocities: vec![[0.0, 0.0, 1e-4], [0.0, -1e-4, 0.0]],
            gradient: vec![[0.0; 3], [0.0; 3]],
            xi: vec![0.0, 9.0],
            q: vec![1.0, 10.0],
            constraints_12: vec![ConstraintRecord {
                i: 0,
                j: 1,
                d: 3.5,
            }],
            ..MdRestart::default()
        };
        record.write(&path).unwrap();

        let loaded = MdRestart::load(&path).unwrap();
        assert_eq!(loaded.step, 42);
        // bitwise identity matters for restart-continuation determinism
        assert_eq!(loaded.positions, record.positions);
        assert_eq!(loaded.velocities, record.velocities);
        assert_eq!(loaded.constraints_12[0].d, 3.5);
    }

    #[test]
    fn mismatched_arrays_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("md.restart.json");
        let record = MdRestart {
            positions: vec![[0.0; 3]],
            velocities: vec![],
            ..MdRestart::default()
        };
        record.write(&path).unwrap();
        assert!(matches!(
            MdRestart::load(&path),
            Err(EngineError::RestartCorrupt(_))
        ));
    }

    #[test]
    fn bias_records_convert_both_ways() {
        let structure = BiasStructure {
            geometry: vec![Point3::new(1.0, 2.0, 3.0)],
            rmsd_reference: 0.5,
            energy: 0.01,
            factor: 2.0,
            counter: 7,
            step_deposited: 100,
            index: 3,
        };
        let record = BiasRecord::from(&structure);
        let back = BiasStructure::from(&record);
        assert_eq!(back.geometry[0], structure.geometry[0]);
        assert_eq!(back.counter, 7);
        assert_eq!(back.index, 3);
    }
}
