//! Scanner restart records.
//!
//! One JSON file per run, rewritten after every pass. A malformed or
//! missing record is never fatal: loading degrades to defaults with a
//! warning, per the error-handling policy.

use super::thresholds::ThresholdTriple;
use crate::core::models::permutation::{Permutation, ReorderRuleCache};
use crate::engine::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanRestart {
    pub reorder_rules: Vec<Vec<usize>>,
    pub reference_last_energy: f64,
    pub target_last_energy: f64,
    pub delta_e: f64,
    pub d_loose_energy: f64,
    pub d_loose_image: f64,
    pub d_loose_rotational: f64,
    pub d_tight_energy: f64,
    pub d_tight_image: f64,
    pub d_tight_rotational: f64,
}

impl ScanRestart {
    pub fn loose(&self) -> ThresholdTriple {
        ThresholdTriple {
            energy: self.d_loose_energy,
            image: self.d_loose_image,
            rotational: self.d_loose_rotational,
        }
    }

    pub fn tight(&self) -> ThresholdTriple {
        ThresholdTriple {
            energy: self.d_tight_energy,
            image: self.d_tight_image,
            rotational: self.d_tight_rotational,
        }
    }

    pub fn set_thresholds(&mut self, loose: ThresholdTriple, tight: ThresholdTriple) {
        self.d_loose_energy = loose.energy;
        self.d_loose_image = loose.image;
        self.d_loose_rotational = loose.rotational;
        self.d_tight_energy = tight.energy;
        self.d_tight_image = tight.image;
        self.d_tight_rotational = tight.rotational;
    }

    pub fn set_rules(&mut self, cache: &ReorderRuleCache) {
        self.reorder_rules = cache
            .iter()
            .map(|rule| rule.indices().to_vec())
            .collect();
    }

    /// Rebuilds the rule cache; silently drops entries that are not valid
    /// permutations (a corrupt record must not poison the run).
    pub fn rules(&self) -> ReorderRuleCache {
        let mut cache = ReorderRuleCache::new();
        for indices in &self.reorder_rules {
            match Permutation::new(indices.clone()) {
                Ok(rule) => {
                    cache.insert(rule);
                }
                Err(e) => warn!("dropping invalid restart rule: {}", e),
            }
        }
        cache
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::RestartCorrupt(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Loads a record, mapping every failure mode to `RestartCorrupt` so
    /// callers can uniformly degrade to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<ScanRestart, EngineError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EngineError::RestartCorrupt(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| EngineError::RestartCorrupt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_round_trips_rules_and_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.restart.json");

        let mut cache = ReorderRuleCache::new();
        cache.insert(Permutation::new(vec![1, 0, 2]).unwrap());
        cache.insert(Permutation::new(vec![2, 1, 0]).unwrap());

        let mut record = ScanRestart::default();
        record.set_rules(&cache);
        record.set_thresholds(
            ThresholdTriple {
                energy: 1.5,
                image: 0.2,
                rotational: 40.0,
            },
            ThresholdTriple {
                energy: 0.1,
                image: 0.01,
                rotational: 2.0,
            },
        );
        record.write(&path).unwrap();

        let loaded = ScanRestart::load(&path).unwrap();
        assert_eq!(loaded.rules().len(), 2);
        assert_eq!(loaded.loose().energy, 1.5);
        assert_eq!(loaded.tight().rotational, 2.0);
    }

    #[test]
    fn corrupt_record_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.restart.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ScanRestart::load(&path),
            Err(EngineError::RestartCorrupt(_))
        ));
    }

    #[test]
    fn invalid_rules_are_dropped_on_load() {
        let record = ScanRestart {
            reorder_rules: vec![vec![0, 0, 1], vec![1, 0]],
            ..ScanRestart::default()
        };
        let cache = record.rules();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn missing_file_reports_restart_corrupt() {
        assert!(matches!(
            ScanRestart::load("/nonexistent/scan.restart.json"),
            Err(EngineError::RestartCorrupt(_))
        ));
    }
}
