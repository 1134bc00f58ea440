//! Conformer-scan workflow: trajectory file in, deduplicated ensemble out.

use crate::engine::error::EngineError;
use crate::engine::progress::ProgressReporter;
use crate::engine::scan::{ConfScan, ScanConfig, ScanOutcome};
use std::path::Path;
use tracing::{info, instrument};

/// Runs the full three-pass scan on an XYZ/TRJ ensemble file. Output files
/// are placed next to the input, named by the input's basename.
#[instrument(skip_all, name = "scan_workflow", fields(input = %input.as_ref().display()))]
pub fn run(
    input: impl AsRef<Path>,
    config: ScanConfig,
    reporter: &ProgressReporter,
) -> Result<ScanOutcome, EngineError> {
    let input = input.as_ref();
    let basename = input.with_extension("");

    let mut scan = ConfScan::new(config, basename, reporter)?;
    let loaded = scan.load_trajectory(input)?;
    info!(structures = loaded, "starting conformer scan");

    let outcome = scan.run()?;
    info!(
        accepted = outcome.accepted.len(),
        tau = outcome.tau,
        stopped = outcome.stopped,
        "scan workflow complete"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::xyz::XyzWriter;
    use crate::core::models::{Element, Molecule};
    use nalgebra::Point3;

    #[test]
    fn workflow_runs_end_to_end_from_a_trajectory_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ensemble.xyz");

        let mut writer = XyzWriter::create(&input).unwrap();
        // two identical structures plus one with a stretched O-H bond
        for (oh_length, energy) in [(0.9572, -1.0), (0.9572, -1.0), (1.35, -0.5)] {
            let mut mol = Molecule::new(
                vec![Element::OXYGEN, Element::HYDROGEN, Element::HYDROGEN],
                vec![
                    Point3::new(0.0, 0.0, 0.0),
                    Point3::new(oh_length, 0.0, 0.0),
                    Point3::new(-0.24, 0.9266, 0.0),
                ],
            );
            mol.set_energy(energy);
            writer.write_frame(&mol).unwrap();
        }
        drop(writer);

        let reporter = ProgressReporter::new();
        let config = ScanConfig {
            rmsd_threshold: Some(0.1),
            ..ScanConfig::default()
        };
        let outcome = run(&input, config, &reporter).unwrap();
        assert_eq!(outcome.accepted.len(), 2);
        assert!(dir.path().join("ensemble.accepted.xyz").exists());
        assert!(dir.path().join("ensemble.restart.json").exists());
    }
}
