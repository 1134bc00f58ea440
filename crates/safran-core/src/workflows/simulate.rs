//! MD workflow: starting structure in, trajectory and restart records out.

use crate::core::io::xyz::XyzReader;
use crate::core::models::Molecule;
use crate::energy::{EnergyModel, HarmonicBondModel, LennardJonesModel};
use crate::engine::error::EngineError;
use crate::engine::md::{MdConfig, MdOutcome, SimpleMd};
use crate::engine::progress::ProgressReporter;
use std::path::Path;
use tracing::{info, instrument};

/// Resolves the configured method name to one of the built-in pairwise
/// models. Electronic-structure backends are external: callers with one
/// use [`run_with_model`] directly.
pub fn resolve_model(method: &str) -> Result<Box<dyn EnergyModel>, EngineError> {
    match method {
        "lj" | "lennard-jones" => Ok(Box::new(LennardJonesModel::argon())),
        "harmonic" => Ok(Box::new(HarmonicBondModel::new(0.3))),
        other => Err(EngineError::Config(format!(
            "unknown energy method '{}'; built-in methods are 'lj' and 'harmonic'",
            other
        ))),
    }
}

/// Runs a simulation from the first frame of an XYZ file with a built-in
/// energy model.
#[instrument(skip_all, name = "md_workflow", fields(input = %input.as_ref().display()))]
pub fn run(
    input: impl AsRef<Path>,
    config: MdConfig,
    reporter: &ProgressReporter,
) -> Result<MdOutcome, EngineError> {
    let input = input.as_ref();
    let molecule = XyzReader::open(input)?
        .next()
        .transpose()?
        .ok_or_else(|| EngineError::Config("the input file holds no structure".into()))?;
    let model = resolve_model(&config.method)?;
    run_with_model(molecule, model, config, input.with_extension(""), reporter)
}

/// Runs a simulation with a caller-supplied energy model.
pub fn run_with_model<'a>(
    molecule: Molecule,
    model: Box<dyn EnergyModel + 'a>,
    config: MdConfig,
    basename: impl Into<std::path::PathBuf>,
    reporter: &'a ProgressReporter<'a>,
) -> Result<MdOutcome, EngineError> {
    let mut md = SimpleMd::new(config, molecule, model, basename, reporter)?;
    let outcome = md.run()?;
    info!(
        steps = outcome.steps,
        time_fs = outcome.time_fs,
        average_temperature = outcome.averages.temperature,
        stopped = outcome.stopped,
        "md workflow complete"
    );
    Ok(outcome)
}
