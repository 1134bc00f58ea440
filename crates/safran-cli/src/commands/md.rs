use crate::cli::MdArgs;
use crate::config;
use crate::error::Result;
use crate::progress::CliProgressHandler;
use safran_core::engine::progress::ProgressReporter;
use safran_core::workflows;

pub fn execute(args: &MdArgs) -> Result<()> {
    let md_config = config::md_config(args)?;

    let handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(handler.get_callback());
    let outcome = workflows::simulate::run(&args.input, md_config, &reporter)?;

    handler.log(&format!(
        "{} steps, {:.1} fs simulated{}",
        outcome.steps,
        outcome.time_fs,
        if outcome.stopped {
            " - stopped by request, restart record written"
        } else {
            ""
        },
    ));
    handler.log(&format!(
        "averages: T {:.1} K | Epot {:.8} Eh | Ekin {:.8} Eh | Etot {:.8} Eh",
        outcome.averages.temperature,
        outcome.averages.epot,
        outcome.averages.ekin,
        outcome.averages.etot,
    ));
    Ok(())
}
