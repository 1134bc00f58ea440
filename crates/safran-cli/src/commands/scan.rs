use crate::cli::ScanArgs;
use crate::config;
use crate::error::Result;
use crate::progress::CliProgressHandler;
use safran_core::engine::progress::ProgressReporter;
use safran_core::workflows;

pub fn execute(args: &ScanArgs) -> Result<()> {
    let scan_config = config::scan_config(args)?;

    let handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(handler.get_callback());
    let outcome = workflows::scan::run(&args.input, scan_config, &reporter)?;

    handler.log(&format!(
        "{} structures kept (τ = {:.4} Å){}",
        outcome.accepted.len(),
        outcome.tau,
        if outcome.stopped {
            " - stopped by request, restart record written"
        } else {
            ""
        },
    ));
    handler.log(&format!(
        "rejected {} (direct {}) | reorder searches {} (hits {}, rule reuses {}) | pairs skipped {}",
        outcome.stats.rejected,
        outcome.stats.rejected_directly,
        outcome.stats.reordered,
        outcome.stats.reorder_successful,
        outcome.stats.reused,
        outcome.stats.skipped,
    ));
    Ok(())
}
