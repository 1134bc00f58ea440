use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const ABOUT: &str = "safran - conformer-ensemble deduplication and molecular dynamics built on a reordering RMSD core.";
const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(version, about = ABOUT, help_template = HELP_TEMPLATE)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deduplicate a conformer ensemble with the three-pass RMSD scanner.
    Scan(ScanArgs),
    /// Run a molecular-dynamics simulation.
    Md(MdArgs),
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Input ensemble (.xyz or .trj), sorted or unsorted; structures are
    /// processed in ascending energy order.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub input: PathBuf,

    /// JSON configuration blob; omitted keys take their defaults.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the RMSD threshold τ in Å (a negative value enables
    /// auto-calibration from the ensemble).
    #[arg(short, long, value_name = "FLOAT")]
    pub rmsd: Option<f64>,

    /// Override the reordering method (free, heavy, hybrid, distance,
    /// incremental).
    #[arg(short, long, value_name = "NAME")]
    pub method: Option<String>,

    /// Continue from the restart record next to the input.
    #[arg(long)]
    pub restart: bool,
}

#[derive(Args, Debug)]
pub struct MdArgs {
    /// Starting structure (.xyz); only the first frame is used.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub input: PathBuf,

    /// JSON configuration blob; omitted keys take their defaults.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the target temperature, K.
    #[arg(short = 'T', long, value_name = "FLOAT")]
    pub temperature: Option<f64>,

    /// Override the simulated time, fs.
    #[arg(long, value_name = "FLOAT")]
    pub max_time: Option<f64>,

    /// Ignore any existing restart record.
    #[arg(long)]
    pub norestart: bool,
}
