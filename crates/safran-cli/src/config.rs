//! JSON configuration loading.
//!
//! Each engine consumes one JSON blob; missing keys take their engine
//! defaults. Command-line overrides are applied after parsing, so a flag
//! always wins over the file.

use crate::cli::{MdArgs, ScanArgs};
use crate::error::{CliError, Result};
use safran_core::engine::align::ReorderMethod;
use safran_core::engine::md::MdConfig;
use safran_core::engine::scan::ScanConfig;
use std::path::Path;

fn read_json<T: serde::de::DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    match path {
        None => Ok(T::default()),
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| CliError::FileParsing {
                path: path.to_path_buf(),
                source: anyhow::Error::new(e),
            })?;
            serde_json::from_str(&text).map_err(|e| CliError::FileParsing {
                path: path.to_path_buf(),
                source: anyhow::Error::new(e),
            })
        }
    }
}

fn parse_method(name: &str) -> Result<ReorderMethod> {
    Ok(match name {
        "none" => ReorderMethod::None,
        "free" => ReorderMethod::Free,
        "heavy" => ReorderMethod::Heavy,
        "hybrid" => ReorderMethod::Hybrid,
        "distance" => ReorderMethod::Distance,
        "incremental" => ReorderMethod::Incremental,
        other => {
            return Err(CliError::Argument(format!(
                "unknown reorder method '{}' (expected none, free, heavy, hybrid, distance or incremental)",
                other
            )))
        }
    })
}

pub fn scan_config(args: &ScanArgs) -> Result<ScanConfig> {
    let mut config: ScanConfig = read_json(args.config.as_deref())?;
    if let Some(rmsd) = args.rmsd {
        config.rmsd_threshold = (rmsd > 0.0).then_some(rmsd);
    }
    if let Some(method) = &args.method {
        config.rmsd.method = parse_method(method)?;
    }
    if args.restart {
        config.restart = true;
    }
    config.validate().map_err(CliError::Config)?;
    Ok(config)
}

pub fn md_config(args: &MdArgs) -> Result<MdConfig> {
    let mut config: MdConfig = read_json(args.config.as_deref())?;
    if let Some(temperature) = args.temperature {
        config.temperature = temperature;
    }
    if let Some(max_time) = args.max_time {
        config.max_time = max_time;
    }
    if args.norestart {
        config.norestart = true;
    }
    config.validate().map_err(CliError::Config)?;
    Ok(config)
}
