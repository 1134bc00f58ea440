//! Graceful-shutdown sentinel.
//!
//! A stop file in the working directory requests an orderly shutdown. Both
//! engines poll at safe boundaries only (between candidates, between passes,
//! between MD steps), so a run never stops mid-computation.

use std::path::{Path, PathBuf};

/// Well-known stop-file name.
pub const STOP_FILE: &str = "safran.stop";

#[derive(Debug, Clone)]
pub struct StopCheck {
    path: PathBuf,
}

impl StopCheck {
    /// Watches for the stop file in the current working directory.
    pub fn in_working_dir() -> StopCheck {
        StopCheck {
            path: PathBuf::from(STOP_FILE),
        }
    }

    pub fn at(dir: impl AsRef<Path>) -> StopCheck {
        StopCheck {
            path: dir.as_ref().join(STOP_FILE),
        }
    }

    pub fn requested(&self) -> bool {
        self.path.exists()
    }

    /// Removes a consumed stop file so the next run starts clean.
    pub fn clear(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
