//! Locations of the tables the engine works on.

use std::path::PathBuf;

use crate::occupancy::PROC_ROOT;
use crate::tab::{FSTAB_PATH, MTAB_PATH};

/// Kernel file whose readiness signals live mount table changes.
pub const LIVE_TABLE_PATH: &str = "/proc/self/mounts";

/// File locations used by monitoring and lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Static configuration table.
    pub fstab: PathBuf,
    /// Live mount table, read on every change.
    pub mtab: PathBuf,
    /// Descriptor polled for live table changes.
    pub live_table: PathBuf,
    /// Root of the process table.
    pub proc_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fstab: PathBuf::from(FSTAB_PATH),
            mtab: PathBuf::from(MTAB_PATH),
            live_table: PathBuf::from(LIVE_TABLE_PATH),
            proc_root: PathBuf::from(PROC_ROOT),
        }
    }
}
