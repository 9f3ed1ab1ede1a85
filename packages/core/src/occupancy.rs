//! Finding the units that keep a mount point busy.
//!
//! The kernel has no query for "who uses this mount", so the process table
//! is walked instead: every handle a process holds (executable, root, cwd,
//! open files, mapped files) is resolved through its `/proc` symlink and
//! compared lexically with the mount point. Matching processes are mapped to
//! their owning unit.

use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};
use crate::reconcile::ReportedEntry;
use crate::systemd::UnitResolver;

/// Default process table root.
pub const PROC_ROOT: &str = "/proc";

/// Single-link handles checked per process, in order.
const LINK_HANDLES: [&str; 3] = ["exe", "root", "cwd"];

/// Directories of links checked per process, in order.
const DIR_HANDLES: [&str; 2] = ["fd", "map_files"];

/// A unit holding the mount point open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    #[serde(rename = "unit")]
    pub unit_id: String,
    #[serde(rename = "desc")]
    pub description: String,
}

/// Scans a process table for users of a mount point.
#[derive(Debug)]
pub struct OccupancyScanner<R> {
    proc_root: PathBuf,
    resolver: R,
    own_pid: u32,
}

impl<R: UnitResolver> OccupancyScanner<R> {
    pub fn new(proc_root: impl Into<PathBuf>, resolver: R) -> Self {
        Self {
            proc_root: proc_root.into(),
            resolver,
            own_pid: std::process::id(),
        }
    }

    /// Returns the distinct units with a process using the entry's mount
    /// point, in order of discovery. Unmounted entries have no occupants.
    pub fn find_occupants(&self, entry: &ReportedEntry) -> Result<Vec<Occupant>> {
        if !entry.mounted {
            return Ok(Vec::new());
        }
        let Some(mount_point) = entry.fields.mount_point() else {
            return Ok(Vec::new());
        };
        let mount_point = Path::new(mount_point);

        let mut seen_units: Vec<String> = Vec::new();
        let mut occupants = Vec::new();

        for pid in self.list_pids()? {
            if pid == self.own_pid {
                continue;
            }
            if !self.process_uses(pid, mount_point) {
                continue;
            }

            // The process may have exited since its handles were read.
            let unit = match self.resolver.unit_by_pid(pid) {
                Ok(unit) => unit,
                Err(err) => {
                    tracing::debug!(pid, error = %err, "skipping process without unit");
                    continue;
                }
            };
            if seen_units.contains(&unit) {
                continue;
            }

            let info = self.resolver.describe_unit(&unit)?;
            tracing::debug!(pid, unit = %info.id, "found occupant");
            occupants.push(Occupant {
                unit_id: info.id,
                description: info.description,
            });
            seen_units.push(unit);
        }

        Ok(occupants)
    }

    /// Numeric process directories, ascending.
    fn list_pids(&self) -> Result<Vec<u32>> {
        let mut pids: Vec<u32> = fs::read_dir(&self.proc_root)
            .proc_read_context(&self.proc_root)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    /// Whether any handle of `pid` resolves under `mount_point`.
    ///
    /// Handles that cannot be read (the process exited, or access is denied)
    /// count as not matching.
    fn process_uses(&self, pid: u32, mount_point: &Path) -> bool {
        let process = self.proc_root.join(pid.to_string());

        let link_match = LINK_HANDLES
            .iter()
            .any(|handle| link_is_under(&process.join(handle), mount_point));

        link_match
            || DIR_HANDLES.iter().any(|handle| {
                match dir_has_link_under(&process.join(handle), mount_point) {
                    Ok(found) => found,
                    Err(err) => {
                        tracing::trace!(pid, handle, error = %err, "skipping unreadable handles");
                        false
                    }
                }
            })
    }
}

fn link_is_under(link: &Path, mount_point: &Path) -> bool {
    match fs::read_link(link) {
        Ok(target) => is_under(&target, mount_point),
        Err(_) => false,
    }
}

fn dir_has_link_under(dir: &Path, mount_point: &Path) -> io::Result<bool> {
    for entry in fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        if link_is_under(&entry.path(), mount_point) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Lexical containment: `path` equals `mount_point` or lies below it.
fn is_under(path: &Path, mount_point: &Path) -> bool {
    let path = path.as_os_str().as_bytes();
    let mount_point = mount_point.as_os_str().as_bytes();

    match path.strip_prefix(mount_point) {
        Some(rest) => rest.is_empty() || rest.starts_with(b"/"),
        None => false,
    }
}
