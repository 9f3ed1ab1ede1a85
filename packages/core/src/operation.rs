//! Operations exposed to a command surface.
//!
//! Every operation is a variant of [`Operation`] with typed arguments, and
//! [`execute`] is the single place they are dispatched. Results that carry
//! data are written to the output stream as one JSON line.

use std::io::Write;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::config::Config;
use crate::error::{EncodeSnafu, IoResultExt, Result};
use crate::executor::ExecutionContext;
use crate::lifecycle::Lifecycle;
use crate::monitor::Monitor;
use crate::mount::{MountFacility, SystemMount};
use crate::occupancy::OccupancyScanner;
use crate::reconcile::ReportedEntry;
use crate::systemd::{self, SystemdUnits, UnitResolver};
use crate::tab::TabEntry;

/// Operations on NFS mounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum Operation {
    /// Report the mount view now and after every change.
    Monitor,
    /// Replace a configured entry and carry the change over to the live mount.
    Update {
        entry: ReportedEntry,
        fields: TabEntry,
    },
    /// Configure and mount a new entry.
    Add { fields: TabEntry },
    /// Unmount an entry and drop it from the configuration.
    Remove { entry: ReportedEntry },
    /// Mount an entry.
    Mount { entry: ReportedEntry },
    /// Unmount an entry.
    Unmount { entry: ReportedEntry },
    /// Apply new options to a mounted entry.
    Remount { fields: TabEntry },
    /// Stop the given units, then unmount the entry.
    StopAndUnmount {
        units: Vec<String>,
        entry: ReportedEntry,
    },
    /// Stop the given units, then remove the entry.
    StopAndRemove {
        units: Vec<String>,
        entry: ReportedEntry,
    },
    /// List the units using the entry's mount point.
    Users { entry: ReportedEntry },
}

/// Everything an operation needs from its environment.
#[derive(Debug, Clone, Default)]
pub struct Context<M = SystemMount, R = SystemdUnits> {
    pub config: Config,
    pub exec: ExecutionContext,
    pub mounter: M,
    pub units: R,
}

impl Context {
    /// A context using the system tools.
    pub fn system(config: Config, exec: ExecutionContext) -> Self {
        Self {
            config,
            mounter: SystemMount::new(exec.clone()),
            exec,
            units: SystemdUnits,
        }
    }
}

/// Runs one operation to completion.
///
/// `Monitor` never returns unless reading or reporting fails.
pub fn execute<M, R, W>(operation: Operation, ctx: &Context<M, R>, out: &mut W) -> Result<()>
where
    M: MountFacility,
    R: UnitResolver,
    W: Write,
{
    let lifecycle = Lifecycle::new(&ctx.config.fstab, &ctx.mounter);

    match operation {
        Operation::Monitor => Monitor::new(&ctx.config, out)?.run(),
        Operation::Update { entry, fields } => lifecycle.update(&entry, &fields),
        Operation::Add { fields } => lifecycle.add(&fields),
        Operation::Remove { entry } => lifecycle.remove(&entry),
        Operation::Mount { entry } => lifecycle.mount(&entry),
        Operation::Unmount { entry } => lifecycle.unmount(&entry),
        Operation::Remount { fields } => lifecycle.remount(&fields),
        Operation::StopAndUnmount { units, entry } => {
            systemd::stop_units(&ctx.exec, &units)?;
            lifecycle.unmount(&entry)
        }
        Operation::StopAndRemove { units, entry } => {
            systemd::stop_units(&ctx.exec, &units)?;
            lifecycle.remove(&entry)
        }
        Operation::Users { entry } => {
            let scanner = OccupancyScanner::new(&ctx.config.proc_root, &ctx.units);
            let occupants = scanner.find_occupants(&entry)?;
            write_json_line(out, &occupants)
        }
    }
}

fn write_json_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value).context(EncodeSnafu)?;
    out.write_all(b"\n").report_context()?;
    out.flush().report_context()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::tests::{Call, RecordingMount};
    use crate::systemd::UnitInfo;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    struct NoUnits;

    impl UnitResolver for NoUnits {
        fn unit_by_pid(&self, pid: u32) -> Result<String> {
            Err(crate::error::Error::Systemd {
                message: format!("unexpected query for {pid}"),
            })
        }

        fn describe_unit(&self, unit: &str) -> Result<UnitInfo> {
            Err(crate::error::Error::Systemd {
                message: format!("unexpected query for {unit}"),
            })
        }
    }

    fn context(dir: &TempDir) -> Context<RecordingMount, NoUnits> {
        let fstab = dir.path().join("fstab");
        fs::write(&fstab, "").unwrap();
        Context {
            config: Config {
                fstab,
                proc_root: dir.path().join("proc"),
                ..Config::default()
            },
            exec: ExecutionContext::default(),
            mounter: RecordingMount::default(),
            units: NoUnits,
        }
    }

    #[test]
    fn test_operations_decode_from_tagged_json() {
        let operation: Operation = serde_json::from_value(json!({
            "cmd": "update",
            "entry": { "fstab": true, "fields": ["nas:/a", "/mnt/a", "nfs", "rw"], "mounted": true },
            "fields": ["nas:/a", "/mnt/a", "nfs", "ro"],
        }))
        .unwrap();

        assert_eq!(
            operation,
            Operation::Update {
                entry: ReportedEntry {
                    from_static_config: true,
                    fields: TabEntry::new("nas:/a", "/mnt/a", "nfs", "rw"),
                    mounted: true,
                },
                fields: TabEntry::new("nas:/a", "/mnt/a", "nfs", "ro"),
            }
        );

        let operation: Operation = serde_json::from_value(json!({
            "cmd": "stop-and-remove",
            "units": ["web.service"],
            "entry": { "fields": ["nas:/a", "/mnt/a", "nfs", "rw"] },
        }))
        .unwrap();
        assert!(matches!(operation, Operation::StopAndRemove { ref units, .. } if units.len() == 1));
    }

    #[test]
    fn test_execute_add_and_mount() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let fields = TabEntry::new("nas:/a", dir.path().join("a").display().to_string(), "nfs", "rw");
        let mut out: Vec<u8> = Vec::new();

        execute(Operation::Add { fields: fields.clone() }, &ctx, &mut out).unwrap();
        execute(
            Operation::Mount {
                entry: ReportedEntry::unmounted(fields.clone()),
            },
            &ctx,
            &mut out,
        )
        .unwrap();

        assert!(out.is_empty());
        assert_eq!(
            *ctx.mounter.calls.borrow(),
            vec![Call::Mount(fields.clone()), Call::Mount(fields)]
        );
    }

    #[test]
    fn test_execute_users_of_unmounted_entry() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let mut out: Vec<u8> = Vec::new();

        let entry = ReportedEntry::unmounted(TabEntry::new("nas:/a", "/mnt/a", "nfs", "rw"));
        execute(Operation::Users { entry }, &ctx, &mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "[]\n");
    }

    #[test]
    fn test_execute_stop_without_units_unmounts() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let fields = TabEntry::new("nas:/a", "/mnt/a", "nfs", "rw");

        execute(
            Operation::StopAndUnmount {
                units: Vec::new(),
                entry: ReportedEntry::unmounted(fields.clone()),
            },
            &ctx,
            &mut Vec::<u8>::new(),
        )
        .unwrap();

        assert_eq!(*ctx.mounter.calls.borrow(), vec![Call::Unmount(fields)]);
    }
}
