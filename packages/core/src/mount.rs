//! Mount operations module.
//!
//! This module wraps the external `mount`/`umount` tools behind the
//! [`MountFacility`] trait and handles mount point directories.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{Cleanup, Error, IoResultExt, Result};
use crate::executor::ExecutionContext;
use crate::tab::TabEntry;

/// The privileged mount/unmount operations the lifecycle relies on.
pub trait MountFacility {
    /// Mounts `remote` on `path` with the entry's type and options.
    fn mount(&self, fields: &TabEntry) -> Result<()>;

    /// Changes the options of an existing mount.
    fn remount(&self, fields: &TabEntry) -> Result<()>;

    /// Unmounts whatever is mounted on the entry's mount point.
    fn unmount(&self, fields: &TabEntry) -> Result<()>;
}

impl<M: MountFacility + ?Sized> MountFacility for &M {
    fn mount(&self, fields: &TabEntry) -> Result<()> {
        (**self).mount(fields)
    }

    fn remount(&self, fields: &TabEntry) -> Result<()> {
        (**self).remount(fields)
    }

    fn unmount(&self, fields: &TabEntry) -> Result<()> {
        (**self).unmount(fields)
    }
}

/// [`MountFacility`] backed by `mount(8)` and `umount(8)`.
#[derive(Debug, Clone, Default)]
pub struct SystemMount {
    ctx: ExecutionContext,
}

impl SystemMount {
    pub fn new(ctx: ExecutionContext) -> Self {
        Self { ctx }
    }
}

impl MountFacility for SystemMount {
    fn mount(&self, fields: &TabEntry) -> Result<()> {
        let (remote, path, fs_type, options) = fields.require_mount_fields()?;
        self.ctx.run_privileged_checked(
            "mount",
            &["-t", fs_type, "-o", options, remote, path],
        )
    }

    fn remount(&self, fields: &TabEntry) -> Result<()> {
        let (remote, path, _, options) = fields.require_mount_fields()?;
        let options = format!("remount,{options}");
        self.ctx
            .run_privileged_checked("mount", &["-o", &options, remote, path])
    }

    fn unmount(&self, fields: &TabEntry) -> Result<()> {
        let path = mount_point_of(fields)?;
        self.ctx.run_privileged_checked("umount", &[path])
    }
}

/// The mount point field of an entry.
pub fn mount_point_of(fields: &TabEntry) -> Result<&str> {
    fields.mount_point().ok_or_else(|| Error::InvalidEntry {
        fields: fields.0.clone(),
        message: "missing mount point".to_string(),
    })
}

/// Creates a mount point directory (and its parents) if it doesn't exist.
pub fn create_mount_point(path: &Path) -> Result<()> {
    if !path.is_dir() {
        fs::create_dir_all(path).mount_point_context(path)?;
    }
    Ok(())
}

/// Removes a mount point directory if it is empty.
///
/// A non-empty directory is a recovered failure and a missing one needs no
/// removal; other errors are fatal.
pub fn remove_mount_point_if_empty(path: &Path) -> Result<Cleanup> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(Cleanup::Done),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Cleanup::Done),
        Err(err) if err.kind() == io::ErrorKind::DirectoryNotEmpty => {
            Ok(Cleanup::Recovered(Error::MountPointRemoval {
                path: path.to_path_buf(),
                source: err,
            }))
        }
        Err(err) => Err(err).mount_point_removal_context(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_mount_point_recursive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b");
        create_mount_point(&path).unwrap();
        assert!(path.is_dir());

        // Existing directories are fine.
        create_mount_point(&path).unwrap();
    }

    #[test]
    fn test_remove_mount_point_if_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        fs::create_dir(&path).unwrap();

        assert!(matches!(remove_mount_point_if_empty(&path).unwrap(), Cleanup::Done));
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_non_empty_mount_point_is_recovered() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("file"), "x").unwrap();

        assert!(matches!(
            remove_mount_point_if_empty(&path).unwrap(),
            Cleanup::Recovered(Error::MountPointRemoval { .. })
        ));
        assert!(path.exists());
    }

    #[test]
    fn test_remove_missing_mount_point_is_done() {
        let dir = TempDir::new().unwrap();
        let cleanup = remove_mount_point_if_empty(&dir.path().join("missing")).unwrap();
        assert!(matches!(cleanup, Cleanup::Done));
    }

    #[test]
    fn test_remove_file_as_mount_point_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, "x").unwrap();

        let err = remove_mount_point_if_empty(&path).unwrap_err();
        assert!(matches!(err, Error::MountPointRemoval { .. }));
    }

    #[test]
    fn test_mount_requires_all_fields() {
        let mounter = SystemMount::default();
        let err = mounter
            .mount(&TabEntry(vec!["nas:/a".to_string(), "/mnt/a".to_string()]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEntry { .. }));
    }
}
