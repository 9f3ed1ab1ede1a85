//! Add, update and remove configured network mounts.
//!
//! Each operation writes the static table first (atomically) and then talks
//! to the mount facility. A mount failure after a successful table write is
//! returned to the caller but the table change stays: the configuration is
//! the durable part, a failed mount can be retried.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::mount::{self, MountFacility};
use crate::reconcile::ReportedEntry;
use crate::tab::{self, TabEntry};

/// Lifecycle operations against one static table.
#[derive(Debug)]
pub struct Lifecycle<M> {
    fstab: PathBuf,
    mounter: M,
}

impl<M: MountFacility> Lifecycle<M> {
    pub fn new(fstab: impl Into<PathBuf>, mounter: M) -> Self {
        Self {
            fstab: fstab.into(),
            mounter,
        }
    }

    pub fn mounter(&self) -> &M {
        &self.mounter
    }

    /// Adds a new entry to the table and mounts it.
    ///
    /// The entry is only appended if the table doesn't already hold an
    /// identical one.
    pub fn add(&self, fields: &TabEntry) -> Result<()> {
        fields.require_network()?;
        mount::create_mount_point(Path::new(mount::mount_point_of(fields)?))?;

        let mut present = false;
        tab::rewrite(&self.fstab, |existing| match existing {
            Some(existing) => {
                present |= existing == fields;
                Some(existing.clone())
            }
            None if present => None,
            None => Some(fields.clone()),
        })?;

        self.mounter.mount(fields)
    }

    /// Replaces the table line of `entry` with `new_fields` and brings the
    /// live state along.
    pub fn update(&self, entry: &ReportedEntry, new_fields: &TabEntry) -> Result<()> {
        let old_fields = &entry.fields;
        new_fields.require_network()?;
        let old_path = Path::new(mount::mount_point_of(old_fields)?);
        let new_path = Path::new(mount::mount_point_of(new_fields)?);
        mount::create_mount_point(new_path)?;

        tab::rewrite(&self.fstab, |existing| {
            existing.map(|existing| {
                if existing == old_fields {
                    new_fields.clone()
                } else {
                    existing.clone()
                }
            })
        })?;

        let moved = old_path != new_path;

        if !entry.mounted {
            if moved {
                mount::remove_mount_point_if_empty(old_path)?.log("remove old mount point");
            }
            return Ok(());
        }

        let same_target = old_fields.remote() == new_fields.remote()
            && old_fields.mount_point() == new_fields.mount_point()
            && old_fields.fs_type() == new_fields.fs_type();

        if same_target {
            return self.mounter.remount(new_fields);
        }

        // The old mount may already be gone.
        match self.mounter.unmount(old_fields) {
            Ok(()) if moved => {
                mount::remove_mount_point_if_empty(old_path)?.log("remove old mount point");
            }
            Ok(()) => {}
            Err(err) => {
                tracing::warn!(error = %err, "ignoring failed unmount of old entry");
            }
        }

        self.mounter.mount(new_fields)
    }

    /// Unmounts `entry` if needed and deletes its table line.
    pub fn remove(&self, entry: &ReportedEntry) -> Result<()> {
        let old_fields = &entry.fields;
        let path = Path::new(mount::mount_point_of(old_fields)?);

        if entry.mounted {
            self.mounter.unmount(old_fields)?;
        }
        mount::remove_mount_point_if_empty(path)?.log("remove mount point");

        tab::rewrite(&self.fstab, |existing| match existing {
            Some(existing) if existing == old_fields => None,
            other => other.cloned(),
        })
    }

    pub fn mount(&self, entry: &ReportedEntry) -> Result<()> {
        self.mounter.mount(&entry.fields)
    }

    pub fn unmount(&self, entry: &ReportedEntry) -> Result<()> {
        self.mounter.unmount(&entry.fields)
    }

    pub fn remount(&self, fields: &TabEntry) -> Result<()> {
        self.mounter.remount(fields)
    }
}
