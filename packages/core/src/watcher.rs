//! File change notification for the static configuration table.
//!
//! Editors and [`crate::tab::rewrite`] replace the file by renaming over it,
//! which drops an inotify watch on the old inode. The watcher notices the
//! `IN_IGNORED` event and arms a new watch on the same path.

use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor};
use snafu::ResultExt;

use crate::error::{NotifySnafu, Result};

/// What a batch of notifications said about the watched file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchEvent {
    /// The file was closed after being written.
    pub written: bool,
    /// The watch was dropped by the kernel and must be armed again.
    pub invalidated: bool,
}

/// A readiness source reporting content changes of one file.
///
/// The descriptor becomes readable when notifications are pending.
pub trait FileChangeWatcher: AsFd {
    /// Starts watching `path` for completed writes.
    fn arm(&mut self, path: &Path) -> Result<()>;

    /// Consumes pending notifications. May block if none are pending.
    fn read_changes(&mut self) -> Result<WatchEvent>;

    /// Arms the watch again if `event` reports it as dropped.
    fn rearm_if_invalidated(&mut self, event: &WatchEvent) -> Result<()>;
}

/// [`FileChangeWatcher`] backed by inotify `IN_CLOSE_WRITE`.
pub struct InotifyWatcher {
    inotify: Inotify,
    path: PathBuf,
    watch: Option<WatchDescriptor>,
}

impl InotifyWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let inotify = Inotify::init(InitFlags::IN_CLOEXEC).context(NotifySnafu { path: &path })?;
        Ok(Self {
            inotify,
            path,
            watch: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsFd for InotifyWatcher {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inotify.as_fd()
    }
}

impl FileChangeWatcher for InotifyWatcher {
    fn arm(&mut self, path: &Path) -> Result<()> {
        let watch = self
            .inotify
            .add_watch(path, AddWatchFlags::IN_CLOSE_WRITE)
            .context(NotifySnafu { path })?;
        self.path = path.to_path_buf();
        self.watch = Some(watch);
        Ok(())
    }

    fn read_changes(&mut self) -> Result<WatchEvent> {
        let events = loop {
            match self.inotify.read_events() {
                Err(Errno::EINTR) => continue,
                other => break other.context(NotifySnafu { path: &self.path })?,
            }
        };

        let mut change = WatchEvent::default();
        for event in events {
            if Some(event.wd) != self.watch {
                continue;
            }
            change.written |= event.mask.contains(AddWatchFlags::IN_CLOSE_WRITE);
            change.invalidated |= event.mask.contains(AddWatchFlags::IN_IGNORED);
        }
        Ok(change)
    }

    fn rearm_if_invalidated(&mut self, event: &WatchEvent) -> Result<()> {
        if event.invalidated {
            tracing::debug!(path = %self.path.display(), "re-arming dropped watch");
            let path = self.path.clone();
            self.arm(&path)?;
        }
        Ok(())
    }
}
