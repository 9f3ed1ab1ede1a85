//! Continuous reporting of the reconciled mount view.
//!
//! The monitor blocks on two readiness sources at once: the kernel's live
//! mount table (which signals changes as an exceptional condition) and a
//! [`FileChangeWatcher`] on the static table. Each wakeup re-reads the
//! affected table from disk, reconciles, and writes the whole view as one
//! JSON line. Notification payloads are never trusted, so bursts of events
//! simply collapse into re-reads.

use std::fs::File;
use std::io::Write;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use snafu::ResultExt;

use crate::config::Config;
use crate::error::{EncodeSnafu, IoResultExt, PollSnafu, Result};
use crate::reconcile::{ReportedEntry, reconcile};
use crate::tab::{self, TabEntry};
use crate::watcher::{FileChangeWatcher, InotifyWatcher};

/// The most recently parsed tables, threaded through the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tables {
    pub fstab: Vec<TabEntry>,
    pub mtab: Vec<TabEntry>,
}

impl Tables {
    pub fn view(&self) -> Vec<ReportedEntry> {
        reconcile(&self.fstab, &self.mtab)
    }
}

/// Reads tables and writes reconciled views to a consumer stream.
#[derive(Debug)]
pub struct Reporter<W> {
    fstab: PathBuf,
    mtab: PathBuf,
    out: W,
}

impl<W: Write> Reporter<W> {
    pub fn new(fstab: impl Into<PathBuf>, mtab: impl Into<PathBuf>, out: W) -> Self {
        Self {
            fstab: fstab.into(),
            mtab: mtab.into(),
            out,
        }
    }

    pub fn fstab(&self) -> &Path {
        &self.fstab
    }

    /// Reads both tables.
    pub fn load(&self) -> Result<Tables> {
        Ok(Tables {
            mtab: tab::read_entries(&self.mtab)?,
            fstab: tab::read_entries(&self.fstab)?,
        })
    }

    /// Replaces the live table with a fresh read.
    pub fn refresh_live(&self, tables: Tables) -> Result<Tables> {
        Ok(Tables {
            mtab: tab::read_entries(&self.mtab)?,
            ..tables
        })
    }

    /// Replaces the static table with a fresh read.
    pub fn refresh_static(&self, tables: Tables) -> Result<Tables> {
        Ok(Tables {
            fstab: tab::read_entries(&self.fstab)?,
            ..tables
        })
    }

    /// Reconciles and writes the view as a single line.
    pub fn emit(&mut self, tables: &Tables) -> Result<()> {
        let view = tables.view();
        tracing::debug!(
            records = view.len(),
            fstab = tables.fstab.len(),
            mtab = tables.mtab.len(),
            "reporting mount view"
        );

        serde_json::to_writer(&mut self.out, &view).context(EncodeSnafu)?;
        self.out.write_all(b"\n").report_context()?;
        self.out.flush().report_context()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Which sources are ready after a wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub live_table: bool,
    pub static_table: bool,
}

/// Blocks until the live table changes or the watcher has notifications.
pub fn wait_ready(watcher: &impl AsFd, live_table: &File) -> Result<Readiness> {
    let mut fds = [
        PollFd::new(live_table.as_fd(), PollFlags::POLLPRI),
        PollFd::new(watcher.as_fd(), PollFlags::POLLIN),
    ];

    loop {
        match poll(&mut fds, PollTimeout::NONE) {
            Err(Errno::EINTR) => continue,
            result => {
                result.context(PollSnafu)?;
                break;
            }
        }
    }

    let live = fds[0].revents().unwrap_or(PollFlags::empty());
    let notify = fds[1].revents().unwrap_or(PollFlags::empty());

    Ok(Readiness {
        live_table: live.intersects(PollFlags::POLLPRI | PollFlags::POLLERR),
        static_table: notify.contains(PollFlags::POLLIN),
    })
}

/// The watch loop.
pub struct Monitor<W, F> {
    reporter: Reporter<W>,
    watcher: F,
    live_table: PathBuf,
}

impl<W: Write> Monitor<W, InotifyWatcher> {
    /// Creates a monitor for the configured tables using inotify.
    pub fn new(config: &Config, out: W) -> Result<Self> {
        let watcher = InotifyWatcher::new(&config.fstab)?;
        Ok(Self::with_watcher(config, out, watcher))
    }
}

impl<W: Write, F: FileChangeWatcher> Monitor<W, F> {
    pub fn with_watcher(config: &Config, out: W, watcher: F) -> Self {
        Self {
            reporter: Reporter::new(&config.fstab, &config.mtab, out),
            watcher,
            live_table: config.live_table.clone(),
        }
    }

    /// Reports the initial view, then reports again after every change.
    ///
    /// Only returns on failure.
    pub fn run(mut self) -> Result<()> {
        let live_table = File::open(&self.live_table).tab_read_context(&self.live_table)?;

        // Arm before the first read so no change after it goes unnoticed.
        let fstab = self.reporter.fstab().to_path_buf();
        self.watcher.arm(&fstab)?;

        let mut tables = self.reporter.load()?;
        self.reporter.emit(&tables)?;
        tracing::info!(fstab = %fstab.display(), "monitoring mount tables");

        loop {
            // Idle until a source fires; each pass below completes before
            // the next wait.
            let ready = wait_ready(&self.watcher, &live_table)?;

            if ready.live_table {
                tables = self.reporter.refresh_live(tables)?;
                self.reporter.emit(&tables)?;
            }

            if ready.static_table {
                let event = self.watcher.read_changes()?;
                self.watcher.rearm_if_invalidated(&event)?;
                tables = self.reporter.refresh_static(tables)?;
                self.reporter.emit(&tables)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_tables(dir: &TempDir, fstab: &str, mtab: &str) -> (PathBuf, PathBuf) {
        let fstab_path = dir.path().join("fstab");
        let mtab_path = dir.path().join("mtab");
        fs::write(&fstab_path, fstab).unwrap();
        fs::write(&mtab_path, mtab).unwrap();
        (fstab_path, mtab_path)
    }

    fn parse_lines(output: &[u8]) -> Vec<Vec<ReportedEntry>> {
        String::from_utf8(output.to_vec())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_emit_writes_one_line_per_view() {
        let dir = TempDir::new().unwrap();
        let (fstab, mtab) = write_tables(
            &dir,
            "# comment\nnas:/export /mnt/data nfs rw\n",
            "proc /proc proc rw 0 0\nnas:/export /mnt/data nfs rw,vers=4 0 0\n",
        );
        let mut reporter = Reporter::new(fstab, mtab, Vec::<u8>::new());

        let tables = reporter.load().unwrap();
        reporter.emit(&tables).unwrap();
        reporter.emit(&tables).unwrap();

        let views = parse_lines(&reporter.into_inner());
        assert_eq!(views.len(), 2);
        assert_eq!(views[0], views[1]);
        assert_eq!(
            views[0],
            vec![ReportedEntry {
                from_static_config: true,
                fields: TabEntry::new("nas:/export", "/mnt/data", "nfs", "rw"),
                mounted: true,
            }]
        );
    }

    #[test]
    fn test_refresh_replaces_only_one_table() {
        let dir = TempDir::new().unwrap();
        let (fstab, mtab) = write_tables(&dir, "nas:/a /mnt/a nfs rw\n", "");
        let reporter = Reporter::new(&fstab, &mtab, Vec::<u8>::new());
        let tables = reporter.load().unwrap();
        assert!(!tables.view()[0].mounted);

        fs::write(&mtab, "nas:/a /mnt/a nfs rw 0 0\n").unwrap();
        fs::write(&fstab, "").unwrap();

        let tables = reporter.refresh_live(tables).unwrap();
        assert_eq!(tables.fstab.len(), 1);
        assert!(tables.view()[0].mounted);

        let tables = reporter.refresh_static(tables).unwrap();
        assert!(tables.fstab.is_empty());
        assert_eq!(
            tables.view(),
            vec![ReportedEntry {
                from_static_config: false,
                fields: TabEntry::from_line("nas:/a /mnt/a nfs rw 0 0").unwrap(),
                mounted: true,
            }]
        );
    }

    #[test]
    fn test_load_fails_on_missing_table() {
        let dir = TempDir::new().unwrap();
        let reporter = Reporter::new(dir.path().join("fstab"), dir.path().join("mtab"), Vec::<u8>::new());
        assert!(reporter.load().is_err());
    }

    #[test]
    fn test_wait_ready_reports_pending_watch_events() {
        let dir = TempDir::new().unwrap();
        let (fstab, _) = write_tables(&dir, "", "");
        let mut watcher = InotifyWatcher::new(&fstab).unwrap();
        watcher.arm(&fstab).unwrap();
        let live_table = File::open(crate::config::LIVE_TABLE_PATH).unwrap();

        fs::write(&fstab, "nas:/a /mnt/a nfs rw\n").unwrap();

        let ready = wait_ready(&watcher, &live_table).unwrap();
        assert_eq!(
            ready,
            Readiness {
                live_table: false,
                static_table: true,
            }
        );
        assert!(watcher.read_changes().unwrap().written);
    }

    /// Sends every flushed chunk to a channel.
    struct ChannelWriter {
        buf: Vec<u8>,
        tx: Sender<String>,
    }

    impl Write for ChannelWriter {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.buf.extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            let line = String::from_utf8_lossy(&self.buf).trim().to_string();
            self.buf.clear();
            let _ = self.tx.send(line);
            Ok(())
        }
    }

    fn wait_for_view(
        rx: &Receiver<String>,
        mut predicate: impl FnMut(&[ReportedEntry]) -> bool,
    ) -> Vec<ReportedEntry> {
        loop {
            let line = rx
                .recv_timeout(Duration::from_secs(10))
                .expect("monitor stopped reporting");
            let view: Vec<ReportedEntry> = serde_json::from_str(&line).unwrap();
            if predicate(&view) {
                return view;
            }
        }
    }

    #[test]
    fn test_monitor_reports_static_table_changes() {
        let dir = TempDir::new().unwrap();
        let (fstab, mtab) = write_tables(&dir, "# static\n", "");
        let config = Config {
            fstab: fstab.clone(),
            mtab,
            ..Config::default()
        };

        let (tx, rx) = mpsc::channel();
        let writer = ChannelWriter {
            buf: Vec::new(),
            tx,
        };
        let monitor = Monitor::new(&config, writer).unwrap();
        std::thread::spawn(move || {
            let _ = monitor.run();
        });

        let initial = wait_for_view(&rx, |_| true);
        assert!(initial.is_empty());

        // Replacing the file by rename drops the watch; it must be re-armed.
        let first = TabEntry::new("nas:/a", "/mnt/a", "nfs", "rw");
        tab::rewrite(&fstab, |fields| match fields {
            Some(fields) => Some(fields.clone()),
            None => Some(first.clone()),
        })
        .unwrap();
        wait_for_view(&rx, |view| view.len() == 1);

        // A plain write to the new file is seen through the re-armed watch.
        fs::write(&fstab, "nas:/a /mnt/a nfs rw\nnas:/b /mnt/b nfs ro\n").unwrap();
        let view = wait_for_view(&rx, |view| view.len() == 2);
        assert_eq!(view[1].fields.remote(), Some("nas:/b"));
        assert!(view.iter().all(|record| record.from_static_config && !record.mounted));
    }
}
