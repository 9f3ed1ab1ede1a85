//! Unified error types for the nfsmount-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error`) appears in different contexts.

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Failed to execute a system command.
    #[snafu(display("failed to execute command '{command}'"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// Command executed but returned non-zero exit code.
    #[snafu(display("command '{command}' exited with code {code}: {stderr}"))]
    CommandExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Tab file not found or cannot be read.
    #[snafu(display("failed to read mount table at {}", path.display()))]
    TabRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write or replace a tab file.
    #[snafu(display("failed to write mount table at {}", path.display()))]
    TabWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Process table cannot be listed.
    #[snafu(display("failed to read process table at {}", path.display()))]
    ProcRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Entry does not carry the fields an operation needs.
    #[snafu(display("invalid mount entry {fields:?}: {message}"))]
    InvalidEntry { fields: Vec<String>, message: String },

    /// Mount point creation failed.
    #[snafu(display("failed to create mount point at {}", path.display()))]
    MountPointCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Mount point removal failed for a reason other than being non-empty.
    #[snafu(display("failed to remove mount point at {}", path.display()))]
    MountPointRemoval {
        path: PathBuf,
        source: std::io::Error,
    },

    /// File change notification could not be set up or read.
    #[snafu(display("file change notification failed for {}", path.display()))]
    Notify { path: PathBuf, source: nix::Error },

    /// Waiting on the change descriptors failed.
    #[snafu(display("failed to wait for mount table changes"))]
    Poll { source: nix::Error },

    /// Failed to emit a snapshot or result to the consumer.
    #[snafu(display("failed to write report"))]
    Report { source: std::io::Error },

    /// Failed to encode a snapshot or result.
    #[snafu(display("failed to encode report"))]
    Encode { source: serde_json::Error },

    /// Service manager query or control failed.
    #[snafu(display("systemd operation failed: {message}"))]
    Systemd { message: String },

    /// User cancelled authentication dialog.
    #[snafu(display("authentication cancelled by user"))]
    AuthenticationCancelled,
}

impl Error {
    /// Exit status a command surface should terminate with for this error.
    ///
    /// Failures of external tools propagate the tool's own status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::CommandExit { code, .. } if *code > 0 => *code,
            Error::AuthenticationCancelled => 126,
            _ => 1,
        }
    }
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for command execution errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;

    /// Add context for tab read errors.
    fn tab_read_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for tab write errors.
    fn tab_write_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for process table errors.
    fn proc_read_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for mount point creation errors.
    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for mount point removal errors.
    fn mount_point_removal_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for errors writing to the consumer stream.
    fn report_context(self) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandExecutionSnafu {
            command: command.into(),
        })
    }

    fn tab_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(TabReadSnafu { path: path.into() })
    }

    fn tab_write_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(TabWriteSnafu { path: path.into() })
    }

    fn proc_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(ProcReadSnafu { path: path.into() })
    }

    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountPointCreationSnafu { path: path.into() })
    }

    fn mount_point_removal_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountPointRemovalSnafu { path: path.into() })
    }

    fn report_context(self) -> Result<T> {
        self.context(ReportSnafu)
    }
}

/// Outcome of a best-effort step.
///
/// Fatal failures of such a step are still returned as `Err`; `Recovered`
/// carries a failure the caller decided to tolerate.
#[derive(Debug)]
#[must_use]
pub enum Cleanup {
    /// The step completed.
    Done,
    /// The step failed in a tolerated way.
    Recovered(Error),
}

impl Cleanup {
    /// Logs a recovered failure and reports whether the step completed.
    pub fn log(self, step: &str) -> bool {
        match self {
            Cleanup::Done => true,
            Cleanup::Recovered(err) => {
                tracing::warn!(step, error = %err, "ignoring failed best-effort step");
                false
            }
        }
    }
}
