//! Command execution abstraction with privilege escalation support.
//!
//! External tools (`mount`, `umount`, `systemctl`) are run through an
//! [`ExecutionContext`], optionally wrapped in `pkexec` (GUI) or `sudo` (TTY).

use std::process::{Command, Output};

use crate::error::{Error, IoResultExt, Result};

/// Privilege escalation method for executing commands that require root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrivilegeEscalation {
    /// Execute directly without privilege escalation.
    #[default]
    None,
    /// Use `pkexec` for GUI-based privilege escalation (polkit).
    Pkexec,
    /// Use `sudo` for TTY-based privilege escalation.
    Sudo,
}

impl PrivilegeEscalation {
    fn wrapper(self) -> Option<&'static str> {
        match self {
            PrivilegeEscalation::None => None,
            PrivilegeEscalation::Pkexec => Some("pkexec"),
            PrivilegeEscalation::Sudo => Some("sudo"),
        }
    }
}

/// Execution context for running system commands.
///
/// # Example
///
/// ```
/// use nfsmount_core::executor::{ExecutionContext, PrivilegeEscalation};
///
/// // Default: the caller is already privileged
/// let ctx = ExecutionContext::default();
/// assert_eq!(ctx.escalation(), PrivilegeEscalation::None);
///
/// // For terminal sessions
/// let tty_ctx = ExecutionContext::with_escalation(PrivilegeEscalation::Sudo);
/// assert_eq!(tty_ctx.escalation(), PrivilegeEscalation::Sudo);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    escalation: PrivilegeEscalation,
}

impl ExecutionContext {
    /// Creates a new execution context with no privilege escalation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an execution context with a specific escalation method.
    pub fn with_escalation(escalation: PrivilegeEscalation) -> Self {
        Self { escalation }
    }

    /// Returns the current privilege escalation method.
    pub fn escalation(&self) -> PrivilegeEscalation {
        self.escalation
    }

    /// Executes a command that requires root privileges.
    pub fn run_privileged(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let mut command = match self.escalation.wrapper() {
            Some(wrapper) => {
                let mut command = Command::new(wrapper);
                command.arg(cmd);
                command
            }
            None => Command::new(cmd),
        };

        tracing::debug!(cmd, ?args, escalation = ?self.escalation, "running command");
        command.args(args).output().command_context(cmd)
    }

    /// Executes a command that requires root privileges, checking for success.
    ///
    /// A non-zero exit becomes [`Error::CommandExit`] carrying the status.
    pub fn run_privileged_checked(&self, cmd: &str, args: &[&str]) -> Result<()> {
        let output = self.run_privileged(cmd, args)?;
        check_status(self.escalation, cmd, &output)
    }
}

fn check_status(escalation: PrivilegeEscalation, cmd: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }

    // pkexec reports a dismissed authentication dialog as 126
    if escalation == PrivilegeEscalation::Pkexec && output.status.code() == Some(126) {
        return Err(Error::AuthenticationCancelled);
    }

    Err(Error::CommandExit {
        command: cmd.to_string(),
        code: output.status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_context() {
        let ctx = ExecutionContext::default();
        assert_eq!(ctx.escalation(), PrivilegeEscalation::None);
    }

    #[test]
    fn test_wrappers() {
        assert_eq!(PrivilegeEscalation::None.wrapper(), None);
        assert_eq!(PrivilegeEscalation::Pkexec.wrapper(), Some("pkexec"));
        assert_eq!(PrivilegeEscalation::Sudo.wrapper(), Some("sudo"));
    }

    #[test]
    fn test_checked_reports_exit_status() {
        let ctx = ExecutionContext::new();
        ctx.run_privileged_checked("true", &[]).unwrap();

        let err = ctx.run_privileged_checked("sh", &["-c", "echo nope >&2; exit 3"]).unwrap_err();
        match err {
            Error::CommandExit { command, code, stderr } => {
                assert_eq!(command, "sh");
                assert_eq!(code, 3);
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_command_is_execution_error() {
        let ctx = ExecutionContext::new();
        let err = ctx
            .run_privileged("nfsmount-definitely-missing-tool", &[])
            .unwrap_err();
        assert!(matches!(err, Error::CommandExecution { .. }));
    }
}
