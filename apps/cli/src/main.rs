//! NFS mount CLI - Command line interface for monitoring and managing NFS mounts.
//!
//! Every subcommand maps to one [`Operation`]. Entries and field lists are
//! passed as JSON, exactly as they appear in the monitor's reports.
//! Failures print a single diagnostic line to stderr; failures of external
//! tools exit with the tool's own status.

use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use nfsmount_core::config::{Config, LIVE_TABLE_PATH};
use nfsmount_core::executor::{ExecutionContext, PrivilegeEscalation};
use nfsmount_core::occupancy::PROC_ROOT;
use nfsmount_core::tab::{FSTAB_PATH, MTAB_PATH};
use nfsmount_core::{Context, Error, Operation, ReportedEntry, TabEntry};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "NFSMOUNT_LOG";

/// NFS mount CLI tool.
#[derive(Parser)]
#[command(name = "nfsmount")]
#[command(about = "Monitor and manage NFS mounts", long_about = None)]
struct Cli {
    /// Static mount table.
    #[arg(long, env = "NFSMOUNT_FSTAB", default_value = FSTAB_PATH, global = true)]
    fstab: PathBuf,

    /// Live mount table contents.
    #[arg(long, env = "NFSMOUNT_MTAB", default_value = MTAB_PATH, global = true)]
    mtab: PathBuf,

    /// Kernel file signalling live mount table changes.
    #[arg(long, env = "NFSMOUNT_LIVE_TABLE", default_value = LIVE_TABLE_PATH, global = true)]
    live_table: PathBuf,

    /// Root of the process table.
    #[arg(long, env = "NFSMOUNT_PROC_ROOT", default_value = PROC_ROOT, global = true)]
    proc_root: PathBuf,

    /// How to gain privileges for mount, umount and systemctl.
    #[arg(long, value_enum, default_value_t = Escalation::None, global = true)]
    escalation: Escalation,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Escalation {
    None,
    Sudo,
    Pkexec,
}

impl From<Escalation> for PrivilegeEscalation {
    fn from(escalation: Escalation) -> Self {
        match escalation {
            Escalation::None => PrivilegeEscalation::None,
            Escalation::Sudo => PrivilegeEscalation::Sudo,
            Escalation::Pkexec => PrivilegeEscalation::Pkexec,
        }
    }
}

/// A JSON list of unit names.
#[derive(Clone, serde::Deserialize)]
#[serde(transparent)]
struct Units(Vec<String>);

fn json<T: serde::de::DeserializeOwned>(arg: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(arg)
}

#[derive(Subcommand)]
enum Commands {
    /// Print the mount view as a JSON line now and after every change.
    Monitor,
    /// Replace ENTRY's configuration with FIELDS.
    Update {
        #[arg(value_parser = json::<ReportedEntry>)]
        entry: ReportedEntry,
        #[arg(value_parser = json::<TabEntry>)]
        fields: TabEntry,
    },
    /// Configure and mount FIELDS.
    Add {
        #[arg(value_parser = json::<TabEntry>)]
        fields: TabEntry,
    },
    /// Unmount ENTRY and remove it from the configuration.
    Remove {
        #[arg(value_parser = json::<ReportedEntry>)]
        entry: ReportedEntry,
    },
    /// Mount ENTRY.
    Mount {
        #[arg(value_parser = json::<ReportedEntry>)]
        entry: ReportedEntry,
    },
    /// Unmount ENTRY.
    Unmount {
        #[arg(value_parser = json::<ReportedEntry>)]
        entry: ReportedEntry,
    },
    /// Apply the options of FIELDS to the mounted entry.
    Remount {
        #[arg(value_parser = json::<TabEntry>)]
        fields: TabEntry,
    },
    /// Stop UNITS, then unmount ENTRY.
    StopAndUnmount {
        #[arg(value_parser = json::<Units>)]
        units: Units,
        #[arg(value_parser = json::<ReportedEntry>)]
        entry: ReportedEntry,
    },
    /// Stop UNITS, then remove ENTRY.
    StopAndRemove {
        #[arg(value_parser = json::<Units>)]
        units: Units,
        #[arg(value_parser = json::<ReportedEntry>)]
        entry: ReportedEntry,
    },
    /// Print the units using ENTRY's mount point as a JSON line.
    Users {
        #[arg(value_parser = json::<ReportedEntry>)]
        entry: ReportedEntry,
    },
}

impl From<Commands> for Operation {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Monitor => Operation::Monitor,
            Commands::Update { entry, fields } => Operation::Update { entry, fields },
            Commands::Add { fields } => Operation::Add { fields },
            Commands::Remove { entry } => Operation::Remove { entry },
            Commands::Mount { entry } => Operation::Mount { entry },
            Commands::Unmount { entry } => Operation::Unmount { entry },
            Commands::Remount { fields } => Operation::Remount { fields },
            Commands::StopAndUnmount { units, entry } => Operation::StopAndUnmount {
                units: units.0,
                entry,
            },
            Commands::StopAndRemove { units, entry } => Operation::StopAndRemove {
                units: units.0,
                entry,
            },
            Commands::Users { entry } => Operation::Users { entry },
        }
    }
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            fstab: self.fstab.clone(),
            mtab: self.mtab.clone(),
            live_table: self.live_table.clone(),
            proc_root: self.proc_root.clone(),
        }
    }
}

/// Logs go to stderr; stdout carries reports.
fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Renders an error and its causes on one line.
fn diagnostic(err: &Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message.replace('\n', " ")
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let ctx = Context::system(
        cli.config(),
        ExecutionContext::with_escalation(cli.escalation.into()),
    );
    let operation = Operation::from(cli.command);
    tracing::debug!(
        operation = %serde_json::to_value(&operation).unwrap_or(serde_json::Value::Null),
        "dispatching"
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = nfsmount_core::execute(operation, &ctx, &mut out) {
        eprintln!("{}", diagnostic(&e));
        std::process::exit(e.exit_code());
    }
}
