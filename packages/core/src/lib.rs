//! nfsmount-core: Core library for monitoring and managing NFS mounts.
//!
//! This library keeps the network entries of the static mount table
//! (`/etc/fstab`) and the live mount table in view, and performs the
//! operations that keep both in sync.
//!
//! # Modules
//!
//! - [`tab`]: Mount table parsing and atomic rewriting
//! - [`index`]: Lookup of entries by remote
//! - [`reconcile`]: Merging static and live tables into one view
//! - [`watcher`]: File change notification for the static table
//! - [`monitor`]: The watch loop reporting the view after every change
//! - [`lifecycle`]: Add, update and remove configured mounts
//! - [`mount`]: Mount/unmount tools and mount point directories
//! - [`occupancy`]: Finding units that keep a mount point busy
//! - [`systemd`]: Unit lookup and control
//! - [`operation`]: Typed operations and their dispatch
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```
//! use nfsmount_core::reconcile::reconcile;
//! use nfsmount_core::tab::TabEntry;
//!
//! let fstab = vec![TabEntry::new("nas:/export", "/mnt/data", "nfs", "rw")];
//! let mtab = vec![TabEntry::new("nas:/export", "/mnt/data", "nfs", "rw,vers=4")];
//!
//! let view = reconcile(&fstab, &mtab);
//! assert_eq!(view.len(), 1);
//! assert!(view[0].mounted);
//! assert_eq!(view[0].fields, fstab[0]);
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod index;
pub mod lifecycle;
pub mod monitor;
pub mod mount;
pub mod occupancy;
pub mod operation;
pub mod reconcile;
pub mod systemd;
pub mod tab;
pub mod watcher;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use occupancy::Occupant;
pub use operation::{Context, Operation, execute};
pub use reconcile::ReportedEntry;
pub use tab::TabEntry;
