//! Merging of the static configuration table with the live mount table.
//!
//! A live mount that corresponds to a configured entry (same remote and mount
//! point) is folded into that entry; the report shows the configured fields,
//! not the live ones. Live mounts without a configured counterpart are
//! reported on their own.

use serde::{Deserialize, Serialize};

use crate::index::TabIndex;
use crate::tab::TabEntry;

/// One record of the reported view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedEntry {
    /// Whether the entry comes from the static configuration table.
    #[serde(rename = "fstab", default)]
    pub from_static_config: bool,
    pub fields: TabEntry,
    #[serde(default)]
    pub mounted: bool,
}

impl ReportedEntry {
    /// A record for fields that are not known to be mounted.
    pub fn unmounted(fields: TabEntry) -> Self {
        Self {
            from_static_config: false,
            fields,
            mounted: false,
        }
    }
}

/// Merges both tables into the reported view.
///
/// Static entries come first in file order, followed by unmatched live
/// entries in live-table order.
pub fn reconcile(static_entries: &[TabEntry], live_entries: &[TabEntry]) -> Vec<ReportedEntry> {
    let live_index = TabIndex::new(live_entries);
    let static_index = TabIndex::new(static_entries);

    let configured = static_entries.iter().map(|entry| ReportedEntry {
        from_static_config: true,
        fields: entry.clone(),
        mounted: live_index.find_match(entry).is_some(),
    });

    let unmatched = live_entries
        .iter()
        .filter(|entry| static_index.find_match(entry).is_none())
        .map(|entry| ReportedEntry {
            from_static_config: false,
            fields: entry.clone(),
            mounted: true,
        });

    configured.chain(unmatched).collect()
}
