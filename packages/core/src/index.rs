//! Lookup of table entries by remote identifier.

use std::collections::HashMap;

use crate::tab::TabEntry;

/// Entries of one table grouped by their remote identifier.
#[derive(Debug, Default)]
pub struct TabIndex<'a> {
    by_remote: HashMap<&'a str, Vec<&'a TabEntry>>,
}

impl<'a> TabIndex<'a> {
    pub fn new(entries: &'a [TabEntry]) -> Self {
        let mut by_remote: HashMap<&str, Vec<&TabEntry>> = HashMap::new();
        for entry in entries {
            if let Some(remote) = entry.remote() {
                by_remote.entry(remote).or_default().push(entry);
            }
        }
        Self { by_remote }
    }

    /// Returns the first indexed entry naming the same mount as `fields`.
    pub fn find_match(&self, fields: &TabEntry) -> Option<&'a TabEntry> {
        let remote = fields.remote()?;
        self.by_remote
            .get(remote)?
            .iter()
            .copied()
            .find(|candidate| candidate.same_mount(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_match_ignores_type_and_options() {
        let entries = vec![
            TabEntry::new("nas:/export", "/mnt/other", "nfs", "rw"),
            TabEntry::new("nas:/export", "/mnt/data", "nfs4", "rw,vers=4"),
            TabEntry::new("nas:/export", "/mnt/data", "nfs", "ro"),
        ];
        let index = TabIndex::new(&entries);

        let query = TabEntry::new("nas:/export", "/mnt/data", "nfs", "rw");
        let found = index.find_match(&query).unwrap();
        assert!(std::ptr::eq(found, &entries[1]));
    }

    #[test]
    fn test_find_match_misses() {
        let entries = vec![TabEntry::new("nas:/export", "/mnt/data", "nfs", "rw")];
        let index = TabIndex::new(&entries);

        assert!(index
            .find_match(&TabEntry::new("nas:/other", "/mnt/data", "nfs", "rw"))
            .is_none());
        assert!(index
            .find_match(&TabEntry::new("nas:/export", "/mnt/data2", "nfs", "rw"))
            .is_none());
        assert!(index.find_match(&TabEntry::default()).is_none());
    }
}
