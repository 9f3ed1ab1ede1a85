//! Mount table parsing and rewriting module.
//!
//! This module reads the line-oriented `fstab(5)`/`mtab` format and rewrites
//! it in place. Only network entries (a first field containing `:`) are
//! interpreted; every other line is carried through verbatim, so a rewrite
//! never disturbs content owned by other tools or by the administrator.
//!
//! Updates go through a sibling temporary file that is fsynced and then
//! renamed over the original, so readers only ever observe the old or the
//! new file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};

/// Default static configuration table.
pub const FSTAB_PATH: &str = "/etc/fstab";

/// Default live mount table.
pub const MTAB_PATH: &str = "/etc/mtab";

/// A parsed table entry: the unescaped fields of one line.
///
/// By convention the fields are remote, mount point, filesystem type and
/// options, but any number of fields is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabEntry(pub Vec<String>);

impl TabEntry {
    /// Creates an entry from its four conventional fields.
    pub fn new(
        remote: impl Into<String>,
        mount_point: impl Into<String>,
        fs_type: impl Into<String>,
        options: impl Into<String>,
    ) -> Self {
        Self(vec![
            remote.into(),
            mount_point.into(),
            fs_type.into(),
            options.into(),
        ])
    }

    /// Remote resource identifier, e.g. `nas:/export`.
    pub fn remote(&self) -> Option<&str> {
        self.field(0)
    }

    /// Local mount point.
    pub fn mount_point(&self) -> Option<&str> {
        self.field(1)
    }

    /// Filesystem type.
    pub fn fs_type(&self) -> Option<&str> {
        self.field(2)
    }

    /// Comma-joined mount options.
    pub fn options(&self) -> Option<&str> {
        self.field(3)
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn fields(&self) -> &[String] {
        &self.0
    }

    /// Returns true if both entries name the same mount: same remote and
    /// same mount point, regardless of type and options.
    pub fn same_mount(&self, other: &TabEntry) -> bool {
        self.remote() == other.remote() && self.mount_point() == other.mount_point()
    }

    /// Parses a single line into an entry.
    ///
    /// Returns None for comments, blank lines and lines that are not
    /// network entries.
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let fields: Vec<String> = line
            .split([' ', '\t'])
            .filter(|field| !field.is_empty())
            .map(field_unescape)
            .collect();

        match fields.first() {
            Some(remote) if remote.contains(':') => Some(Self(fields)),
            _ => None,
        }
    }

    /// Formats the entry as a table line.
    pub fn to_tab_line(&self) -> String {
        self.0
            .iter()
            .map(|field| field_escape(field))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The four conventional fields, or an error naming what is missing.
    pub fn require_mount_fields(&self) -> Result<(&str, &str, &str, &str)> {
        match self.0.as_slice() {
            [remote, mount_point, fs_type, options, ..] => Ok((
                remote.as_str(),
                mount_point.as_str(),
                fs_type.as_str(),
                options.as_str(),
            )),
            _ => Err(Error::InvalidEntry {
                fields: self.0.clone(),
                message: "expected remote, mount point, type and options".to_string(),
            }),
        }
    }

    /// Checks that the entry would be read back as a network entry.
    pub fn require_network(&self) -> Result<()> {
        self.require_mount_fields()?;
        match self.remote() {
            Some(remote) if remote.contains(':') => Ok(()),
            _ => Err(Error::InvalidEntry {
                fields: self.0.clone(),
                message: "remote must be of the form host:path".to_string(),
            }),
        }
    }
}

/// Escapes a field using octal sequences.
///
/// Handles backslash (\134), space (\040) and tab (\011).
pub fn field_escape(field: &str) -> String {
    let mut encoded = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => encoded.push_str(r"\134"),
            ' ' => encoded.push_str(r"\040"),
            '\t' => encoded.push_str(r"\011"),
            _ => encoded.push(c),
        }
    }
    encoded
}

/// Unescapes `\N`, `\NN` and `\NNN` octal sequences.
///
/// A backslash not followed by an octal digit is kept as is.
pub fn field_unescape(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }

        let mut value = 0u32;
        let mut digits = 0;
        while digits < 3
            && let Some(digit) = chars.peek().and_then(|d| d.to_digit(8))
        {
            value = value * 8 + digit;
            digits += 1;
            chars.next();
        }

        match char::from_u32(value) {
            Some(decoded) if digits > 0 => result.push(decoded),
            _ => result.push('\\'),
        }
    }
    result
}

/// One line of a table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabLine {
    /// A network entry together with the exact text it was parsed from.
    Entry { fields: TabEntry, raw: String },
    /// Comment, blank or non-network line, preserved verbatim.
    Foreign(String),
}

impl TabLine {
    fn parse(line: &str) -> Self {
        match TabEntry::from_line(line) {
            Some(fields) => TabLine::Entry {
                fields,
                raw: line.to_string(),
            },
            None => TabLine::Foreign(line.to_string()),
        }
    }

    pub fn entry(&self) -> Option<&TabEntry> {
        match self {
            TabLine::Entry { fields, .. } => Some(fields),
            TabLine::Foreign(_) => None,
        }
    }
}

/// A whole table file as an ordered sequence of lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabDocument {
    pub lines: Vec<TabLine>,
}

impl TabDocument {
    /// Parses table content.
    ///
    /// Lines are split on `\n` only, so carriage returns and other trailing
    /// bytes of foreign lines survive a rewrite.
    pub fn parse_str(content: &str) -> Self {
        let mut raw_lines: Vec<&str> = content.split('\n').collect();
        if raw_lines.last() == Some(&"") {
            raw_lines.pop();
        }

        Self {
            lines: raw_lines.into_iter().map(TabLine::parse).collect(),
        }
    }

    /// The entries of the document in file order.
    pub fn entries(&self) -> impl Iterator<Item = &TabEntry> {
        self.lines.iter().filter_map(TabLine::entry)
    }

    pub fn into_entries(self) -> Vec<TabEntry> {
        self.lines
            .into_iter()
            .filter_map(|line| match line {
                TabLine::Entry { fields, .. } => Some(fields),
                TabLine::Foreign(_) => None,
            })
            .collect()
    }

    /// Applies `transform` to every entry and renders the new content.
    ///
    /// `transform` receives `Some(entry)` once per entry line, in order, and
    /// returns the replacement or `None` to delete the line. An entry
    /// without fields counts as `None`. An unchanged return keeps the
    /// original text. Finally it is called once with `None`; a returned
    /// entry is appended.
    pub fn transform<F>(&self, mut transform: F) -> String
    where
        F: FnMut(Option<&TabEntry>) -> Option<TabEntry>,
    {
        let mut output = String::new();

        for line in &self.lines {
            match line {
                TabLine::Foreign(raw) => push_line(&mut output, raw),
                TabLine::Entry { fields, raw } => match transform(Some(fields)) {
                    Some(new_fields) if new_fields == *fields => push_line(&mut output, raw),
                    Some(new_fields) if !new_fields.0.is_empty() => {
                        push_line(&mut output, &new_fields.to_tab_line())
                    }
                    _ => {}
                },
            }
        }

        if let Some(appended) = transform(None)
            && !appended.0.is_empty()
        {
            push_line(&mut output, &appended.to_tab_line());
        }

        output
    }
}

fn push_line(output: &mut String, line: &str) {
    output.push_str(line);
    output.push('\n');
}

/// Reads and parses a table file.
pub fn parse(path: &Path) -> Result<TabDocument> {
    let content = fs::read_to_string(path).tab_read_context(path)?;
    Ok(TabDocument::parse_str(&content))
}

/// Reads a table file and returns only its entries.
pub fn read_entries(path: &Path) -> Result<Vec<TabEntry>> {
    Ok(parse(path)?.into_entries())
}

/// Rewrites a table file atomically.
///
/// See [`TabDocument::transform`] for the contract of `transform`.
pub fn rewrite<F>(path: &Path, transform: F) -> Result<()>
where
    F: FnMut(Option<&TabEntry>) -> Option<TabEntry>,
{
    stage_rewrite(path, transform)?.commit()
}

/// Writes the transformed content next to `path` without replacing it yet.
pub fn stage_rewrite<F>(path: &Path, transform: F) -> Result<PendingRewrite>
where
    F: FnMut(Option<&TabEntry>) -> Option<TabEntry>,
{
    let document = parse(path)?;
    let content = document.transform(transform);
    let staged = staging_path(path);

    let pending = PendingRewrite {
        target: path.to_path_buf(),
        staged,
        committed: false,
    };

    let mut file = File::create(&pending.staged).tab_write_context(&pending.staged)?;
    file.write_all(content.as_bytes())
        .tab_write_context(&pending.staged)?;
    file.flush().tab_write_context(&pending.staged)?;

    let permissions = fs::metadata(path).tab_read_context(path)?.permissions();
    file.set_permissions(permissions)
        .tab_write_context(&pending.staged)?;
    file.sync_all().tab_write_context(&pending.staged)?;

    Ok(pending)
}

/// The sibling temporary file used while rewriting `path`.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// A fully written and synced replacement that has not been renamed into
/// place. Dropping it without committing discards the staged file.
#[derive(Debug)]
pub struct PendingRewrite {
    target: PathBuf,
    staged: PathBuf,
    committed: bool,
}

impl PendingRewrite {
    /// Path of the staged replacement.
    pub fn staged_path(&self) -> &Path {
        &self.staged
    }

    /// Atomically replaces the target with the staged file.
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.staged, &self.target).tab_write_context(&self.target)?;
        self.committed = true;
        tracing::debug!(path = %self.target.display(), "rewrote mount table");
        Ok(())
    }
}

impl Drop for PendingRewrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.staged);
        }
    }
}
