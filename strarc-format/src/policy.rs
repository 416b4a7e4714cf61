use std::fmt;
use std::str::FromStr;

use crate::{fs::Disposition, path::ArchivePath};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMethod {
    /// Everything selected; archive flags untouched.
    Copy,
    /// Everything selected; archive flags cleared afterwards.
    Full,
    /// Only flagged objects; flags untouched.
    Differential,
    /// Only flagged objects; flags cleared afterwards.
    Incremental,
}

impl BackupMethod {
    #[inline(always)]
    pub fn requires_archive_flag(self) -> bool {
        matches!(self, BackupMethod::Differential | BackupMethod::Incremental)
    }

    #[inline(always)]
    pub fn clears_archive_flag(self) -> bool {
        matches!(self, BackupMethod::Full | BackupMethod::Incremental)
    }
}

impl Default for BackupMethod {
    fn default() -> Self {
        BackupMethod::Copy
    }
}

#[derive(Debug)]
pub struct ParseMethodError(String);

impl std::error::Error for ParseMethodError {}

impl fmt::Display for ParseMethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown backup method: {}", self.0)
    }
}

impl FromStr for BackupMethod {
    type Err = ParseMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = match s.to_ascii_lowercase().as_str() {
            "c" | "copy" => BackupMethod::Copy,
            "f" | "full" => BackupMethod::Full,
            "d" | "diff" | "differential" => BackupMethod::Differential,
            "i" | "inc" | "incremental" => BackupMethod::Incremental,
            _ => return Err(ParseMethodError(s.to_string())),
        };
        Ok(method)
    }
}

/// Case-insensitive substring include/exclude lists.
///
/// `/` and `\` are treated alike. Exclusion always wins; an empty include
/// list includes everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl Filter {
    pub fn new<I, E, S, T>(include: I, exclude: E) -> Filter
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Filter {
            include: include.into_iter().filter_map(|s| normalize(s.as_ref())).collect(),
            exclude: exclude.into_iter().filter_map(|s| normalize(s.as_ref())).collect(),
        }
    }

    pub fn is_excluded(&self, path: &ArchivePath) -> bool {
        let haystack = path.as_str().to_lowercase();
        self.exclude.iter().any(|needle| haystack.contains(needle.as_str()))
    }

    pub fn is_included(&self, path: &ArchivePath) -> bool {
        if self.include.is_empty() {
            return true;
        }
        let haystack = path.as_str().to_lowercase();
        self.include.iter().any(|needle| haystack.contains(needle.as_str()))
    }

    pub fn has_includes(&self) -> bool {
        !self.include.is_empty()
    }
}

fn normalize(pattern: &str) -> Option<String> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return None;
    }
    Some(pattern.replace('/', "\\").to_lowercase())
}

/// When an existing object at a restore target may be replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverwritePolicy {
    /// Replace existing files instead of failing on them.
    pub existing: bool,
    /// Keep existing files whose last write is not older than the archived one.
    pub older_only: bool,
    /// Keep existing objects that changed since their last backup.
    pub unmodified_only: bool,
    /// Restore only objects that already exist.
    pub freshen_only: bool,
}

impl OverwritePolicy {
    pub fn is_conditional(&self) -> bool {
        self.older_only || self.unmodified_only || self.freshen_only
    }

    pub(crate) fn disposition(&self) -> Disposition {
        if self.existing || self.is_conditional() {
            Disposition::Overwrite
        } else {
            Disposition::CreateNew
        }
    }
}

/// Immutable per-run settings.
#[derive(Debug, Clone)]
pub struct Policy {
    pub method: BackupMethod,
    pub filter: Filter,
    pub overwrite: OverwritePolicy,
    /// Deduplicate multiply-linked files on backup and relink them on restore.
    pub hard_links: bool,
    pub security: bool,
    pub times: bool,
    pub attributes: bool,
    /// Restore the compression flag.
    pub compression: bool,
    /// Store and restore short names.
    pub short_names: bool,
    /// Restore files under their stored short name.
    pub restore_short_names: bool,
    /// Do not follow reparse points while traversing.
    pub local: bool,
    /// Decode and count without writing anything.
    pub test_only: bool,
    /// Report selected objects without producing archive output.
    pub list_only: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            method: BackupMethod::Copy,
            filter: Filter::default(),
            overwrite: OverwritePolicy::default(),
            hard_links: true,
            security: true,
            times: true,
            attributes: true,
            compression: true,
            short_names: true,
            restore_short_names: false,
            local: false,
            test_only: false,
            list_only: false,
        }
    }
}
