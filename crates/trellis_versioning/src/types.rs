//! Version records and operation options.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use trellis_codec::ContentHash;

/// Tag given to the snapshot taken before a restore.
pub const BEFORE_RESTORE_TAG: &str = "before-restore";

/// Metadata of one saved version of an entity.
///
/// The body itself lives in [`VersionStorage`](crate::VersionStorage) under
/// `content_hash`; versions with equal bodies share one stored blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityVersion {
    /// Version number, starting at 1 per (entity, branch).
    pub version: u32,
    /// Entity id.
    pub entity_id: String,
    /// Branch the version was saved on.
    pub branch: String,
    /// Host commit anchoring the version.
    pub commit_hash: String,
    /// Save time, ms since the epoch.
    pub timestamp: u64,
    /// Optional tag.
    pub tag: Option<String>,
    /// Optional description.
    pub description: Option<String>,
    /// Hash of the canonical body.
    pub content_hash: ContentHash,
    /// Optional author.
    pub author: Option<String>,
    /// Arbitrary caller metadata.
    pub metadata: Option<Value>,
}

impl EntityVersion {
    /// Returns true if the version carries a tag.
    pub fn is_tagged(&self) -> bool {
        self.tag.is_some()
    }
}

/// Identifies a version by number or by tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionRef {
    /// Version number.
    Number(u32),
    /// Version tag. The newest version carrying the tag wins.
    Tag(String),
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Tag(tag) => f.write_str(tag),
        }
    }
}

impl From<u32> for VersionRef {
    fn from(version: u32) -> Self {
        Self::Number(version)
    }
}

impl From<&str> for VersionRef {
    fn from(tag: &str) -> Self {
        Self::Tag(tag.to_string())
    }
}

impl From<String> for VersionRef {
    fn from(tag: String) -> Self {
        Self::Tag(tag)
    }
}

/// Filter for [`VersionManager::list`](crate::VersionManager::list).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionQuery {
    /// Branch to list; the host's current branch when unset.
    pub branch: Option<String>,
    /// Only versions carrying exactly this tag.
    pub tag: Option<String>,
    /// Only versions saved at or after this time.
    pub start_time: Option<u64>,
    /// Only versions saved at or before this time.
    pub end_time: Option<u64>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Number of matching results to skip.
    pub offset: usize,
}

impl VersionQuery {
    /// Creates an unfiltered query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the branch.
    #[must_use]
    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Sets the tag filter.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Sets the inclusive time range.
    #[must_use]
    pub fn time_range(mut self, start: Option<u64>, end: Option<u64>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    /// Sets the result limit.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the offset.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub(crate) fn matches(&self, version: &EntityVersion) -> bool {
        if let Some(tag) = &self.tag {
            if version.tag.as_deref() != Some(tag.as_str()) {
                return false;
            }
        }
        if self.start_time.is_some_and(|start| version.timestamp < start) {
            return false;
        }
        if self.end_time.is_some_and(|end| version.timestamp > end) {
            return false;
        }
        true
    }
}

/// Options for [`VersionManager::save`](crate::VersionManager::save).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveVersionOptions {
    /// Tag for the new version.
    pub tag: Option<String>,
    /// Description of the new version.
    pub description: Option<String>,
    /// Author recorded on the version and on a created commit.
    pub author: Option<String>,
    /// Arbitrary metadata recorded on the version and on a created commit.
    pub metadata: Option<Value>,
    /// Create a host commit instead of anchoring to the branch head.
    pub create_commit: bool,
    /// Message of a created commit.
    pub commit_message: Option<String>,
}

impl SaveVersionOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the author.
    #[must_use]
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Creates a host commit for the version.
    #[must_use]
    pub fn create_commit(mut self, create_commit: bool) -> Self {
        self.create_commit = create_commit;
        self
    }

    /// Sets the commit message. Implies nothing unless `create_commit` is set.
    #[must_use]
    pub fn commit_message(mut self, message: impl Into<String>) -> Self {
        self.commit_message = Some(message.into());
        self
    }
}

/// Options for [`VersionManager::restore`](crate::VersionManager::restore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Save the current state before overwriting it.
    pub create_snapshot: bool,
    /// Tag of that snapshot.
    pub snapshot_tag: String,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            create_snapshot: false,
            snapshot_tag: BEFORE_RESTORE_TAG.to_string(),
        }
    }
}

impl RestoreOptions {
    /// Creates default options (no snapshot).
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the pre-restore snapshot.
    #[must_use]
    pub fn create_snapshot(mut self, create_snapshot: bool) -> Self {
        self.create_snapshot = create_snapshot;
        self
    }

    /// Sets the snapshot tag.
    #[must_use]
    pub fn snapshot_tag(mut self, tag: impl Into<String>) -> Self {
        self.snapshot_tag = tag.into();
        self
    }
}

/// Options for [`VersionManager::prune`](crate::VersionManager::prune).
///
/// A version survives if any keep rule matches it. At least one of
/// `keep_recent` and `keep_after` must be set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneOptions {
    /// Keep this many of the newest versions.
    pub keep_recent: Option<usize>,
    /// Keep versions saved strictly after this time.
    pub keep_after: Option<u64>,
    /// Keep tagged versions.
    pub keep_tagged: bool,
    /// Report what would be deleted without deleting it.
    pub dry_run: bool,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            keep_recent: None,
            keep_after: None,
            keep_tagged: true,
            dry_run: false,
        }
    }
}

impl PruneOptions {
    /// Creates default options. Set a keep rule before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the `n` newest versions.
    #[must_use]
    pub const fn keep_recent(mut self, n: usize) -> Self {
        self.keep_recent = Some(n);
        self
    }

    /// Keeps versions newer than `timestamp`.
    #[must_use]
    pub const fn keep_after(mut self, timestamp: u64) -> Self {
        self.keep_after = Some(timestamp);
        self
    }

    /// Keeps or drops tagged versions.
    #[must_use]
    pub const fn keep_tagged(mut self, keep_tagged: bool) -> Self {
        self.keep_tagged = keep_tagged;
        self
    }

    /// Enables dry-run mode.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Checks that a keep rule is set.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::InvalidOptions`](crate::VersionError::InvalidOptions)
    /// when neither `keep_recent` nor `keep_after` is set.
    pub fn validate(&self) -> crate::VersionResult<()> {
        if self.keep_recent.is_none() && self.keep_after.is_none() {
            return Err(crate::VersionError::invalid_options(
                "prune needs keep_recent or keep_after",
            ));
        }
        Ok(())
    }

    pub(crate) fn keeps(&self, version: &EntityVersion, newest_rank: usize) -> bool {
        self.keep_recent.is_some_and(|n| newest_rank < n)
            || self.keep_after.is_some_and(|t| version.timestamp > t)
            || (self.keep_tagged && version.is_tagged())
    }
}

/// Outcome of a prune.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneResult {
    /// Versions deleted, or that would be deleted in a dry run.
    pub deleted: usize,
    /// Versions kept.
    pub kept: usize,
    /// Numbers of the deleted versions, ascending.
    pub deleted_versions: Vec<u32>,
    /// Whether this was a dry run.
    pub dry_run: bool,
}
