//! Abstraction over the backing object store.
//!
//! [`RemoteDrive`] is the only way the filesystem talks to the remote. The
//! live implementation wraps the REST client from the `drive-api` crate; the
//! [`fake`] implementation backs the integration tests.

use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod fake;
pub mod live;

pub use fake::FakeDrive;
pub use live::LiveDrive;

/// MIME type marking a folder.
pub const FOLDER_MIME_TYPE: &str = drive_api::FOLDER_MIME_TYPE;

/// Errors produced by a [`RemoteDrive`].
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("no such node")]
    NotFound,

    #[error("operation cancelled")]
    Cancelled,

    #[error("remote api error: {0}")]
    Api(#[from] drive_api::ApiError),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Metadata for one remote file or directory, as the remote reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: String,
    pub name: String,
    pub ctime: SystemTime,
    pub mtime: SystemTime,
    pub size: u64,
    /// Opaque revision counter; increases on every remote change.
    pub version: i64,
    pub parent_ids: Vec<String>,
    pub trashed: bool,
    pub owned_by_me: bool,
    pub file_extension: String,
    pub mime_type: String,
}

impl NodeRecord {
    /// Whether this record describes a directory.
    ///
    /// The remote encodes this in the mime/extension pair, and it can change
    /// across updates.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE && self.file_extension.is_empty()
    }

    /// The inclusion predicate: whether this record is visible to the
    /// filesystem at all.
    ///
    /// Names containing a path separator can never be represented, and when
    /// `owned_only` is set records not owned by the viewer are filtered too.
    #[must_use]
    pub fn included(&self, owned_only: bool) -> bool {
        !self.name.contains('/') && (!owned_only || self.owned_by_me)
    }
}

/// One entry of the incremental change feed.
#[derive(Debug, Clone)]
pub struct Change {
    pub id: String,
    pub removed: bool,
    /// Absent when the node was removed.
    pub record: Option<NodeRecord>,
}

/// Totals for one pass over the change feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeStats {
    /// Changes that mutated the cache.
    pub changed: u32,
    /// Changes that were out of scope and skipped.
    pub ignored: u32,
}

impl ChangeStats {
    /// True when the feed produced any change at all, applied or not.
    #[must_use]
    pub fn fetched_changes(&self) -> bool {
        self.changed > 0 || self.ignored > 0
    }
}

impl fmt::Display for ChangeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "applied {} changes and ignored {} changes",
            self.changed, self.ignored
        )
    }
}

/// Callback invoked for every change drained from the feed.
pub type ChangeHandler<'a> = dyn FnMut(Change, &mut ChangeStats) + Send + 'a;

/// Capabilities required from the backing object store.
#[async_trait]
pub trait RemoteDrive: Send + Sync + 'static {
    /// Fetch one node's metadata by id.
    async fn fetch_node(&self, id: &str) -> Result<NodeRecord, DriveError>;

    /// List all children of a directory, draining pagination internally.
    async fn list_children(&self, id: &str) -> Result<Vec<NodeRecord>, DriveError>;

    /// Create a file or directory under `parent_id`, returning the new record
    /// with its remote-assigned id.
    async fn create_node(
        &self,
        parent_id: &str,
        name: &str,
        dir: bool,
    ) -> Result<NodeRecord, DriveError>;

    /// Stream the node's full content into `file`. Polls `cancel` while
    /// streaming; a cancelled download returns [`DriveError::Cancelled`]
    /// after reporting how many bytes were written.
    async fn download(
        &self,
        id: &str,
        file: &mut tokio::fs::File,
        cancel: &CancellationToken,
    ) -> Result<u64, DriveError>;

    /// Replace the node's remote content with the local file's content.
    async fn upload(
        &self,
        id: &str,
        file: tokio::fs::File,
        cancel: &CancellationToken,
    ) -> Result<(), DriveError>;

    /// Rename and/or reparent a node. Parent ids must only be passed when the
    /// parent actually changes; a same-parent rename passes `None` for both.
    async fn rename(
        &self,
        id: &str,
        new_name: Option<&str>,
        old_parent_id: Option<&str>,
        new_parent_id: Option<&str>,
    ) -> Result<NodeRecord, DriveError>;

    /// Move a node to the trash.
    async fn trash(&self, id: &str, cancel: &CancellationToken) -> Result<(), DriveError>;

    /// Drain all pending changes from the persisted cursor, invoking
    /// `handler` for each with `stats` as the accumulator.
    ///
    /// The cursor advances after each successfully fetched page, so on error
    /// the pages already handed to `handler` stay consumed.
    async fn process_changes(
        &self,
        handler: &mut ChangeHandler<'_>,
        stats: &mut ChangeStats,
    ) -> Result<(), DriveError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn record(name: &str, owned: bool) -> NodeRecord {
        NodeRecord {
            id: "x".into(),
            name: name.into(),
            ctime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            size: 0,
            version: 1,
            parent_ids: vec![],
            trashed: false,
            owned_by_me: owned,
            file_extension: String::new(),
            mime_type: "text/plain".into(),
        }
    }

    #[test]
    fn inclusion_rejects_path_separators() {
        assert!(record("plain.txt", true).included(true));
        assert!(!record("has/slash", true).included(true));
    }

    #[test]
    fn inclusion_ownership_is_a_runtime_flag() {
        let shared = record("shared.txt", false);
        assert!(!shared.included(true));
        assert!(shared.included(false));
    }

    #[test]
    fn dir_requires_folder_mime_and_no_extension() {
        let mut rec = record("d", true);
        rec.mime_type = FOLDER_MIME_TYPE.into();
        assert!(rec.is_dir());
        rec.file_extension = ".txt".into();
        assert!(!rec.is_dir());
    }

    #[test]
    fn stats_display_totals() {
        let stats = ChangeStats {
            changed: 3,
            ignored: 1,
        };
        assert_eq!(stats.to_string(), "applied 3 changes and ignored 1 changes");
        assert!(stats.fetched_changes());
        assert!(!ChangeStats::default().fetched_changes());
    }
}
