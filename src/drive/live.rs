//! The live [`RemoteDrive`] backed by the REST client.

use std::time::SystemTime;

use async_trait::async_trait;
use chrono::DateTime;
use drive_api::{DriveApi, DriveFile};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{Change, ChangeHandler, ChangeStats, DriveError, NodeRecord, RemoteDrive};

/// A connected live drive, holding the change-feed cursor.
pub struct LiveDrive {
    api: DriveApi,
    /// Cursor into the change feed. Guarded so only one feed pass runs at a
    /// time; advanced after every successfully fetched page.
    page_token: tokio::sync::Mutex<String>,
}

impl LiveDrive {
    /// Connect, obtaining a fresh change cursor marking "now".
    ///
    /// The cursor is never persisted: a new mount starts from the present and
    /// relies on lazy listing for anything older.
    pub async fn connect(api: DriveApi) -> Result<Self, DriveError> {
        let token = api.start_page_token().await?;
        debug!(token, "obtained change feed start token");
        Ok(Self {
            api,
            page_token: tokio::sync::Mutex::new(token),
        })
    }
}

fn parse_rfc3339(field: &str, id: &str, value: Option<&str>) -> Result<SystemTime, DriveError> {
    let Some(raw) = value else {
        return Err(DriveError::Malformed(format!("node {id} missing {field}")));
    };
    DateTime::parse_from_rfc3339(raw)
        .map(SystemTime::from)
        .map_err(|e| {
            warn!(id, field, raw, "unparseable timestamp: {e}");
            DriveError::Malformed(format!("node {id} has unparseable {field}"))
        })
}

/// Convert a wire record into a [`NodeRecord`].
fn to_record(file: DriveFile) -> Result<NodeRecord, DriveError> {
    let id = file
        .id
        .ok_or_else(|| DriveError::Malformed("record missing id".to_owned()))?;
    let ctime = parse_rfc3339("createdTime", &id, file.created_time.as_deref())?;
    let mtime = parse_rfc3339("modifiedTime", &id, file.modified_time.as_deref())?;
    Ok(NodeRecord {
        name: file.name.unwrap_or_default(),
        ctime,
        mtime,
        size: file.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0),
        version: file
            .version
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        parent_ids: file.parents.unwrap_or_default(),
        trashed: file.trashed.unwrap_or(false),
        owned_by_me: file.owned_by_me.unwrap_or(false),
        file_extension: file.file_extension.unwrap_or_default(),
        mime_type: file.mime_type.unwrap_or_default(),
        id,
    })
}

fn map_api_err(e: drive_api::ApiError) -> DriveError {
    if e.is_not_found() {
        DriveError::NotFound
    } else if matches!(e, drive_api::ApiError::Cancelled) {
        DriveError::Cancelled
    } else {
        DriveError::Api(e)
    }
}

#[async_trait]
impl RemoteDrive for LiveDrive {
    #[instrument(skip(self))]
    async fn fetch_node(&self, id: &str) -> Result<NodeRecord, DriveError> {
        let file = self.api.get_file(id).await.map_err(map_api_err)?;
        to_record(file)
    }

    #[instrument(skip(self))]
    async fn list_children(&self, id: &str) -> Result<Vec<NodeRecord>, DriveError> {
        let query = format!("'{id}' in parents and trashed = false");
        let mut children = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .api
                .list_files(&query, page_token.as_deref())
                .await
                .map_err(map_api_err)?;
            for file in page.files {
                // Skip records we can't convert; a later change will retry.
                match to_record(file) {
                    Ok(record) => children.push(record),
                    Err(e) => warn!(parent = id, "skipping unconvertible child: {e}"),
                }
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(children)
    }

    #[instrument(skip(self))]
    async fn create_node(
        &self,
        parent_id: &str,
        name: &str,
        dir: bool,
    ) -> Result<NodeRecord, DriveError> {
        let file = self
            .api
            .create_file(parent_id, name, dir)
            .await
            .map_err(map_api_err)?;
        to_record(file)
    }

    #[instrument(skip(self, file))]
    async fn download(
        &self,
        id: &str,
        file: &mut tokio::fs::File,
        cancel: &CancellationToken,
    ) -> Result<u64, DriveError> {
        self.api
            .download_to(id, file, cancel)
            .await
            .map_err(map_api_err)
    }

    #[instrument(skip(self, file))]
    async fn upload(
        &self,
        id: &str,
        file: tokio::fs::File,
        cancel: &CancellationToken,
    ) -> Result<(), DriveError> {
        self.api
            .upload_from(id, file, cancel)
            .await
            .map_err(map_api_err)
    }

    #[instrument(skip(self))]
    async fn rename(
        &self,
        id: &str,
        new_name: Option<&str>,
        old_parent_id: Option<&str>,
        new_parent_id: Option<&str>,
    ) -> Result<NodeRecord, DriveError> {
        let file = self
            .api
            .update_file(id, new_name, old_parent_id, new_parent_id)
            .await
            .map_err(map_api_err)?;
        to_record(file)
    }

    #[instrument(skip(self))]
    async fn trash(&self, id: &str, cancel: &CancellationToken) -> Result<(), DriveError> {
        self.api.trash_file(id, cancel).await.map_err(map_api_err)
    }

    #[instrument(skip(self, handler, stats))]
    async fn process_changes(
        &self,
        handler: &mut ChangeHandler<'_>,
        stats: &mut ChangeStats,
    ) -> Result<(), DriveError> {
        let mut cursor = self.page_token.lock().await;
        let mut token = cursor.clone();
        while !token.is_empty() {
            let page = self.api.list_changes(&token).await.map_err(map_api_err)?;
            for item in page.changes {
                let Some(id) = item.file_id else {
                    warn!("change without a file id, skipping");
                    continue;
                };
                let record = match item.file.map(to_record).transpose() {
                    Ok(record) => record,
                    Err(e) => return Err(e),
                };
                handler(
                    Change {
                        id,
                        removed: item.removed.unwrap_or(false),
                        record,
                    },
                    stats,
                );
            }
            if let Some(new_start) = page.new_start_page_token {
                *cursor = new_start;
            }
            token = page.next_page_token.unwrap_or_default();
        }
        Ok(())
    }
}
