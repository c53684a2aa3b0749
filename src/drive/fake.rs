//! In-memory [`RemoteDrive`] for integration tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _, AsyncWriteExt as _};
use tokio_util::sync::CancellationToken;

use super::{
    Change, ChangeHandler, ChangeStats, DriveError, FOLDER_MIME_TYPE, NodeRecord, RemoteDrive,
};

/// The canonical content of a fake text file that was never written to.
#[must_use]
pub fn content_for(id: &str) -> Vec<u8> {
    format!("content for {id}").into_bytes()
}

/// Build a directory record. An empty `parent_id` means no parents (the root).
#[must_use]
pub fn make_dir(id: &str, name: &str, parent_id: &str) -> NodeRecord {
    NodeRecord {
        id: id.to_owned(),
        name: name.to_owned(),
        ctime: UNIX_EPOCH,
        mtime: UNIX_EPOCH,
        size: 0,
        version: 1,
        parent_ids: if parent_id.is_empty() {
            Vec::new()
        } else {
            vec![parent_id.to_owned()]
        },
        trashed: false,
        owned_by_me: true,
        file_extension: String::new(),
        mime_type: FOLDER_MIME_TYPE.to_owned(),
    }
}

/// Build a text file record whose default content is [`content_for`] its id.
#[must_use]
pub fn make_text_file(id: &str, name: &str, parent_id: &str) -> NodeRecord {
    NodeRecord {
        id: id.to_owned(),
        name: name.to_owned(),
        ctime: UNIX_EPOCH,
        mtime: UNIX_EPOCH,
        size: content_for(id).len() as u64,
        version: 1,
        parent_ids: vec![parent_id.to_owned()],
        trashed: false,
        owned_by_me: true,
        file_extension: ".txt".to_owned(),
        mime_type: "text/plain".to_owned(),
    }
}

/// One recorded call to [`RemoteDrive::rename`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameCall {
    pub id: String,
    pub new_name: Option<String>,
    pub old_parent_id: Option<String>,
    pub new_parent_id: Option<String>,
}

#[derive(Default)]
struct FakeState {
    records: Vec<NodeRecord>,
    /// Content overrides; ids without an entry fall back to [`content_for`].
    content: HashMap<String, Vec<u8>>,
    pending: Vec<Change>,
    download_counts: HashMap<String, u32>,
    rename_calls: Vec<RenameCall>,
}

/// A fake drive holding its whole state in memory.
pub struct FakeDrive {
    state: Mutex<FakeState>,
    next_id: AtomicU64,
}

impl FakeDrive {
    #[must_use]
    pub fn new(records: Vec<NodeRecord>) -> Self {
        Self {
            state: Mutex::new(FakeState {
                records,
                ..FakeState::default()
            }),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The current content of `id`, when it was ever uploaded.
    #[must_use]
    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        self.lock().content.get(id).cloned()
    }

    /// Override the content served for `id`.
    pub fn set_content(&self, id: &str, content: Vec<u8>) {
        self.lock().content.insert(id.to_owned(), content);
    }

    /// How many times `id` has been downloaded.
    #[must_use]
    pub fn download_count(&self, id: &str) -> u32 {
        self.lock().download_counts.get(id).copied().unwrap_or(0)
    }

    /// Every rename call made so far, in order.
    #[must_use]
    pub fn rename_calls(&self) -> Vec<RenameCall> {
        self.lock().rename_calls.clone()
    }

    /// The current record for `id`, if any.
    #[must_use]
    pub fn record(&self, id: &str) -> Option<NodeRecord> {
        self.lock().records.iter().find(|r| r.id == id).cloned()
    }

    /// Queue a change for the next [`RemoteDrive::process_changes`] pass.
    pub fn queue_change(&self, change: Change) {
        self.lock().pending.push(change);
    }
}

#[async_trait]
impl RemoteDrive for FakeDrive {
    async fn fetch_node(&self, id: &str) -> Result<NodeRecord, DriveError> {
        self.record(id).ok_or(DriveError::NotFound)
    }

    async fn list_children(&self, id: &str) -> Result<Vec<NodeRecord>, DriveError> {
        let state = self.lock();
        if !state.records.iter().any(|r| r.id == id) {
            return Err(DriveError::NotFound);
        }
        Ok(state
            .records
            .iter()
            .filter(|r| !r.trashed && r.parent_ids.iter().any(|p| p == id))
            .cloned()
            .collect())
    }

    async fn create_node(
        &self,
        parent_id: &str,
        name: &str,
        dir: bool,
    ) -> Result<NodeRecord, DriveError> {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("created-{seq:04}");
        let mut record = if dir {
            make_dir(&id, name, parent_id)
        } else {
            make_text_file(&id, name, parent_id)
        };
        record.ctime = SystemTime::now();
        record.mtime = record.ctime;
        self.lock().records.push(record.clone());
        Ok(record)
    }

    async fn download(
        &self,
        id: &str,
        file: &mut tokio::fs::File,
        cancel: &CancellationToken,
    ) -> Result<u64, DriveError> {
        if cancel.is_cancelled() {
            return Err(DriveError::Cancelled);
        }
        let content = {
            let mut state = self.lock();
            *state.download_counts.entry(id.to_owned()).or_insert(0) += 1;
            state
                .content
                .get(id)
                .cloned()
                .unwrap_or_else(|| content_for(id))
        };
        file.write_all(&content).await?;
        file.flush().await?;
        Ok(content.len() as u64)
    }

    async fn upload(
        &self,
        id: &str,
        mut file: tokio::fs::File,
        cancel: &CancellationToken,
    ) -> Result<(), DriveError> {
        if cancel.is_cancelled() {
            return Err(DriveError::Cancelled);
        }
        file.seek(std::io::SeekFrom::Start(0)).await?;
        let mut content = Vec::new();
        file.read_to_end(&mut content).await?;

        let mut state = self.lock();
        if let Some(record) = state.records.iter_mut().find(|r| r.id == id) {
            record.size = content.len() as u64;
            record.version += 1;
            record.mtime = SystemTime::now();
        }
        state.content.insert(id.to_owned(), content);
        Ok(())
    }

    async fn rename(
        &self,
        id: &str,
        new_name: Option<&str>,
        old_parent_id: Option<&str>,
        new_parent_id: Option<&str>,
    ) -> Result<NodeRecord, DriveError> {
        let mut state = self.lock();
        state.rename_calls.push(RenameCall {
            id: id.to_owned(),
            new_name: new_name.map(str::to_owned),
            old_parent_id: old_parent_id.map(str::to_owned),
            new_parent_id: new_parent_id.map(str::to_owned),
        });

        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(DriveError::NotFound)?;
        if let Some(name) = new_name {
            record.name = name.to_owned();
        }
        if let Some(old_parent) = old_parent_id {
            record.parent_ids.retain(|p| p != old_parent);
        }
        if let Some(new_parent) = new_parent_id {
            record.parent_ids.push(new_parent.to_owned());
        }
        record.version += 1;
        record.mtime = SystemTime::now();
        Ok(record.clone())
    }

    async fn trash(&self, id: &str, cancel: &CancellationToken) -> Result<(), DriveError> {
        if cancel.is_cancelled() {
            return Err(DriveError::Cancelled);
        }
        let mut state = self.lock();
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(DriveError::NotFound)?;
        record.trashed = true;
        Ok(())
    }

    async fn process_changes(
        &self,
        handler: &mut ChangeHandler<'_>,
        stats: &mut ChangeStats,
    ) -> Result<(), DriveError> {
        let pending = std::mem::take(&mut self.lock().pending);
        for change in pending {
            handler(change, stats);
        }
        Ok(())
    }
}
