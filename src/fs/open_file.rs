//! The scratch-file-backed state behind one materialized open.

use std::fmt;
use std::os::unix::fs::FileExt as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::drive::{DriveError, RemoteDrive};
use crate::fs::FsError;
use crate::fs::fetcher::Fetcher;
use crate::fs::phantom::FetchMode;

/// The remote driver's view of a single node: just enough to move content.
#[derive(Clone)]
pub(crate) struct NodeView {
    drive: Arc<dyn RemoteDrive>,
    id: String,
    name: String,
}

impl NodeView {
    pub fn new(drive: Arc<dyn RemoteDrive>, id: String, name: String) -> Self {
        Self { drive, id, name }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn download(
        &self,
        file: &mut tokio::fs::File,
        cancel: &CancellationToken,
    ) -> Result<u64, DriveError> {
        self.drive.download(&self.id, file, cancel).await
    }

    pub async fn upload(
        &self,
        file: tokio::fs::File,
        cancel: &CancellationToken,
    ) -> Result<(), DriveError> {
        self.drive.upload(&self.id, file, cancel).await
    }
}

impl fmt::Display for NodeView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.id, self.name)
    }
}

/// Owns the scratch file for one logical open of a remote file.
///
/// Created by the phantom file when the first handle opens, torn down when
/// the last handle releases. Reads and writes go against the scratch file;
/// the fetcher materializes remote content into it on demand, and a dirty
/// flag tracks whether a flush must upload.
pub(crate) struct OpenFile {
    view: NodeView,
    fetcher: Arc<Fetcher>,
    file: Arc<std::fs::File>,
    path: PathBuf,
    cancel: CancellationToken,
    dirty: tokio::sync::Mutex<bool>,
}

impl OpenFile {
    /// Create the scratch file and start the fetcher per `mode`.
    ///
    /// The scratch file name encodes the node's id and display name as a
    /// debugging aid.
    pub fn new(
        view: NodeView,
        mode: FetchMode,
        shutdown: &CancellationToken,
    ) -> Result<Arc<Self>, FsError> {
        let prefix = format!("drivefs-{}-{}-", view.id, view.name);
        let (file, path) = tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile()
            .map_err(|e| {
                warn!("error creating scratch file for {view}: {e}");
                FsError::Io(e)
            })?
            .keep()
            .map_err(|e| FsError::Io(e.error))?;
        debug!("open file: creating {view} with fetch mode {mode}");

        let fetch_file = tokio::fs::File::from_std(file.try_clone().map_err(FsError::Io)?);
        let fetcher = Fetcher::new(view.clone(), fetch_file, mode, shutdown);

        Ok(Arc::new(Self {
            view,
            fetcher,
            file: Arc::new(file),
            path,
            cancel: shutdown.child_token(),
            dirty: tokio::sync::Mutex::new(false),
        }))
    }

    async fn mark_dirty(&self) {
        *self.dirty.lock().await = true;
    }

    /// Read up to `size` bytes at `offset`. End-of-file is a short read,
    /// never an error.
    pub async fn read(&self, offset: u64, size: u32) -> Result<Bytes, FsError> {
        self.fetcher.fetch().await?;

        let file = Arc::clone(&self.file);
        let data = tokio::task::spawn_blocking(move || read_at_full(&file, offset, size as usize))
            .await
            .map_err(|e| FsError::Io(std::io::Error::other(e)))??;
        Ok(data)
    }

    /// Write `data` at `offset` and mark the file dirty.
    ///
    /// The fetch runs first so remote content is present under any write
    /// that is not a full overwrite from zero.
    pub async fn write(&self, offset: u64, data: Bytes) -> Result<u32, FsError> {
        self.fetcher.fetch().await.inspect_err(|e| {
            warn!("write fetcher error for {}: {e}", self.view);
        })?;

        let file = Arc::clone(&self.file);
        let len = data.len();
        tokio::task::spawn_blocking(move || file.write_all_at(&data, offset))
            .await
            .map_err(|e| FsError::Io(std::io::Error::other(e)))?
            .map_err(|e| {
                warn!("error writing {} at offset {offset}: {e}", self.view);
                FsError::Io(e)
            })?;

        self.mark_dirty().await;
        Ok(len as u32)
    }

    /// The scratch file's current size and mtime.
    pub async fn stat(&self) -> Result<(u64, SystemTime), FsError> {
        self.fetcher.fetch().await?;
        let meta = self.file.metadata().map_err(FsError::Io)?;
        Ok((meta.len(), meta.modified().map_err(FsError::Io)?))
    }

    /// Truncate the scratch file and mark it dirty. The caller is responsible
    /// for having picked an appropriate fetch mode; the fetch only serializes
    /// an already-selected download so the truncation can't race it.
    pub async fn truncate(&self, size: u64) -> Result<(), FsError> {
        self.fetcher.fetch().await?;
        self.file.set_len(size).map_err(FsError::Io)?;
        self.mark_dirty().await;
        Ok(())
    }

    /// Upload the scratch file if dirty; a clean file is a no-op success.
    pub async fn flush(&self) -> Result<(), FsError> {
        let mut dirty = self.dirty.lock().await;
        if !*dirty {
            debug!("declining to flush {} because it is not dirty", self.view);
            return Ok(());
        }
        let file = tokio::fs::File::open(&self.path).await.map_err(FsError::Io)?;
        match self.view.upload(file, &self.cancel).await {
            Ok(()) => {
                *dirty = false;
                debug!("flushed {}", self.view);
                Ok(())
            }
            Err(e) => {
                warn!("flush of {} failed: {e}", self.view);
                Err(FsError::from_transfer(e))
            }
        }
    }

    /// Abort any in-flight fetch and unlink the scratch file.
    pub async fn release(&self) -> Result<(), FsError> {
        debug!("open file: releasing {}", self.view);
        self.fetcher.abort().await;

        tokio::fs::remove_file(&self.path).await.map_err(|e| {
            warn!("error removing {}: {e}", self.path.display());
            FsError::Io(e)
        })
    }
}

/// Read exactly `size` bytes at `offset`, short only at end-of-file.
fn read_at_full(file: &std::fs::File, offset: u64, size: usize) -> Result<Bytes, FsError> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("error reading from scratch file: {e}");
                return Err(FsError::Io(e));
            }
        }
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}
