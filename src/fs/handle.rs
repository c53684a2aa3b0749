//! Per-open bookkeeping between the kernel and a phantom file.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::fs::FsError;
use crate::fs::open_file::OpenFile;
use crate::fs::phantom::{AccessMode, PhantomFile};

/// One kernel open of a file: access mode, released flag, and the operations
/// the kernel may issue against it.
pub struct Handle {
    phantom: Arc<PhantomFile>,
    open_file: Arc<OpenFile>,
    access: AccessMode,
    released: AtomicBool,
}

impl Handle {
    pub(crate) fn new(
        phantom: Arc<PhantomFile>,
        open_file: Arc<OpenFile>,
        access: AccessMode,
    ) -> Self {
        Self {
            phantom,
            open_file,
            access,
            released: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn access_mode(&self) -> AccessMode {
        self.access
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Flush dirty content. A flush on a non-writeable handle is a no-op
    /// success; the kernel issues these routinely.
    pub async fn flush(&self) -> Result<(), FsError> {
        if self.is_released() {
            warn!("attempt to flush a released handle");
            return Err(FsError::Stale);
        }
        if !self.access.is_writeable() {
            return Ok(());
        }
        self.open_file.flush().await
    }

    pub async fn read(&self, offset: u64, size: u32) -> Result<Bytes, FsError> {
        if self.is_released() {
            warn!("attempt to read from a released handle");
            return Err(FsError::Stale);
        }
        if !self.access.is_readable() {
            return Err(FsError::Perm);
        }
        self.open_file.read(offset, size).await
    }

    pub async fn write(&self, offset: u64, data: Bytes) -> Result<u32, FsError> {
        if self.is_released() {
            warn!("attempt to write to a released handle");
            return Err(FsError::Stale);
        }
        if !self.access.is_writeable() {
            return Err(FsError::Perm);
        }
        self.open_file.write(offset, data).await
    }

    /// Truncate the backing scratch file through this handle.
    pub async fn truncate(&self, size: u64) -> Result<(), FsError> {
        if self.is_released() {
            return Err(FsError::Stale);
        }
        if !self.access.is_writeable() {
            return Err(FsError::Perm);
        }
        self.open_file.truncate(size).await
    }

    /// Release the handle: flush if writeable, then drop the phantom's
    /// reference. A second release fails with `Stale` and changes nothing.
    pub async fn release(&self) -> Result<(), FsError> {
        if self
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("attempt to release an already released handle");
            return Err(FsError::Stale);
        }
        debug!("releasing handle ({})", self.access);

        let flush_err = if self.access.is_writeable() {
            self.open_file.flush().await.err()
        } else {
            None
        };
        let release_result = self.phantom.release().await;

        match flush_err {
            Some(e) => Err(e),
            None => release_result,
        }
    }
}
