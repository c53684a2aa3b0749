//! [`DriveFs`]: the [`Fs`] implementation over the cached node tree.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::config::MountConfig;
use crate::drive::RemoteDrive;
use crate::fs::handle::Handle;
use crate::fs::node::Node;
use crate::fs::phantom::{AccessMode, FetchMode};
use crate::fs::system::{CacheInvalidator, DUMP_HANDLE, ROOT_HANDLE, System};
use crate::fs::{
    CreatedFile, DirEntryInfo, Fh, FsError, Fs, Ino, NodeAttr, OpenFlags, OpenedFile,
};

/// Name of the magic tree-dump file at the filesystem root.
pub const DUMP_NAME: &str = ".dump";

/// Sentinel file handle for opens that need no per-handle state (directories
/// and the dump pseudo-file).
const NO_HANDLE: Fh = 0;

/// The drive filesystem: node tree plus the kernel-facing handle table.
pub struct DriveFs {
    system: System,
    handles: Mutex<HashMap<Fh, Arc<Handle>>>,
    next_fh: AtomicU64,
}

impl DriveFs {
    #[must_use]
    pub fn new(drive: Arc<dyn RemoteDrive>, config: MountConfig) -> Self {
        Self::from_system(System::new(drive, config))
    }

    #[must_use]
    pub fn with_invalidator(
        drive: Arc<dyn RemoteDrive>,
        config: MountConfig,
        invalidator: Box<dyn CacheInvalidator>,
    ) -> Self {
        Self::from_system(System::with_invalidator(drive, config, invalidator))
    }

    fn from_system(system: System) -> Self {
        Self {
            system,
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    /// The tree owner behind this filesystem.
    #[must_use]
    pub fn system(&self) -> &System {
        &self.system
    }

    fn read_only(&self) -> bool {
        self.system.inner().read_only()
    }

    fn lock_handles(&self) -> MutexGuard<'_, HashMap<Fh, Arc<Handle>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve an inode to its node, materializing the root on first touch.
    async fn node_at(&self, ino: Ino) -> Result<Arc<Node>, FsError> {
        if ino == ROOT_HANDLE {
            return self.system.root().await;
        }
        self.system.node_by_handle(ino).ok_or(FsError::NotFound)
    }

    /// Resolve an inode to a directory node, for directory-only operations.
    async fn dir_at(&self, ino: Ino) -> Result<Arc<Node>, FsError> {
        let node = self.node_at(ino).await?;
        if !node.is_dir() {
            return Err(FsError::NotSupported);
        }
        Ok(node)
    }

    fn register_handle(&self, handle: Handle) -> Fh {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.lock_handles().insert(fh, Arc::new(handle));
        fh
    }

    fn handle_at(&self, fh: Fh) -> Result<Arc<Handle>, FsError> {
        self.lock_handles().get(&fh).cloned().ok_or(FsError::Stale)
    }

    fn dump_attr(&self) -> NodeAttr {
        let (server_start, update_time) = self.system.times();
        NodeAttr {
            ino: DUMP_HANDLE,
            size: self.system.dump_text().len() as u64,
            ctime: server_start,
            mtime: update_time,
            perm: 0o444,
            is_dir: false,
        }
    }

    fn name_str(name: &OsStr) -> Result<&str, FsError> {
        name.to_str().ok_or(FsError::NotFound)
    }
}

#[async_trait]
impl Fs for DriveFs {
    #[instrument(skip(self))]
    async fn lookup(&self, parent: Ino, name: &OsStr) -> Result<NodeAttr, FsError> {
        let parent = self.dir_at(parent).await?;
        parent.load_children_if_absent().await?;

        let name = Self::name_str(name)?;
        if parent.handle() == ROOT_HANDLE && name == DUMP_NAME {
            return Ok(self.dump_attr());
        }

        match parent.find_child(name) {
            Some(child) => Ok(child.attr().await),
            None => Err(FsError::NotFound),
        }
    }

    #[instrument(skip(self))]
    async fn getattr(&self, ino: Ino) -> Result<NodeAttr, FsError> {
        if ino == DUMP_HANDLE {
            return Ok(self.dump_attr());
        }
        Ok(self.node_at(ino).await?.attr().await)
    }

    #[instrument(skip(self))]
    async fn setattr_size(&self, ino: Ino, size: Option<u64>) -> Result<NodeAttr, FsError> {
        let Some(size) = size else {
            // Nothing else in a setattr is honored; report current state.
            return self.getattr(ino).await;
        };
        if self.read_only() {
            return Err(FsError::Perm);
        }
        let node = self.node_at(ino).await?;
        if node.is_dir() {
            return Err(FsError::NotSupported);
        }

        node.phantom()
            .truncate(node.view(), size, self.system.inner().shutdown_token())
            .await?;

        let mut attr = node.attr().await;
        attr.size = size;
        Ok(attr)
    }

    #[instrument(skip(self))]
    async fn readdir(&self, ino: Ino) -> Result<Vec<DirEntryInfo>, FsError> {
        let node = self.dir_at(ino).await?;
        node.load_children_if_absent().await?;

        let children = node.children_snapshot().unwrap_or_default();
        let mut entries = Vec::with_capacity(children.len());
        for child in children {
            entries.push(DirEntryInfo {
                ino: child.handle(),
                name: child.name(),
                is_dir: child.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = entries.len(), "readdir");
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn open(&self, ino: Ino, flags: OpenFlags) -> Result<OpenedFile, FsError> {
        if ino == DUMP_HANDLE {
            return Ok(OpenedFile {
                fh: NO_HANDLE,
                keep_cache: false,
            });
        }
        let node = self.node_at(ino).await?;
        if node.is_dir() {
            if flags.access_mode().is_none_or(AccessMode::is_writeable) {
                return Err(FsError::NotSupported);
            }
            // The caller only gets ReadDir out of this.
            return Ok(OpenedFile {
                fh: NO_HANDLE,
                keep_cache: false,
            });
        }
        if flags.contains(OpenFlags::EXCL) {
            return Err(FsError::NotSupported);
        }

        let access = flags.access_mode().ok_or(FsError::AccessDenied)?;
        if self.read_only() && access.is_writeable() {
            return Err(FsError::Perm);
        }

        let shutdown = self.system.inner().shutdown_token().clone();
        if access == AccessMode::ReadOnly {
            let handle = node
                .phantom()
                .open(node.view(), access, FetchMode::Proactive, &shutdown)
                .await?;
            return Ok(OpenedFile {
                fh: self.register_handle(handle),
                keep_cache: true,
            });
        }
        if access == AccessMode::WriteOnly && flags.contains(OpenFlags::TRUNC) {
            let handle = node
                .phantom()
                .open(node.view(), access, FetchMode::NoFetch, &shutdown)
                .await?;
            handle.truncate(0).await?;
            return Ok(OpenedFile {
                fh: self.register_handle(handle),
                keep_cache: false,
            });
        }

        // Read-write opens and write-only opens without truncation are
        // outside the supported matrix.
        warn!(?flags, "unsupported open flag combination");
        Err(FsError::AccessDenied)
    }

    #[instrument(skip(self))]
    async fn read(&self, ino: Ino, fh: Fh, offset: u64, size: u32) -> Result<Bytes, FsError> {
        if ino == DUMP_HANDLE {
            let text = self.system.dump_text().into_bytes();
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(text.len());
            let end = start.saturating_add(size as usize).min(text.len());
            return Ok(Bytes::copy_from_slice(&text[start..end]));
        }
        self.handle_at(fh)?.read(offset, size).await
    }

    #[instrument(skip(self, data))]
    async fn write(&self, _ino: Ino, fh: Fh, offset: u64, data: Bytes) -> Result<u32, FsError> {
        self.handle_at(fh)?.write(offset, data).await
    }

    #[instrument(skip(self))]
    async fn flush(&self, _ino: Ino, fh: Fh) -> Result<(), FsError> {
        if fh == NO_HANDLE {
            return Ok(());
        }
        self.handle_at(fh)?.flush().await
    }

    #[instrument(skip(self))]
    async fn release(&self, _ino: Ino, fh: Fh) -> Result<(), FsError> {
        if fh == NO_HANDLE {
            return Ok(());
        }
        let handle = self.lock_handles().remove(&fh).ok_or(FsError::Stale)?;
        handle.release().await
    }

    #[instrument(skip(self))]
    async fn create(
        &self,
        parent: Ino,
        name: &OsStr,
        mode: u32,
        _flags: OpenFlags,
    ) -> Result<CreatedFile, FsError> {
        if self.read_only() {
            return Err(FsError::NotSupported);
        }
        let parent = self.dir_at(parent).await?;
        parent.load_children_if_absent().await?;

        let name = Self::name_str(name)?;
        let dir = (mode & libc::S_IFMT) == libc::S_IFDIR;
        let record = self
            .system
            .inner()
            .drive
            .create_node(parent.id(), name, dir)
            .await
            .map_err(FsError::from_transfer)?;
        let node = self.system.inner().get_or_create(&record);

        let handle = node
            .phantom()
            .open(
                node.view(),
                AccessMode::WriteOnly,
                FetchMode::NoFetch,
                self.system.inner().shutdown_token(),
            )
            .await?;
        let attr = node.attr().await;
        Ok(CreatedFile {
            attr,
            fh: self.register_handle(handle),
        })
    }

    #[instrument(skip(self))]
    async fn mkdir(&self, parent: Ino, name: &OsStr, _mode: u32) -> Result<NodeAttr, FsError> {
        if self.read_only() {
            return Err(FsError::NotSupported);
        }
        let parent = self.dir_at(parent).await?;
        parent.load_children_if_absent().await?;

        let name = Self::name_str(name)?;
        let record = self
            .system
            .inner()
            .drive
            .create_node(parent.id(), name, true)
            .await
            .map_err(FsError::from_transfer)?;
        let node = self.system.inner().get_or_create(&record);
        Ok(node.attr().await)
    }

    #[instrument(skip(self))]
    async fn rename(
        &self,
        parent: Ino,
        name: &OsStr,
        new_parent: Ino,
        new_name: &OsStr,
    ) -> Result<(), FsError> {
        if self.read_only() {
            return Err(FsError::NotSupported);
        }
        let parent = self.dir_at(parent).await?;
        parent.load_children_if_absent().await?;

        let child = parent
            .find_child(Self::name_str(name)?)
            .ok_or(FsError::NotFound)?;
        let new_parent = self.dir_at(new_parent).await?;

        // A same-parent rename must not pass parent ids: the remote would
        // treat it as a no-op reparent.
        let (old_parent_id, new_parent_id) = if parent.id() == new_parent.id() {
            (None, None)
        } else {
            (Some(parent.id()), Some(new_parent.id()))
        };

        let record = self
            .system
            .inner()
            .drive
            .rename(
                child.id(),
                Some(Self::name_str(new_name)?),
                old_parent_id,
                new_parent_id,
            )
            .await
            .map_err(FsError::from_transfer)?;
        child.update(&record);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unlink(&self, parent: Ino, name: &OsStr) -> Result<(), FsError> {
        if self.read_only() {
            return Err(FsError::NotSupported);
        }
        let parent = self.dir_at(parent).await?;
        parent.load_children_if_absent().await?;

        let child = parent
            .find_child(Self::name_str(name)?)
            .ok_or(FsError::NotFound)?;
        self.system
            .inner()
            .drive
            .trash(child.id(), self.system.inner().shutdown_token())
            .await
            .map_err(FsError::from_transfer)?;
        self.system.inner().remove(&child);
        Ok(())
    }
}
