//! The filesystem core: cached node tree, phantom files, and the FUSE bridge.
//!
//! [`Fs`] is a slightly cleaner interface than implementing `fuser` directly;
//! it keeps fuser-specific details out of the tree code. [`DriveFs`] is the
//! production implementation, [`fuser::FuserAdapter`] adapts it to the kernel
//! transport.

use std::ffi::OsStr;
use std::time::SystemTime;

use async_trait::async_trait;
use bitflags::bitflags;
use bytes::Bytes;

pub mod bridge;
pub mod error;
mod fetcher;
pub mod fuser;
pub mod handle;
pub mod node;
mod open_file;
pub mod phantom;
pub mod system;

pub use bridge::DriveFs;
pub use error::FsError;
pub use phantom::{AccessMode, FetchMode};
pub use system::{CacheInvalidator, NoopInvalidator, System};

/// A kernel-facing inode number.
pub type Ino = u64;

/// A kernel-facing open file handle.
pub type Fh = u64;

bitflags! {
    /// POSIX open(2) flags, as delivered by the kernel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: i32 {
        // Access modes (mutually exclusive)
        const RDONLY = libc::O_RDONLY;
        const WRONLY = libc::O_WRONLY;
        const RDWR = libc::O_RDWR;

        // Creation/status flags
        const APPEND = libc::O_APPEND;
        const TRUNC = libc::O_TRUNC;
        const CREAT = libc::O_CREAT;
        const EXCL = libc::O_EXCL;
    }
}

impl From<i32> for OpenFlags {
    fn from(val: i32) -> Self {
        Self::from_bits_truncate(val)
    }
}

impl OpenFlags {
    /// Decode the access-mode bits, if they name a known mode.
    #[must_use]
    pub fn access_mode(self) -> Option<AccessMode> {
        match self.bits() & libc::O_ACCMODE {
            libc::O_RDONLY => Some(AccessMode::ReadOnly),
            libc::O_WRONLY => Some(AccessMode::WriteOnly),
            libc::O_RDWR => Some(AccessMode::ReadWrite),
            _ => None,
        }
    }
}

/// Attributes of one cached node, ready for the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttr {
    pub ino: Ino,
    pub size: u64,
    pub ctime: SystemTime,
    pub mtime: SystemTime,
    /// Permission bits without the file-type bits.
    pub perm: u16,
    pub is_dir: bool,
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub ino: Ino,
    pub name: String,
    pub is_dir: bool,
}

/// The result of opening a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenedFile {
    pub fh: Fh,
    /// Whether the kernel should keep its page cache across opens.
    pub keep_cache: bool,
}

/// The result of creating a file: the new node plus an open handle on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedFile {
    pub attr: NodeAttr,
    pub fh: Fh,
}

/// The kernel-facing operation surface.
#[async_trait]
pub trait Fs: Send + Sync + 'static {
    /// Resolve a child of `parent` by name.
    async fn lookup(&self, parent: Ino, name: &OsStr) -> Result<NodeAttr, FsError>;

    /// Attributes of an inode.
    async fn getattr(&self, ino: Ino) -> Result<NodeAttr, FsError>;

    /// Apply a setattr request. Only a size change (truncate) is honored;
    /// everything else is ignored and the current attributes returned.
    async fn setattr_size(&self, ino: Ino, size: Option<u64>) -> Result<NodeAttr, FsError>;

    /// List a directory.
    async fn readdir(&self, ino: Ino) -> Result<Vec<DirEntryInfo>, FsError>;

    /// Open a file.
    async fn open(&self, ino: Ino, flags: OpenFlags) -> Result<OpenedFile, FsError>;

    /// Read from an open file. Reading past end-of-file yields a short read.
    async fn read(&self, ino: Ino, fh: Fh, offset: u64, size: u32) -> Result<Bytes, FsError>;

    /// Write to an open file, returning the number of bytes written.
    async fn write(&self, ino: Ino, fh: Fh, offset: u64, data: Bytes) -> Result<u32, FsError>;

    /// Flush dirty content back to the remote.
    async fn flush(&self, ino: Ino, fh: Fh) -> Result<(), FsError>;

    /// Release an open file handle.
    async fn release(&self, ino: Ino, fh: Fh) -> Result<(), FsError>;

    /// Create a file (or, when `mode` carries the directory bit, a directory)
    /// and open it for writing.
    async fn create(
        &self,
        parent: Ino,
        name: &OsStr,
        mode: u32,
        flags: OpenFlags,
    ) -> Result<CreatedFile, FsError>;

    /// Create a directory.
    async fn mkdir(&self, parent: Ino, name: &OsStr, mode: u32) -> Result<NodeAttr, FsError>;

    /// Rename (and possibly reparent) a child.
    async fn rename(
        &self,
        parent: Ino,
        name: &OsStr,
        new_parent: Ino,
        new_name: &OsStr,
    ) -> Result<(), FsError>;

    /// Remove a child (file or directory) by trashing it remotely.
    async fn unlink(&self, parent: Ino, name: &OsStr) -> Result<(), FsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_mode_decodes_the_accmode_bits() {
        assert_eq!(
            OpenFlags::from(libc::O_RDONLY).access_mode(),
            Some(AccessMode::ReadOnly)
        );
        assert_eq!(
            OpenFlags::from(libc::O_WRONLY | libc::O_TRUNC).access_mode(),
            Some(AccessMode::WriteOnly)
        );
        assert_eq!(
            OpenFlags::from(libc::O_RDWR).access_mode(),
            Some(AccessMode::ReadWrite)
        );
    }
}
