use thiserror::Error;

use crate::drive::DriveError;

/// Error kinds surfaced to the kernel.
#[derive(Debug, Error)]
pub enum FsError {
    /// Lookup of a missing child, or an unknown inode/id.
    #[error("no such entry")]
    NotFound,

    /// Remote metadata was unavailable or the record is excluded.
    #[error("no data available")]
    NoData,

    /// Local temp-file or transfer failure surfaced through open-file paths.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Access-mode violation, or a write open on a read-only mount.
    #[error("operation not permitted")]
    Perm,

    /// Operation outside the supported surface.
    #[error("operation not supported")]
    NotSupported,

    /// Use of a handle after release.
    #[error("stale file handle")]
    Stale,

    /// An open flag combination outside the supported matrix.
    #[error("access denied")]
    AccessDenied,

    /// The caller aborted before any byte was transferred.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<FsError> for i32 {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound => libc::ENOENT,
            FsError::NoData => libc::ENODATA,
            FsError::Io(_) => libc::EIO,
            FsError::Perm => libc::EPERM,
            FsError::NotSupported => libc::ENOTSUP,
            FsError::Stale => libc::ESTALE,
            FsError::AccessDenied => libc::EACCES,
            FsError::Cancelled => libc::EINTR,
        }
    }
}

impl FsError {
    /// Map a driver error on a metadata path (fetch, list).
    pub(crate) fn from_meta(e: DriveError) -> Self {
        match e {
            DriveError::NotFound => Self::NotFound,
            DriveError::Cancelled => Self::Cancelled,
            _ => Self::NoData,
        }
    }

    /// Map a driver error on a content or mutation path.
    pub(crate) fn from_transfer(e: DriveError) -> Self {
        match e {
            DriveError::NotFound => Self::NotFound,
            DriveError::Cancelled => Self::Cancelled,
            DriveError::Io(e) => Self::Io(e),
            other => Self::Io(std::io::Error::other(other.to_string())),
        }
    }
}
