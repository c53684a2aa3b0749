//! Per-node coordinator that materializes remote content on demand.
//!
//! A phantom file multiplexes any number of open handles onto a single
//! [`OpenFile`](crate::fs::open_file::OpenFile) while at least one handle is
//! live, and tears it down when the last handle releases.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::fs::FsError;
use crate::fs::handle::Handle;
use crate::fs::open_file::{NodeView, OpenFile};

/// Whether a handle may read, write, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    #[must_use]
    pub fn is_readable(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    #[must_use]
    pub fn is_writeable(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReadOnly => "ReadOnly",
            Self::WriteOnly => "WriteOnly",
            Self::ReadWrite => "ReadWrite",
        })
    }
}

/// Whether to fetch remote content at all, and when to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Start the download immediately on open.
    Proactive,
    /// Download on the first read, write, or stat.
    AsNeeded,
    /// Never download; the caller guarantees the remote content is
    /// irrelevant (truncate-to-zero, fresh create).
    NoFetch,
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Proactive => "Proactive",
            Self::AsNeeded => "AsNeeded",
            Self::NoFetch => "NoFetch",
        })
    }
}

#[derive(Default)]
struct PhantomState {
    handle_count: u32,
    open_file: Option<Arc<OpenFile>>,
}

/// Handles file-content requests for a node that sometimes has a local
/// presence (while open) and sometimes doesn't.
pub struct PhantomFile {
    state: tokio::sync::Mutex<PhantomState>,
}

impl PhantomFile {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: tokio::sync::Mutex::new(PhantomState::default()),
        })
    }

    /// Open a new handle, constructing the backing open-file if this is the
    /// first live handle.
    pub(crate) async fn open(
        self: &Arc<Self>,
        view: NodeView,
        access: AccessMode,
        fetch: FetchMode,
        shutdown: &CancellationToken,
    ) -> Result<Handle, FsError> {
        let mut state = self.state.lock().await;
        let open_file = match &state.open_file {
            Some(of) => Arc::clone(of),
            None => {
                let of = OpenFile::new(view, fetch, shutdown)?;
                state.open_file = Some(Arc::clone(&of));
                of
            }
        };
        state.handle_count += 1;
        Ok(Handle::new(Arc::clone(self), open_file, access))
    }

    /// The scratch file's size and mtime, when the node is materialized.
    ///
    /// Lets attr report post-write sizes before the upload happens.
    pub async fn stat_if_local(&self) -> Option<(u64, SystemTime)> {
        let state = self.state.lock().await;
        let open_file = state.open_file.as_ref()?;
        match open_file.stat().await {
            Ok(stat) => Some(stat),
            Err(e) => {
                warn!("stat of local scratch file failed: {e}");
                None
            }
        }
    }

    /// Truncate the node's content through a short-lived write handle.
    ///
    /// Truncating to zero must not cause a download, so it opens with
    /// `NoFetch`; any other size needs the remote content present first.
    pub(crate) async fn truncate(
        self: &Arc<Self>,
        view: NodeView,
        size: u64,
        shutdown: &CancellationToken,
    ) -> Result<(), FsError> {
        let fetch = if size == 0 {
            FetchMode::NoFetch
        } else {
            FetchMode::Proactive
        };
        let handle = self.open(view, AccessMode::WriteOnly, fetch, shutdown).await?;
        let result = match handle.truncate(size).await {
            Ok(()) => handle.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = handle.release().await {
            warn!("release after truncate failed: {e}");
        }
        result
    }

    /// Drop one handle; tear the open-file down when it was the last.
    pub(crate) async fn release(&self) -> Result<(), FsError> {
        let mut state = self.state.lock().await;
        debug_assert!(state.handle_count > 0, "release without a live handle");
        state.handle_count = state.handle_count.saturating_sub(1);
        if state.handle_count > 0 {
            return Ok(());
        }
        match state.open_file.take() {
            Some(open_file) => open_file.release().await,
            None => Ok(()),
        }
    }

    /// Number of live handles. Exposed for lifecycle assertions.
    pub async fn handle_count(&self) -> u32 {
        self.state.lock().await.handle_count
    }

    /// Whether an open-file currently backs this node.
    pub async fn has_open_file(&self) -> bool {
        self.state.lock().await.open_file.is_some()
    }
}
