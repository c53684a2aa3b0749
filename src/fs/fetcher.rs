//! One-shot, cancellable download of remote content into a scratch file.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::drive::DriveError;
use crate::fs::FsError;
use crate::fs::open_file::NodeView;
use crate::fs::phantom::FetchMode;

struct FetchState {
    file: tokio::fs::File,
    done: bool,
    err: Option<Arc<DriveError>>,
}

/// Downloads a node's content into its scratch file, at most once.
///
/// Any number of tasks may call [`fetch`](Self::fetch) concurrently; only the
/// first performs the network operation, the rest block on its completion and
/// observe the stored outcome.
pub(crate) struct Fetcher {
    view: NodeView,
    token: CancellationToken,
    state: tokio::sync::Mutex<FetchState>,
}

impl Fetcher {
    /// Create a fetcher bound to a fresh child token of `parent`.
    ///
    /// `Proactive` starts the download on a background task immediately;
    /// `NoFetch` marks the fetcher already done with no error, so the scratch
    /// file stays empty unless written.
    pub fn new(
        view: NodeView,
        file: tokio::fs::File,
        mode: FetchMode,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let fetcher = Arc::new(Self {
            view,
            token: parent.child_token(),
            state: tokio::sync::Mutex::new(FetchState {
                file,
                done: matches!(mode, FetchMode::NoFetch),
                err: None,
            }),
        });
        if matches!(mode, FetchMode::Proactive) {
            let spawned = Arc::clone(&fetcher);
            tokio::spawn(async move {
                let _ = spawned.fetch().await;
            });
        }
        fetcher
    }

    /// Run the download unless it has already been attempted; return the
    /// outcome of the one attempt.
    ///
    /// A cancelled download is folded to success: an aborted handle that
    /// never materialized its content has nothing to report.
    pub async fn fetch(&self) -> Result<(), FsError> {
        let mut state = self.state.lock().await;
        if !state.done {
            state.done = true;
            if self.token.is_cancelled() {
                debug!("fetch for {} aborted before starting", self.view);
            } else {
                debug!("fetching content for {}", self.view);
                match self.view.download(&mut state.file, &self.token).await {
                    Ok(written) => debug!("fetched {written} bytes for {}", self.view),
                    Err(DriveError::Cancelled) => {
                        debug!("fetch for {} cancelled mid-stream", self.view);
                    }
                    Err(e) => {
                        warn!("failed to download content for {}: {e}", self.view);
                        state.err = Some(Arc::new(e));
                    }
                }
            }
        }
        match &state.err {
            Some(e) => Err(FsError::Io(std::io::Error::other(e.to_string()))),
            None => Ok(()),
        }
    }

    /// Cancel any in-flight download and wait for it to finalize.
    ///
    /// Subsequent [`fetch`](Self::fetch) calls return immediately.
    pub async fn abort(&self) {
        self.token.cancel();
        let _ = self.fetch().await;
    }
}
