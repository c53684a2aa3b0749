//! Owner of the node tree: indices, change application, and the poll loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MountConfig;
use crate::drive::{Change, ChangeStats, NodeRecord, RemoteDrive};
use crate::fs::FsError;
use crate::fs::node::{DetachOutcome, Node};

/// The kernel handle of the root node (the FUSE root inode).
pub const ROOT_HANDLE: u64 = 1;

/// The kernel handle reserved for the `.dump` pseudo-node.
pub const DUMP_HANDLE: u64 = 2;

/// Where dynamically assigned kernel handles start.
const FIRST_DYNAMIC_HANDLE: u64 = 3;

/// The remote id alias of the drive root.
const ROOT_ID: &str = "root";

/// Hook for telling the kernel a node's cached data is stale.
pub trait CacheInvalidator: Send + Sync + 'static {
    fn invalidate(&self, handle: u64);
}

/// Default invalidator: records the hint in the log and nothing else.
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate(&self, handle: u64) {
        debug!(handle, "kernel cache invalidation hint");
    }
}

struct Index {
    by_id: HashMap<String, Arc<Node>>,
    by_handle: HashMap<u64, Arc<Node>>,
    next_handle: u64,
}

/// Shared state behind every [`System`] clone and every node back-pointer.
pub(crate) struct SystemInner {
    pub(crate) drive: Arc<dyn RemoteDrive>,
    config: MountConfig,
    invalidator: Box<dyn CacheInvalidator>,
    shutdown: CancellationToken,
    index: Mutex<Index>,
    server_start: SystemTime,
    /// Guarded separately from the index so node mutations can bump it while
    /// the index lock is held. Strictly a leaf lock.
    update_time: Mutex<SystemTime>,
}

/// A structural invariant no longer holds; the cache cannot be trusted and
/// there is no repair protocol.
#[expect(
    clippy::exit,
    reason = "an inconsistent cache must not keep serving the kernel"
)]
fn structural_violation(detail: &str) -> ! {
    error!("inconsistent node tree: {detail}");
    std::process::exit(1);
}

impl SystemInner {
    fn lock_index(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn owned_only(&self) -> bool {
        self.config.owned_only
    }

    pub(crate) fn read_only(&self) -> bool {
        self.config.read_only()
    }

    /// Base permission bits for every node: read-only mounts expose 0o555,
    /// writeable mounts 0o777.
    pub(crate) fn base_mode(&self) -> u16 {
        if self.config.read_only() { 0o555 } else { 0o777 }
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Bump the last-update timestamp reported by the dump file.
    pub(crate) fn touch(&self) {
        *self
            .update_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = SystemTime::now();
    }

    pub(crate) fn node_by_id(&self, id: &str) -> Option<Arc<Node>> {
        self.lock_index().by_id.get(id).cloned()
    }

    pub(crate) fn node_by_handle(&self, handle: u64) -> Option<Arc<Node>> {
        self.lock_index().by_handle.get(&handle).cloned()
    }

    /// Return the cached node for `record`, updating it in place, or insert a
    /// fresh one.
    pub(crate) fn get_or_create(self: &Arc<Self>, record: &NodeRecord) -> Arc<Node> {
        if let Some(node) = self.node_by_id(&record.id) {
            node.update(record);
            return node;
        }
        let mut index = self.lock_index();
        // Racing caller may have inserted since the unlocked check.
        if let Some(node) = index.by_id.get(&record.id) {
            let node = Arc::clone(node);
            drop(index);
            node.update(record);
            return node;
        }
        let handle = index.next_handle;
        index.next_handle += 1;
        self.insert_locked(&mut index, handle, record)
    }

    /// Register a new node under `handle`. Must be called with the index
    /// lock held.
    fn insert_locked(
        self: &Arc<Self>,
        index: &mut Index,
        handle: u64,
        record: &NodeRecord,
    ) -> Arc<Node> {
        // Parents not yet cached are dropped; they attach this node when
        // their own listing happens.
        let parents: std::collections::HashSet<String> = record
            .parent_ids
            .iter()
            .filter(|id| index.by_id.contains_key(*id))
            .cloned()
            .collect();

        let node = Node::new(Arc::clone(self), handle, record, parents.clone());
        for parent_id in &parents {
            if let Some(parent) = index.by_id.get(parent_id) {
                parent.add_child(&node);
            }
        }
        index.by_id.insert(record.id.clone(), Arc::clone(&node));
        index.by_handle.insert(handle, Arc::clone(&node));
        self.touch();
        node
    }

    /// Ensure the root node exists (fetching it on first call) and return it.
    pub(crate) async fn root(self: &Arc<Self>) -> Result<Arc<Node>, FsError> {
        if let Some(root) = self.node_by_handle(ROOT_HANDLE) {
            return Ok(root);
        }
        let record = self
            .drive
            .fetch_node(ROOT_ID)
            .await
            .map_err(FsError::from_meta)?;

        let mut index = self.lock_index();
        if let Some(root) = index.by_handle.get(&ROOT_HANDLE) {
            return Ok(Arc::clone(root));
        }
        Ok(self.insert_locked(&mut index, ROOT_HANDLE, &record))
    }

    /// Erase a node from the indices and every loaded parent's child map,
    /// then hint the kernel that its cached data is stale.
    pub(crate) fn remove(&self, node: &Arc<Node>) {
        {
            let mut index = self.lock_index();
            index.by_id.remove(node.id());
            index.by_handle.remove(&node.handle());
        }
        self.touch();

        for parent_id in node.parents_snapshot() {
            if let Some(parent) = self.node_by_id(&parent_id) {
                if parent.detach_child(node.id()) == DetachOutcome::Missing {
                    structural_violation(&format!(
                        "node {} listed parent {parent_id}, but that parent does not know about \
                         the node",
                        node.id()
                    ));
                }
            }
        }

        self.invalidator.invalidate(node.handle());
    }

    /// Classify and apply one incremental change.
    pub(crate) fn apply_change(self: &Arc<Self>, change: &Change, stats: &mut ChangeStats) {
        let node = self.node_by_id(&change.id);
        let trashed = change.removed || change.record.as_ref().is_some_and(|r| r.trashed);

        if trashed {
            match node {
                Some(node) => {
                    self.remove(&node);
                    info!(id = %change.id, "removed");
                    stats.changed += 1;
                }
                None => {
                    debug!(id = %change.id, "removal of unknown id, ignoring");
                    stats.ignored += 1;
                }
            }
            return;
        }

        let Some(record) = &change.record else {
            warn!(id = %change.id, "change carries no record, ignoring");
            stats.ignored += 1;
            return;
        };

        match node {
            // A rename can introduce a path separator, or ownership can flip:
            // the record leaves the filesystem's view.
            Some(node) if !record.included(self.config.owned_only) => {
                self.remove(&node);
                info!(id = %change.id, "removed (no longer included)");
                stats.changed += 1;
            }
            Some(node) => {
                node.update(record);
                if !record.is_dir() {
                    self.invalidator.invalidate(node.handle());
                }
                info!(id = %change.id, "updated");
                stats.changed += 1;
            }
            None => {
                // Create only when some cached parent has listed children;
                // otherwise the node materializes when its parent is listed.
                let parent_ready = record.parent_ids.iter().any(|parent_id| {
                    self.node_by_id(parent_id)
                        .is_some_and(|parent| parent.have_children())
                });
                if parent_ready {
                    self.get_or_create(record);
                    info!(id = %change.id, "created because a parent needed to know about it");
                    stats.changed += 1;
                } else {
                    debug!(id = %change.id, "ignoring out-of-scope id");
                    stats.ignored += 1;
                }
            }
        }
    }
}

/// Owner of all cached nodes. Cheap to clone; all clones share one tree.
#[derive(Clone)]
pub struct System {
    inner: Arc<SystemInner>,
}

impl System {
    #[must_use]
    pub fn new(drive: Arc<dyn RemoteDrive>, config: MountConfig) -> Self {
        Self::with_invalidator(drive, config, Box::new(NoopInvalidator))
    }

    #[must_use]
    pub fn with_invalidator(
        drive: Arc<dyn RemoteDrive>,
        config: MountConfig,
        invalidator: Box<dyn CacheInvalidator>,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            inner: Arc::new(SystemInner {
                drive,
                config,
                invalidator,
                shutdown: CancellationToken::new(),
                index: Mutex::new(Index {
                    by_id: HashMap::new(),
                    by_handle: HashMap::new(),
                    next_handle: FIRST_DYNAMIC_HANDLE,
                }),
                server_start: now,
                update_time: Mutex::new(now),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<SystemInner> {
        &self.inner
    }

    /// Ensure the root node exists and return it.
    pub async fn root(&self) -> Result<Arc<Node>, FsError> {
        self.inner.root().await
    }

    #[must_use]
    pub fn node_by_id(&self, id: &str) -> Option<Arc<Node>> {
        self.inner.node_by_id(id)
    }

    #[must_use]
    pub fn node_by_handle(&self, handle: u64) -> Option<Arc<Node>> {
        self.inner.node_by_handle(handle)
    }

    /// Apply one incremental change to the cache.
    pub fn apply_change(&self, change: &Change, stats: &mut ChangeStats) {
        self.inner.apply_change(change, stats);
    }

    /// Drain the change feed once, applying every change.
    ///
    /// Returns the stats accumulated before any error; the caller decides
    /// whether a partial failure is survivable.
    pub async fn poll_changes_once(&self) -> (ChangeStats, Result<(), crate::drive::DriveError>) {
        let mut stats = ChangeStats::default();
        let inner = Arc::clone(&self.inner);
        let mut handler =
            move |change: Change, stats: &mut ChangeStats| inner.apply_change(&change, stats);
        let result = self
            .inner
            .drive
            .process_changes(&mut handler, &mut stats)
            .await;
        (stats, result)
    }

    /// The background polling loop: sleep, drain, repeat until shutdown.
    ///
    /// A feed error after at least one applied change is fatal — the cursor
    /// has advanced, so a retry would replay changes against cached kernel
    /// state with no idempotence guarantee.
    #[expect(
        clippy::exit,
        reason = "a half-applied change page leaves the cache unreconcilable"
    )]
    pub async fn run_change_loop(&self) {
        let interval = self.inner.config.poll_interval;
        loop {
            tokio::select! {
                () = self.inner.shutdown.cancelled() => {
                    debug!("change loop stopping");
                    return;
                }
                () = tokio::time::sleep(interval) => {}
            }

            let (stats, result) = self.poll_changes_once().await;
            match result {
                Ok(()) => {
                    if stats.fetched_changes() {
                        info!("{stats}");
                    }
                }
                Err(e) if stats.changed > 0 => {
                    error!(
                        "change feed failed after {} applied changes, cache is no longer \
                         trustworthy: {e}",
                        stats.changed
                    );
                    std::process::exit(1);
                }
                Err(e) => {
                    warn!("error fetching changes, will continue trying: {e}");
                }
            }
        }
    }

    /// Cancel background work (the change loop and in-flight fetches).
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Render the cached tree, one line per node.
    #[must_use]
    pub fn dump_text(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.node_by_handle(ROOT_HANDLE) {
            root.dump_into(&mut out, 0);
        }
        out
    }

    /// `(server_start, last_update)` — the times the dump file reports.
    #[must_use]
    pub fn times(&self) -> (SystemTime, SystemTime) {
        let update_time = *self
            .inner
            .update_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        (self.inner.server_start, update_time)
    }

    /// Number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.lock_index().by_id.len()
    }

    /// Whether `by_id` and `by_handle` hold identical value sets. Exposed for
    /// invariant assertions.
    #[must_use]
    pub fn indices_consistent(&self) -> bool {
        let index = self.inner.lock_index();
        index.by_id.len() == index.by_handle.len()
            && index.by_id.values().all(|node| {
                index
                    .by_handle
                    .get(&node.handle())
                    .is_some_and(|other| Arc::ptr_eq(node, other))
            })
    }
}
