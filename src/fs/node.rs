//! One cached file or directory in the node tree.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::drive::NodeRecord;
use crate::fs::open_file::NodeView;
use crate::fs::phantom::PhantomFile;
use crate::fs::system::SystemInner;
use crate::fs::{FsError, NodeAttr};

/// Metadata mirrored from the most recent remote record.
pub(crate) struct NodeMeta {
    pub name: String,
    pub ctime: SystemTime,
    pub mtime: SystemTime,
    pub size: u64,
    pub version: i64,
    pub dir: bool,
    /// Ids of this node's parents. Kept as ids, not pointers: structural
    /// mutations resolve them through the system indices.
    pub parents: HashSet<String>,
}

/// Outcome of detaching a child from a parent's child map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DetachOutcome {
    /// The parent's children aren't loaded; nothing to do.
    NotLoaded,
    Removed,
    /// The parent's children are loaded but didn't contain the child.
    Missing,
}

/// A single file or directory in the cache.
///
/// Metadata and the parent set live under the meta lock; the child map lives
/// under its own lock, where `None` means "never listed" — distinct from an
/// empty directory. Neither lock is ever held across a remote call.
pub struct Node {
    system: Arc<SystemInner>,
    id: String,
    handle: u64,
    meta: Mutex<NodeMeta>,
    children: Mutex<Option<HashMap<String, Arc<Node>>>>,
    phantom: Arc<PhantomFile>,
}

impl Node {
    pub(crate) fn new(
        system: Arc<SystemInner>,
        handle: u64,
        record: &NodeRecord,
        parents: HashSet<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            system,
            id: record.id.clone(),
            handle,
            meta: Mutex::new(NodeMeta {
                name: record.name.clone(),
                ctime: record.ctime,
                mtime: record.mtime,
                size: record.size,
                version: record.version,
                dir: record.is_dir(),
                parents,
            }),
            children: Mutex::new(None),
            phantom: PhantomFile::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn handle(&self) -> u64 {
        self.handle
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.lock_meta().dir
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.lock_meta().name.clone()
    }

    #[must_use]
    pub fn parents_snapshot(&self) -> Vec<String> {
        self.lock_meta().parents.iter().cloned().collect()
    }

    /// The phantom file multiplexing opens of this node.
    #[must_use]
    pub fn phantom(&self) -> &Arc<PhantomFile> {
        &self.phantom
    }

    /// The driver-facing view of this node, capturing its current name.
    pub(crate) fn view(&self) -> NodeView {
        NodeView::new(
            Arc::clone(&self.system.drive),
            self.id.clone(),
            self.name(),
        )
    }

    fn lock_meta(&self) -> MutexGuard<'_, NodeMeta> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_children(&self) -> MutexGuard<'_, Option<HashMap<String, Arc<Node>>>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether this directory's children have been listed yet.
    #[must_use]
    pub fn have_children(&self) -> bool {
        self.lock_children().is_some()
    }

    /// A snapshot of the loaded children, detached from the lock.
    #[must_use]
    pub fn children_snapshot(&self) -> Option<Vec<Arc<Node>>> {
        self.lock_children()
            .as_ref()
            .map(|map| map.values().cloned().collect())
    }

    /// Attach `child` to a loaded child map; a no-op when children were never
    /// listed (the future listing will include it).
    pub(crate) fn add_child(&self, child: &Arc<Node>) {
        if let Some(map) = self.lock_children().as_mut() {
            map.insert(child.id.clone(), Arc::clone(child));
            self.system.touch();
        }
    }

    pub(crate) fn detach_child(&self, id: &str) -> DetachOutcome {
        let mut guard = self.lock_children();
        let Some(map) = guard.as_mut() else {
            return DetachOutcome::NotLoaded;
        };
        let outcome = if map.remove(id).is_some() {
            DetachOutcome::Removed
        } else {
            DetachOutcome::Missing
        };
        drop(guard);
        self.system.touch();
        outcome
    }

    pub(crate) fn add_parent(&self, id: &str) {
        self.lock_meta().parents.insert(id.to_owned());
        self.system.touch();
    }

    /// Apply a fresh remote record to this node.
    ///
    /// Scalar metadata (name, times, size, version, dir flag) changes
    /// atomically under the meta lock. The parent-set diff is computed under
    /// the same lock, then applied to the affected parents' child maps after
    /// it is dropped.
    pub(crate) fn update(self: &Arc<Self>, record: &NodeRecord) {
        let (added, removed) = {
            let mut meta = self.lock_meta();
            meta.name = record.name.clone();
            meta.ctime = record.ctime;
            meta.mtime = record.mtime;
            meta.size = record.size;
            meta.version = record.version;
            meta.dir = record.is_dir();

            let new_parents: HashSet<String> = record.parent_ids.iter().cloned().collect();
            let removed: Vec<String> = meta.parents.difference(&new_parents).cloned().collect();
            let added: Vec<String> = new_parents.difference(&meta.parents).cloned().collect();
            meta.parents = new_parents;
            (added, removed)
        };

        for parent_id in &removed {
            if let Some(parent) = self.system.node_by_id(parent_id) {
                parent.detach_child(&self.id);
            }
        }
        for parent_id in &added {
            if let Some(parent) = self.system.node_by_id(parent_id) {
                parent.add_child(self);
            }
        }
        self.system.touch();
    }

    /// Current attributes, preferring the scratch file's size and mtime when
    /// the node is materialized, so post-write sizes show before upload.
    pub(crate) async fn attr(&self) -> NodeAttr {
        let local = self.phantom.stat_if_local().await;
        let meta = self.lock_meta();
        let (size, mtime) = local.unwrap_or((meta.size, meta.mtime));
        NodeAttr {
            ino: self.handle,
            size,
            ctime: meta.ctime,
            mtime,
            perm: self.system.base_mode(),
            is_dir: meta.dir,
        }
    }

    /// List this directory from the remote unless already loaded.
    ///
    /// The listing runs without any lock held; the resulting map is committed
    /// under the children lock afterwards.
    pub(crate) async fn load_children_if_absent(self: &Arc<Self>) -> Result<(), FsError> {
        if self.have_children() {
            return Ok(());
        }

        let records = self
            .system
            .drive
            .list_children(&self.id)
            .await
            .map_err(FsError::from_meta)?;

        let mut map = HashMap::with_capacity(records.len());
        for record in records {
            if !record.included(self.system.owned_only()) {
                continue;
            }
            let child = self.system.get_or_create(&record);
            child.add_parent(&self.id);
            map.insert(child.id.clone(), child);
        }
        debug!(id = %self.id, children = map.len(), "loaded children");

        *self.lock_children() = Some(map);
        self.system.touch();
        Ok(())
    }

    /// Scan loaded children for a name match; the first match wins when
    /// siblings share a name.
    #[must_use]
    pub fn find_child(&self, name: &str) -> Option<Arc<Node>> {
        let children = self.children_snapshot()?;
        children.into_iter().find(|child| child.name() == name)
    }

    /// Render this subtree into `out`, one line per node.
    ///
    /// Children are snapshotted into a local list before descending so no
    /// children lock is held while visiting a child.
    pub(crate) fn dump_into(&self, out: &mut String, depth: usize) {
        use std::fmt::Write as _;

        let margin = "  ".repeat(depth);
        let (line_dir, line) = {
            let meta = self.lock_meta();
            let line = format!(
                "{margin}#{} {} {:?} dir={} size={} version={} ctime={}s mtime={}s\n",
                self.handle,
                self.id,
                meta.name,
                meta.dir,
                meta.size,
                meta.version,
                epoch_secs(meta.ctime),
                epoch_secs(meta.mtime),
            );
            (meta.dir, line)
        };
        out.push_str(&line);

        if !line_dir {
            return;
        }
        match self.children_snapshot() {
            Some(mut children) => {
                children.sort_by_key(|c| c.handle);
                for child in children {
                    child.dump_into(out, depth + 1);
                }
            }
            None => {
                let _ = writeln!(out, "{}<unknown children>", "  ".repeat(depth + 1));
            }
        }
    }
}

fn epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
