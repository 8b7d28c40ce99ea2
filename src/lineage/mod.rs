//! Task ancestry tracking.
//!
//! Every task started through [`Lineage::spawn`] remembers which tracked task
//! spawned it. The ancestry chain is what correlation ids are inherited
//! through (see [`correlation`]).
//!
//! Each tracked task owns a node that holds a strong reference to its
//! parent node, so an ancestor stays reachable exactly as long as one of its
//! descendants is still running. The lineage keeps only weak side-table
//! entries; a node removes its own entries when it is dropped.
//!
//! A plain tokio task that was not started through the lineage is adopted on
//! first use: it gets its own root node, keyed by its tokio task id. Adopted
//! roots are held until [`Lineage::release_current_task`] is called from that
//! task, or until the least recently used ones are evicted once more than
//! [`DEFAULT_ADOPTED_CAPACITY`] are held. Code running outside any tokio task
//! shares the lineage root.

pub mod correlation;
pub mod handle;

pub use correlation::{generate_correlation_id, IdGenerator};
pub use handle::TaskHandle;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Adopted tokio tasks kept before the least recently used one is evicted
pub const DEFAULT_ADOPTED_CAPACITY: usize = 4096;

tokio::task_local! {
    static CURRENT_NODE: Arc<TaskNode>;
}

/// Process-unique identifier of a tracked task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    /// Stands in for "not inside any task"
    pub const ROOT: TaskId = TaskId(0);

    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct AdoptedTask {
    node: Arc<TaskNode>,
    last_used: u64,
}

#[derive(Debug)]
struct Tables {
    nodes: DashMap<TaskId, Weak<TaskNode>>,
    correlation_ids: DashMap<TaskId, String>,
    adopted: DashMap<tokio::task::Id, AdoptedTask>,
    adopted_capacity: AtomicUsize,
    clock: AtomicU64,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            nodes: DashMap::new(),
            correlation_ids: DashMap::new(),
            adopted: DashMap::new(),
            adopted_capacity: AtomicUsize::new(DEFAULT_ADOPTED_CAPACITY),
            clock: AtomicU64::new(0),
        }
    }
}

/// Ancestry record of one tracked task
#[derive(Debug)]
struct TaskNode {
    id: TaskId,
    parent: Option<Arc<TaskNode>>,
    // Weak: adopted roots live inside the tables they point back to
    tables: Weak<Tables>,
}

impl TaskNode {
    fn parent_id(&self) -> Option<TaskId> {
        self.parent.as_ref().map(|parent| parent.id)
    }
}

impl Drop for TaskNode {
    fn drop(&mut self) {
        if let Some(tables) = self.tables.upgrade() {
            tables.nodes.remove(&self.id);
            tables.correlation_ids.remove(&self.id);
        }
    }
}

/// Registry of tracked tasks and their correlation ids
#[derive(Clone)]
pub struct Lineage {
    tables: Arc<Tables>,
    root: Arc<TaskNode>,
    generator: IdGenerator,
}

impl fmt::Debug for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lineage")
            .field("live_tasks", &self.live_tasks())
            .field("adopted_tasks", &self.adopted_tasks())
            .field("correlation_ids", &self.tables.correlation_ids.len())
            .finish()
    }
}

impl Default for Lineage {
    fn default() -> Self {
        Self::new()
    }
}

impl Lineage {
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(generate_correlation_id))
    }

    /// Use a custom correlation id generator instead of the host/pid/time recipe.
    ///
    /// The generator runs while the lineage holds its lock on the chain root's
    /// id slot, so it must not read or set correlation ids on this same
    /// lineage; doing so deadlocks. Other lineages are fine.
    pub fn with_id_generator(generator: IdGenerator) -> Self {
        let tables = Arc::new(Tables::default());
        let root = Arc::new(TaskNode {
            id: TaskId::ROOT,
            parent: None,
            tables: Arc::downgrade(&tables),
        });
        Self {
            tables,
            root,
            generator,
        }
    }

    /// Bound on adopted tokio tasks (at least one), shared by all clones
    pub fn with_adopted_capacity(self, capacity: usize) -> Self {
        self.tables
            .adopted_capacity
            .store(capacity.max(1), Ordering::Relaxed);
        self
    }

    /// Start `future` as a tracked task whose parent is the task calling `spawn`
    pub fn spawn<F>(&self, future: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let parent = self.current_node();
        let node = self.register(Some(parent));
        let id = node.id;
        debug!(task_id = %id, parent_id = ?node.parent_id(), "Spawning tracked task");

        let inner = tokio::spawn(CURRENT_NODE.scope(node, future));
        TaskHandle::new(id, inner)
    }

    /// Run `future` on the calling task as the root of a new chain.
    ///
    /// Nothing is inherited from the caller; tasks spawned inside share
    /// whatever correlation id the scope ends up with.
    pub async fn scope<F: Future>(&self, future: F) -> F::Output {
        let node = self.register(None);
        debug!(task_id = %node.id, "Entering tracked scope");
        CURRENT_NODE.scope(node, future).await
    }

    /// The task currently executing. Outside of any tokio task this is
    /// [`TaskId::ROOT`].
    pub fn current_task_id(&self) -> TaskId {
        self.current_node().id
    }

    /// Parent of a live tracked task. `None` for unknown or finished tasks and
    /// for chain roots.
    pub fn parent_of(&self, id: TaskId) -> Option<TaskId> {
        self.node(id)?.parent_id()
    }

    /// Number of tasks, tracked or adopted, whose ancestry entry is still alive
    pub fn live_tasks(&self) -> usize {
        self.tables.nodes.len()
    }

    /// Number of plain tokio tasks currently adopted as chain roots
    pub fn adopted_tasks(&self) -> usize {
        self.tables.adopted.len()
    }

    /// Forget the calling tokio task's adopted root, and with it the
    /// correlation id stored there. Descendants still running keep the root
    /// alive. Returns whether anything was released.
    pub fn release_current_task(&self) -> bool {
        let Some(task) = tokio::task::try_id() else {
            return false;
        };
        let released = self.tables.adopted.remove(&task);
        if let Some((_, adopted)) = &released {
            debug!(task_id = %adopted.node.id, tokio_task = %task, "Released adopted task");
        }
        released.is_some()
    }

    fn register(&self, parent: Option<Arc<TaskNode>>) -> Arc<TaskNode> {
        let node = Arc::new(TaskNode {
            id: TaskId::next(),
            parent,
            tables: Arc::downgrade(&self.tables),
        });
        self.tables.nodes.insert(node.id, Arc::downgrade(&node));
        node
    }

    fn node(&self, id: TaskId) -> Option<Arc<TaskNode>> {
        if id.is_root() {
            return Some(self.root.clone());
        }
        // Upgrade outside the shard guard: dropping the last strong reference
        // removes the entry from this same map.
        let weak = self.tables.nodes.get(&id).map(|entry| entry.value().clone())?;
        weak.upgrade()
    }

    fn current_node(&self) -> Arc<TaskNode> {
        let tracked = CURRENT_NODE
            .try_with(|node| node.clone())
            .ok()
            .filter(|node| std::ptr::eq(node.tables.as_ptr(), Arc::as_ptr(&self.tables)));
        if let Some(node) = tracked {
            return node;
        }
        match tokio::task::try_id() {
            Some(task) => self.adopted_root(task),
            None => self.root.clone(),
        }
    }

    // Only the task itself resolves its own id, so there is no insert race
    // for one key.
    fn adopted_root(&self, task: tokio::task::Id) -> Arc<TaskNode> {
        let tick = self.tables.clock.fetch_add(1, Ordering::Relaxed);
        if let Some(mut adopted) = self.tables.adopted.get_mut(&task) {
            adopted.last_used = tick;
            return adopted.node.clone();
        }

        let node = self.register(None);
        debug!(task_id = %node.id, tokio_task = %task, "Adopted untracked tokio task");
        self.tables.adopted.insert(
            task,
            AdoptedTask {
                node: node.clone(),
                last_used: tick,
            },
        );
        self.evict_adopted();
        node
    }

    fn evict_adopted(&self) {
        let capacity = self.tables.adopted_capacity.load(Ordering::Relaxed);
        while self.tables.adopted.len() > capacity {
            let oldest = self
                .tables
                .adopted
                .iter()
                .min_by_key(|entry| entry.last_used)
                .map(|entry| *entry.key());
            let Some(task) = oldest else {
                break;
            };
            // Dropped after the shard guard is released
            let evicted = self.tables.adopted.remove(&task);
            if let Some((_, adopted)) = &evicted {
                debug!(task_id = %adopted.node.id, tokio_task = %task, "Evicted adopted task");
            }
        }
    }
}
