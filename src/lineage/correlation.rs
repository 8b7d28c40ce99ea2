//! Correlation ids inherited along task ancestry chains.
//!
//! A task without its own id uses the id of the nearest ancestor that has
//! one. When no ancestor has an id, a fresh one is synthesized and stored on
//! the top-most task of the chain so that every descendant observes it.

use super::{Lineage, TaskId};
use std::sync::Arc;
use tracing::debug;

/// Source of fresh correlation ids. Called at most once per chain root, while
/// that root's id slot is locked; see [`Lineage::with_id_generator`].
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

lazy_static::lazy_static! {
    static ref HOSTNAME: String = read_hostname();
}

impl Lineage {
    /// Correlation id of the current task, inherited or freshly synthesized
    pub fn current_correlation_id(&self) -> String {
        let mut node = self.current_node();
        loop {
            if let Some(id) = self.tables.correlation_ids.get(&node.id) {
                return id.value().clone();
            }
            match node.parent.clone() {
                Some(parent) => node = parent,
                None => break,
            }
        }

        self.tables
            .correlation_ids
            .entry(node.id)
            .or_insert_with(|| {
                let id = (self.generator)();
                debug!(task_id = %node.id, correlation_id = %id, "Created correlation id");
                id
            })
            .value()
            .clone()
    }

    /// Assign `id` to the current task, overriding anything inherited
    pub fn set_current_correlation_id<S: Into<String>>(&self, id: S) {
        let node = self.current_node();
        self.tables.correlation_ids.insert(node.id, id.into());
    }

    /// Id stored directly on `task`, without walking its ancestors
    pub fn correlation_id_of(&self, task: TaskId) -> Option<String> {
        self.tables
            .correlation_ids
            .get(&task)
            .map(|entry| entry.value().clone())
    }
}

/// Default recipe: FNV-1a of host name, pid and the current time, followed by
/// the sub-second microseconds, rendered in hex.
pub fn generate_correlation_id() -> String {
    let now = chrono::Utc::now();
    let micros = now.timestamp_subsec_micros();
    let seed = format!(
        "{}{}{}{}",
        HOSTNAME.as_str(),
        std::process::id(),
        now.timestamp(),
        micros
    );
    format!("{:x}{:x}", fnv1a_32(seed.as_bytes()), micros)
}

fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

fn read_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
