// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
}

pub mod context;
pub mod fanout;  // Concurrent request dispatch
pub mod lineage; // Task ancestry and correlation ids
pub mod offload; // CPU-bound work offload

// Re-exports for convenience
pub use crate::core::config::SkeinConfig;
pub use crate::core::errors::{BoxError, RequestTimeout, Result, SkeinError};
pub use context::{global, Context};
pub use fanout::{
    join, request_fn, Fanout, FnRequest, JoinOptions, Node, Operation, Outcome, Request,
    RequestTarget, ServiceDescriptor, ServiceMeta,
};
pub use lineage::{Lineage, TaskHandle, TaskId};
pub use offload::{CpuBound, CpuGate, GateStats};

use std::future::Future;

/// Spawn a tracked task on the global context
pub fn spawn<F>(future: F) -> TaskHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    global().spawn(future)
}

/// Correlation id of the current task on the global context
pub fn current_correlation_id() -> String {
    global().current_correlation_id()
}

/// Override the correlation id of the current task on the global context
pub fn set_current_correlation_id<S: Into<String>>(id: S) {
    global().set_current_correlation_id(id)
}

/// Forget the calling tokio task's correlation state on the global context.
/// Call it when a handler that was not started through [`spawn`] finishes.
pub fn release_current_task() -> bool {
    global().release_current_task()
}

/// Route `f` through the global CPU gate
pub fn cpu_bound<F>(f: F) -> CpuBound<F> {
    global().cpu_bound(f)
}

/// Stop the global CPU worker; the next gated call starts a new one
pub async fn close_threadpool() -> Result<()> {
    global().close_threadpool().await
}
