use crate::core::config::SkeinConfig;
use crate::core::errors::Result;
use crate::fanout::{join, Fanout, JoinOptions, Node, Operation, Outcome, Request};
use crate::lineage::{Lineage, TaskHandle};
use crate::offload::{CpuBound, CpuGate};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Owns the task lineage and the CPU gate that the free functions in the
/// crate root operate on.
///
/// Most programs use the lazily created [`global`] context. Tests and
/// embedders that need isolated state build their own.
#[derive(Debug, Clone)]
pub struct Context {
    config: Arc<SkeinConfig>,
    lineage: Lineage,
    gate: Arc<CpuGate>,
}

impl Default for Context {
    fn default() -> Self {
        Self::build(SkeinConfig::default(), Lineage::new())
    }
}

impl Context {
    pub fn new(config: SkeinConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, Lineage::new()))
    }

    /// Like [`Context::new`], with a caller-supplied lineage (for example one
    /// with a custom correlation id generator)
    pub fn with_lineage(config: SkeinConfig, lineage: Lineage) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, lineage))
    }

    fn build(config: SkeinConfig, lineage: Lineage) -> Self {
        let gate = Arc::new(CpuGate::new(
            config.cpu_worker_name.clone(),
            config.cpu_offload_enabled,
        ));
        info!(
            cpu_offload = config.cpu_offload_enabled,
            default_join_timeout = ?config.default_join_timeout,
            "Created skein context"
        );
        Self {
            config: Arc::new(config),
            lineage,
            gate,
        }
    }

    pub fn config(&self) -> &SkeinConfig {
        &self.config
    }

    pub fn lineage(&self) -> &Lineage {
        &self.lineage
    }

    pub fn gate(&self) -> &Arc<CpuGate> {
        &self.gate
    }

    pub fn spawn<F>(&self, future: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.lineage.spawn(future)
    }

    pub fn current_correlation_id(&self) -> String {
        self.lineage.current_correlation_id()
    }

    pub fn set_current_correlation_id<S: Into<String>>(&self, id: S) {
        self.lineage.set_current_correlation_id(id)
    }

    /// See [`Lineage::release_current_task`]
    pub fn release_current_task(&self) -> bool {
        self.lineage.release_current_task()
    }

    pub fn cpu_bound<F>(&self, f: F) -> CpuBound<F> {
        self.gate.cpu_bound(f)
    }

    pub async fn close_threadpool(&self) -> Result<()> {
        self.gate.close_threadpool().await
    }

    /// Join options seeded from this context's configuration
    pub fn join_options(&self) -> JoinOptions {
        JoinOptions::from_config(&self.config)
    }

    pub async fn join<R, I>(&self, requests: I, options: &JoinOptions) -> Result<Vec<Outcome<R::Output>>>
    where
        R: Request,
        I: IntoIterator<Item = R>,
    {
        join(&self.lineage, requests, options).await
    }

    pub fn make_fanout<O: Operation>(&self, op: O, nodes: Vec<Node>, options: JoinOptions) -> Fanout<O> {
        Fanout::new(self.lineage.clone(), op, nodes, options)
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_CONTEXT: Context = Context::default();
}

/// Process-wide context, created on first use with the default configuration
pub fn global() -> &'static Context {
    &GLOBAL_CONTEXT
}
