use super::worker::{CpuWorker, Job};
use crate::core::errors::{Result, SkeinError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};

/// Routes CPU-heavy calls onto a single dedicated worker thread so they never
/// stall the async scheduler.
///
/// The worker is created on first use and lives until
/// [`close_threadpool`](CpuGate::close_threadpool); the next offloaded call
/// after that starts a fresh one. All offloaded calls share the worker and
/// therefore run one at a time.
#[derive(Debug)]
pub struct CpuGate {
    enabled: AtomicBool,
    worker_name: String,
    worker: Mutex<Option<CpuWorker>>,
    pools_created: AtomicU64,
    offloaded: AtomicU64,
    inline: AtomicU64,
}

/// Counters describing how a gate has been used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    pub pools_created: u64,
    pub offloaded: u64,
    pub inline: u64,
}

impl CpuGate {
    pub fn new<S: Into<String>>(worker_name: S, enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            worker_name: worker_name.into(),
            worker: Mutex::new(None),
            pools_created: AtomicU64::new(0),
            offloaded: AtomicU64::new(0),
            inline: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// When disabled, gated calls run inline on the calling task
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        debug!(enabled, "CPU offload toggled");
    }

    /// Whether a worker thread currently exists
    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    /// Run `f` on the worker thread and wait for it without blocking the
    /// scheduler.
    ///
    /// Errors returned by `f` come back unchanged. A panic in `f` is resumed
    /// on the caller with its original payload.
    pub async fn run<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<SkeinError> + Send + 'static,
    {
        if !self.is_enabled() {
            self.inline.fetch_add(1, Ordering::Relaxed);
            return f();
        }

        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = tx.send(outcome);
        });
        self.submit(job).await?;
        self.offloaded.fetch_add(1, Ordering::Relaxed);

        match rx.await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => Err(SkeinError::offload("CPU worker dropped a queued job").into()),
        }
    }

    /// Wrap `f` so that calling it goes through this gate
    pub fn cpu_bound<F>(self: &Arc<Self>, f: F) -> CpuBound<F> {
        CpuBound {
            gate: self.clone(),
            f: Arc::new(f),
        }
    }

    /// Let queued work finish, stop the worker thread and forget it
    pub async fn close_threadpool(&self) -> Result<()> {
        let worker = self.worker.lock().await.take();
        let Some(worker) = worker else {
            return Ok(());
        };

        info!(worker = %self.worker_name, "Closing CPU worker");
        tokio::task::spawn_blocking(move || worker.shutdown())
            .await
            .map_err(|e| SkeinError::offload_with_source("CPU worker shutdown task failed", e))?
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            pools_created: self.pools_created.load(Ordering::Relaxed),
            offloaded: self.offloaded.load(Ordering::Relaxed),
            inline: self.inline.load(Ordering::Relaxed),
        }
    }

    // Sending happens under the slot lock so a concurrent close can never
    // strand a job on a worker that is shutting down.
    async fn submit(&self, job: Job) -> Result<()> {
        let mut slot = self.worker.lock().await;
        let worker = match slot.take() {
            Some(worker) => worker,
            None => {
                let worker = CpuWorker::start(&self.worker_name)?;
                self.pools_created.fetch_add(1, Ordering::Relaxed);
                worker
            }
        };
        let submitted = worker.submit(job);
        *slot = Some(worker);
        submitted
    }
}

/// A function whose calls are routed through a [`CpuGate`]
pub struct CpuBound<F> {
    gate: Arc<CpuGate>,
    f: Arc<F>,
}

impl<F> Clone for CpuBound<F> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            f: self.f.clone(),
        }
    }
}

impl<F> CpuBound<F> {
    pub async fn call<A, T, E>(&self, args: A) -> std::result::Result<T, E>
    where
        F: Fn(A) -> std::result::Result<T, E> + Send + Sync + 'static,
        A: Send + 'static,
        T: Send + 'static,
        E: From<SkeinError> + Send + 'static,
    {
        let f = self.f.clone();
        self.gate.run(move || f(args)).await
    }

    /// The wrapped function, for direct synchronous calls that bypass the gate
    pub fn no_defer(&self) -> &F {
        &self.f
    }

    pub fn gate(&self) -> &Arc<CpuGate> {
        &self.gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum ParseError {
        Empty,
        Gate(String),
    }

    impl From<SkeinError> for ParseError {
        fn from(err: SkeinError) -> Self {
            ParseError::Gate(err.to_string())
        }
    }

    fn word_count(text: String) -> std::result::Result<usize, ParseError> {
        if text.is_empty() {
            return Err(ParseError::Empty);
        }
        Ok(text.split_whitespace().count())
    }

    #[tokio::test]
    async fn test_runs_on_worker_thread() {
        let gate = Arc::new(CpuGate::new("gate-test", true));
        let name = gate
            .run(|| Ok::<_, SkeinError>(std::thread::current().name().map(str::to_string)))
            .await
            .unwrap();

        assert_eq!(name.as_deref(), Some("gate-test"));
        assert!(gate.is_running().await);
        assert_eq!(gate.stats().pools_created, 1);
        gate.close_threadpool().await.unwrap();
    }

    #[tokio::test]
    async fn test_error_passes_through_unchanged() {
        let gate = Arc::new(CpuGate::new("gate-test", true));
        let counted = gate.cpu_bound(word_count);

        assert_eq!(counted.call("a b c".to_string()).await, Ok(3));
        assert_eq!(counted.call(String::new()).await, Err(ParseError::Empty));
        assert_eq!((counted.no_defer())("x y".to_string()), Ok(2));
        assert_eq!(gate.stats().offloaded, 2);
        gate.close_threadpool().await.unwrap();
    }

    #[tokio::test]
    async fn test_panic_is_resumed_on_caller() {
        let gate = Arc::new(CpuGate::new("gate-test", true));
        let result = AssertUnwindSafe(gate.run(|| -> std::result::Result<(), SkeinError> {
            panic!("worker exploded")
        }))
        .catch_unwind()
        .await;

        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"worker exploded"));

        // the worker survives a panicking job
        assert_eq!(gate.run(|| Ok::<_, SkeinError>(5)).await.unwrap(), 5);
        gate.close_threadpool().await.unwrap();
    }

    #[tokio::test]
    async fn test_offloaded_calls_are_serialized() {
        let gate = Arc::new(CpuGate::new("gate-test", true));
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let calls = (0..4).map(|_| {
            let active = active.clone();
            let max_seen = max_seen.clone();
            gate.run(move || {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, SkeinError>(())
            })
        });
        for result in futures::future::join_all(calls).await {
            result.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        gate.close_threadpool().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_without_worker_is_noop() {
        let gate = CpuGate::new("gate-test", true);
        gate.close_threadpool().await.unwrap();
        assert_eq!(gate.stats(), GateStats::default());
    }
}
