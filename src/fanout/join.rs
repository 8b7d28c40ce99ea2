use super::request::{Request, RequestTarget};
use crate::core::config::SkeinConfig;
use crate::core::errors::{RequestTimeout, Result, SkeinError};
use crate::lineage::Lineage;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use futures::FutureExt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How [`join`] waits for and reports its requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinOptions {
    /// Return the first failure as `Err` instead of capturing it per entry
    pub raise_on_error: bool,
    /// Overall deadline; `None` waits for every request
    pub timeout: Option<Duration>,
    /// Abort requests still running at the deadline instead of leaving them
    /// to finish in the background
    pub cancel_on_timeout: bool,
}

impl JoinOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &SkeinConfig) -> Self {
        Self {
            raise_on_error: false,
            timeout: config.default_join_timeout,
            cancel_on_timeout: config.cancel_on_timeout,
        }
    }

    pub fn raise_on_error(mut self, raise: bool) -> Self {
        self.raise_on_error = raise;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn cancel_on_timeout(mut self, cancel: bool) -> Self {
        self.cancel_on_timeout = cancel;
        self
    }
}

/// Result of one request dispatched by [`join`]
#[derive(Debug)]
pub enum Outcome<T> {
    Value(T),
    Failure(SkeinError),
    Timeout(RequestTimeout),
}

impl<T> Outcome<T> {
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&SkeinError> {
        match self {
            Self::Failure(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Collapse into a `Result`, turning a timeout into [`SkeinError::Timeout`]
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Failure(err) => Err(err),
            Self::Timeout(timeout) => Err(timeout.into()),
        }
    }
}

/// Run every request in its own tracked task and wait for all of them, or
/// until `options.timeout` elapses.
///
/// The returned entries line up with `requests` regardless of completion
/// order. Timeouts are always reported as entries, even with
/// `raise_on_error`; a request still running at the deadline is left running
/// unless `cancel_on_timeout` is set.
pub async fn join<R, I>(
    lineage: &Lineage,
    requests: I,
    options: &JoinOptions,
) -> Result<Vec<Outcome<R::Output>>>
where
    R: Request,
    I: IntoIterator<Item = R>,
{
    let started = Instant::now();
    let mut targets = Vec::new();
    let mut handles = Vec::new();
    for request in requests {
        let target = request.target();
        let tasks = lineage.clone();
        let captured = target.clone();
        handles.push(lineage.spawn(async move {
            request
                .execute()
                .await
                .map_err(|e| SkeinError::request(tasks.current_task_id(), captured, e))
        }));
        targets.push(target);
    }

    let abort_handles: Vec<_> = handles.iter().map(|handle| handle.abort_handle()).collect();
    let mut slots: Vec<Option<Result<R::Output>>> = handles.iter().map(|_| None).collect();
    let mut pending: FuturesUnordered<_> = handles
        .into_iter()
        .enumerate()
        .map(|(index, handle)| async move { (index, handle.await.and_then(|result| result)) })
        .collect();

    let waited = match options.timeout {
        Some(timeout) => tokio::time::timeout(
            timeout,
            collect_outcomes(&mut pending, &mut slots, options.raise_on_error),
        )
        .await
        .ok(),
        None => Some(collect_outcomes(&mut pending, &mut slots, options.raise_on_error).await),
    };
    // Pick up anything that finished right at the deadline
    let drained = match waited {
        Some(done) => done,
        None => drain_ready(&mut pending, &mut slots, options.raise_on_error),
    };
    if let Err(err) = drained {
        debug!(error = %err, "Join aborted by request failure");
        return Err(err);
    }
    drop(pending);

    let outcomes: Vec<_> = slots
        .into_iter()
        .zip(targets)
        .enumerate()
        .map(|(index, (slot, target))| match slot {
            Some(Ok(value)) => Outcome::Value(value),
            Some(Err(err)) => Outcome::Failure(err),
            None => timed_out(index, target, options, &abort_handles[index]),
        })
        .collect();

    debug!(
        requests = outcomes.len(),
        failures = outcomes.iter().filter(|o| o.is_failure()).count(),
        timeouts = outcomes.iter().filter(|o| o.is_timeout()).count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Join completed"
    );
    Ok(outcomes)
}

async fn collect_outcomes<T, S>(
    pending: &mut S,
    slots: &mut [Option<Result<T>>],
    raise_on_error: bool,
) -> Result<()>
where
    S: Stream<Item = (usize, Result<T>)> + Unpin,
{
    while let Some((index, result)) = pending.next().await {
        record(slots, index, result, raise_on_error)?;
    }
    Ok(())
}

// Same policy as `collect_outcomes`, for results already available once the
// deadline has passed.
fn drain_ready<T, S>(
    pending: &mut S,
    slots: &mut [Option<Result<T>>],
    raise_on_error: bool,
) -> Result<()>
where
    S: Stream<Item = (usize, Result<T>)> + Unpin,
{
    while let Some(Some((index, result))) = pending.next().now_or_never() {
        record(slots, index, result, raise_on_error)?;
    }
    Ok(())
}

fn record<T>(
    slots: &mut [Option<Result<T>>],
    index: usize,
    result: Result<T>,
    raise_on_error: bool,
) -> Result<()> {
    match result {
        Err(err) if raise_on_error => Err(err),
        result => {
            slots[index] = Some(result);
            Ok(())
        }
    }
}

fn timed_out<T>(
    index: usize,
    target: RequestTarget,
    options: &JoinOptions,
    abort: &tokio::task::AbortHandle,
) -> Outcome<T> {
    let timeout = RequestTimeout::new(target, options.timeout);
    if options.cancel_on_timeout {
        abort.abort();
        warn!(index, "{}; aborting", timeout);
    } else {
        warn!(index, "{}; left running", timeout);
    }
    Outcome::Timeout(timeout)
}
