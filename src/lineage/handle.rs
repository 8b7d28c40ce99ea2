use super::TaskId;
use crate::core::errors::{Result, SkeinError};
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::{AbortHandle, JoinError, JoinHandle};

/// Owned handle to a tracked task.
///
/// Awaiting the handle yields the task's output; a panic or abort comes back
/// as a [`SkeinError`]. Dropping the handle detaches the task, it keeps running.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: TaskId,
    inner: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(id: TaskId, inner: JoinHandle<T>) -> Self {
        Self { id, inner }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    pub fn abort(&self) {
        self.inner.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.inner.abort_handle()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let id = this.id;
        Pin::new(&mut this.inner)
            .poll(cx)
            .map(|res| res.map_err(|err| join_error(id, err)))
    }
}

fn join_error(id: TaskId, err: JoinError) -> SkeinError {
    if err.is_panic() {
        let payload = err.into_panic();
        SkeinError::panicked(id, panic_message(&*payload))
    } else {
        SkeinError::aborted(id)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
