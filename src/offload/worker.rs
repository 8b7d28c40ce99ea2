use crate::core::errors::{Result, SkeinError};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// One dedicated OS thread draining a queue of jobs in order
#[derive(Debug)]
pub(crate) struct CpuWorker {
    name: String,
    sender: mpsc::UnboundedSender<Job>,
    thread: thread::JoinHandle<()>,
}

impl CpuWorker {
    pub(crate) fn start(name: &str) -> Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    job();
                }
                debug!("CPU worker queue closed");
            })
            .map_err(|e| SkeinError::offload_with_source("failed to start CPU worker thread", e))?;

        info!(worker = %name, "Started CPU worker");
        Ok(Self {
            name: name.to_string(),
            sender,
            thread,
        })
    }

    pub(crate) fn submit(&self, job: Job) -> Result<()> {
        self.sender
            .send(job)
            .map_err(|_| SkeinError::offload(format!("CPU worker {} is not accepting work", self.name)))
    }

    /// Close the queue, wait for queued jobs to finish and join the thread.
    /// Blocks the calling thread.
    pub(crate) fn shutdown(self) -> Result<()> {
        let Self {
            name,
            sender,
            thread,
        } = self;
        drop(sender);
        thread
            .join()
            .map_err(|_| SkeinError::offload(format!("CPU worker {} exited abnormally", name)))?;
        info!(worker = %name, "Stopped CPU worker");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_shutdown_drains_queue() {
        let worker = CpuWorker::start("test-cpu").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let seen = seen.clone();
            worker
                .submit(Box::new(move || {
                    assert_eq!(thread::current().name(), Some("test-cpu"));
                    seen.lock().unwrap().push(i);
                }))
                .unwrap();
        }
        worker.shutdown().unwrap();

        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }
}
