//! Long-running queue consumers owned by the server process.
//!
//! The relay and the in-process worker only return when their consumer
//! stream ends. The process cannot do its job without them, so the first one
//! to stop is reported through [`Background::stopped`] and the server shuts
//! down instead of accepting commands nobody will answer.

use std::future::Future;
use std::sync::Arc;

use log::{error, info};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::queue::QueueError;

#[derive(Default)]
pub struct Background {
    stopped: Arc<Notify>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Background {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` until it returns; its return, `Ok` or not, counts as a stop.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), QueueError>> + Send + 'static,
    {
        let stopped = Arc::clone(&self.stopped);
        let handle = tokio::spawn(async move {
            match task.await {
                Ok(()) => info!("{} finished", name),
                Err(e) => error!("{} stopped: {}", name, e),
            }
            stopped.notify_one();
        });
        self.tasks.push((name, handle));
    }

    /// Resolves once any spawned task has stopped, including one that
    /// stopped before this was called.
    pub fn stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        let stopped = Arc::clone(&self.stopped);
        async move { stopped.notified().await }
    }

    /// Name of the first task that is no longer running.
    pub fn first_stopped(&self) -> Option<&'static str> {
        self.tasks
            .iter()
            .find(|(_, handle)| handle.is_finished())
            .map(|(name, _)| *name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn abort_all(&self) {
        for (_, handle) in &self.tasks {
            handle.abort();
        }
    }
}

impl Drop for Background {
    fn drop(&mut self) {
        self.abort_all();
    }
}
