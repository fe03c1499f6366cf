use std::{fmt::Display, future::Future, panic::AssertUnwindSafe};

use futures_util::{future::BoxFuture, FutureExt};
use log::{debug, error};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::Id;

pub type TaskId = Id<PipelineTask>;

/// A unit of work submitted to the [SerialEventPipeline].
pub struct PipelineTask {
    id: TaskId,
    label: String,
    future: BoxFuture<'static, Result<(), String>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// The worker has shut down and will not run any more tasks
    #[error("The event pipeline is closed")]
    Closed,
    /// The task panicked while running
    #[error("Task {0} panicked")]
    Panicked(String),
}

/// Runs submitted tasks one at a time, in the order they were submitted.
///
/// A failing or panicking task is logged and the pipeline moves on to the next one.
#[derive(Clone)]
pub struct SerialEventPipeline {
    sender: mpsc::UnboundedSender<PipelineTask>,
}

impl Default for SerialEventPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialEventPipeline {
    /// Creates the pipeline and spawns its worker. Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        tokio::spawn(run_worker(receiver));

        Self { sender }
    }

    /// Queues a task behind everything submitted before it.
    pub fn submit<F, E>(&self, label: impl Into<String>, task: F) -> Result<TaskId, PipelineError>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        let id = TaskId::new();
        let label = label.into();

        debug!("Task {} ({}) added to the pipeline", id, label);

        self.sender
            .send(PipelineTask {
                id,
                label,
                future: task.map(|r| r.map_err(|e| e.to_string())).boxed(),
            })
            .map_err(|_| PipelineError::Closed)?;

        Ok(id)
    }

    /// Queues a task and waits for its result.
    pub async fn run<F, T>(&self, label: impl Into<String>, task: F) -> Result<T, PipelineError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let label = label.into();
        let (result_sender, result_receiver) = oneshot::channel();

        self.submit(label.clone(), async move {
            // The caller may have stopped waiting, which is fine
            let _ = result_sender.send(task.await);
            Ok::<_, String>(())
        })?;

        result_receiver
            .await
            .map_err(|_| PipelineError::Panicked(label))
    }

    /// Waits until every task submitted so far has finished.
    pub async fn wait_idle(&self) -> Result<(), PipelineError> {
        self.run("wait-idle", async {}).await
    }
}

async fn run_worker(mut receiver: mpsc::UnboundedReceiver<PipelineTask>) {
    while let Some(task) = receiver.recv().await {
        let PipelineTask { id, label, future } = task;

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(())) => debug!("Task {} ({}) completed", id, label),
            Ok(Err(e)) => error!("Task {} ({}) failed: {}", id, label, e),
            Err(_) => error!("Task {} ({}) panicked", id, label),
        }
    }

    debug!("Event pipeline drained and closed");
}
