mod commands;
mod config;
mod db;
mod events;
mod metadata;
mod rooms;

#[cfg(test)]
mod testing;

use std::sync::Arc;

pub use commands::*;
pub use config::*;
pub use db::*;
pub use events::*;
pub use metadata::*;
pub use rooms::*;

use jukebox_core::{Clock, PipelineError, RoomId, SerialEventPipeline, TaskId};

/// The jukebox collab system, owning the rooms and serializing every command sent to them.
pub struct Collab {
    context: CollabContext,
    pipeline: SerialEventPipeline,

    pub rooms: Arc<QueueRegistry>,
}

/// A type passed to various components of the collab system, to access storage, emit events, and tell time.
#[derive(Clone)]
pub struct CollabContext {
    pub database: Arc<dyn Database>,
    pub metadata: Arc<dyn TrackMetadataProvider>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub clock: Arc<dyn Clock>,
    pub config: CollabConfig,
}

impl Collab {
    /// Creates the collab system. Must be called from within a tokio runtime.
    pub fn new(context: CollabContext) -> Self {
        let rooms = Arc::new(QueueRegistry::new(&context));

        Self {
            context,
            pipeline: SerialEventPipeline::new(),
            rooms,
        }
    }

    pub fn context(&self) -> &CollabContext {
        &self.context
    }

    /// Runs a command behind every command submitted before it, and returns its outcome.
    ///
    /// A failure is also sent to the connection the command came from.
    pub async fn execute(
        &self,
        envelope: CommandEnvelope,
    ) -> std::result::Result<CommandOutcome, CommandError> {
        let registry = self.rooms.clone();
        let label = envelope.label();
        let task_envelope = envelope.clone();

        match self
            .pipeline
            .run(label, handle(registry, task_envelope))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                let error = CommandError::from(e);
                report_failure(&self.rooms, &envelope, &error);

                Err(error)
            }
        }
    }

    /// Queues a command without waiting for it. Its outcome is only visible through events.
    pub fn submit(&self, envelope: CommandEnvelope) -> std::result::Result<TaskId, PipelineError> {
        let registry = self.rooms.clone();

        self.pipeline.submit(envelope.label(), async move {
            // Failures are already reported to the sender
            let _ = handle(registry, envelope).await;
            Ok::<_, CommandError>(())
        })
    }

    /// Reads a room's state without waiting for queued commands.
    ///
    /// The snapshot may be stale as soon as it is returned.
    pub async fn queue_state(
        &self,
        room_id: RoomId,
    ) -> std::result::Result<QueueState, CommandError> {
        self.rooms.get_queue_state(room_id).await
    }

    /// Waits for every queued command, then flushes every room.
    pub async fn shutdown(&self) -> std::result::Result<(), PipelineError> {
        let registry = self.rooms.clone();

        self.pipeline
            .run("shutdown flush", async move { registry.flush_all().await })
            .await
    }
}
