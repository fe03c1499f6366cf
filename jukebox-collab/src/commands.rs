use std::sync::Arc;

use jukebox_core::{PipelineError, QueueError, RoomId, TrackRef, UserId, VoteOutcome};
use log::warn;
use thiserror::Error;

use crate::{
    CollabEvent, ConnectionId, DatabaseError, EventTarget, MetadataError, QueueRegistry,
    QueueState,
};

/// Something a user asked a room to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Enqueue { track_ref: TrackRef },
    Dequeue { track_ref: TrackRef },
    Upvote { track_ref: TrackRef },
    Downvote { track_ref: TrackRef },
    RetractVote { track_ref: TrackRef },
    SwapVote { track_ref: TrackRef },
    Play,
    Pause,
    Stop,
    Skip,
    GetState,
}

/// A command, along with who sent it and where
#[derive(Debug, Clone)]
pub struct CommandEnvelope {
    pub room_id: RoomId,
    pub user_id: UserId,
    /// The realtime connection to reply to, if the sender has one
    pub connection_id: Option<ConnectionId>,
    pub command: Command,
}

/// What a successful command produced
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Enqueued { added: bool },
    Voted(VoteOutcome),
    Done,
    State(Box<QueueState>),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{resource} {identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },

    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error("User {user_id} is not allowed to {action}")]
    PermissionDenied { user_id: UserId, action: &'static str },

    #[error("The queue is empty")]
    QueueEmpty,

    #[error("Storage is unavailable: {0}")]
    StorageFailure(DatabaseError),

    #[error("Track metadata is unavailable: {0}")]
    UpstreamFailure(#[from] MetadataError),

    #[error("The command was interrupted: {0}")]
    Interrupted(#[from] PipelineError),
}

impl CommandError {
    /// A stable identifier clients can match on
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not-found",
            Self::InvalidTransition { .. } => "invalid-transition",
            Self::PermissionDenied { .. } => "permission-denied",
            Self::QueueEmpty => "queue-empty",
            Self::StorageFailure(_) => "storage-failure",
            Self::UpstreamFailure(_) => "upstream-failure",
            Self::Interrupted(_) => "interrupted",
        }
    }
}

impl From<QueueError> for CommandError {
    fn from(value: QueueError) -> Self {
        match value {
            QueueError::NotFound {
                resource,
                identifier,
            } => Self::NotFound {
                resource,
                identifier,
            },
            QueueError::InvalidTransition { action, state } => {
                Self::InvalidTransition { action, state }
            }
            QueueError::PermissionDenied { user_id, action } => {
                Self::PermissionDenied { user_id, action }
            }
            QueueError::QueueEmpty => Self::QueueEmpty,
        }
    }
}

impl From<DatabaseError> for CommandError {
    fn from(value: DatabaseError) -> Self {
        Self::StorageFailure(value)
    }
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Enqueue { .. } => "enqueue",
            Self::Dequeue { .. } => "dequeue",
            Self::Upvote { .. } => "upvote",
            Self::Downvote { .. } => "downvote",
            Self::RetractVote { .. } => "retract-vote",
            Self::SwapVote { .. } => "swap-vote",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Skip => "skip",
            Self::GetState => "get-state",
        }
    }
}

impl CommandEnvelope {
    /// A short description used to label the command in logs
    pub fn label(&self) -> String {
        format!(
            "{} in room {} by user {}",
            self.command.name(),
            self.room_id,
            self.user_id
        )
    }
}

/// Carries out a command against the registry. Must run inside the pipeline.
pub(crate) async fn execute(
    registry: &QueueRegistry,
    envelope: &CommandEnvelope,
) -> Result<CommandOutcome, CommandError> {
    let CommandEnvelope {
        room_id, user_id, ..
    } = *envelope;

    let outcome = match &envelope.command {
        Command::Enqueue { track_ref } => CommandOutcome::Enqueued {
            added: registry.add_song(room_id, user_id, track_ref.clone()).await?,
        },
        Command::Dequeue { track_ref } => {
            registry.remove_song(room_id, user_id, track_ref).await?;
            CommandOutcome::Done
        }
        Command::Upvote { track_ref } => {
            CommandOutcome::Voted(registry.upvote(room_id, user_id, track_ref).await?)
        }
        Command::Downvote { track_ref } => {
            CommandOutcome::Voted(registry.downvote(room_id, user_id, track_ref).await?)
        }
        Command::RetractVote { track_ref } => {
            registry.retract_vote(room_id, user_id, track_ref).await?;
            CommandOutcome::Done
        }
        Command::SwapVote { track_ref } => {
            registry.swap_vote(room_id, user_id, track_ref).await?;
            CommandOutcome::Done
        }
        Command::Play => {
            registry.play(room_id).await?;
            CommandOutcome::Done
        }
        Command::Pause => {
            registry.pause(room_id).await?;
            CommandOutcome::Done
        }
        Command::Stop => {
            registry.stop(room_id).await?;
            CommandOutcome::Done
        }
        Command::Skip => {
            registry.skip(room_id).await?;
            CommandOutcome::Done
        }
        Command::GetState => {
            let state = registry.get_queue_state(room_id).await?;

            if let Some(connection_id) = envelope.connection_id {
                registry.dispatch(
                    EventTarget::Connection(connection_id),
                    CollabEvent::QueueState {
                        state: state.clone(),
                    },
                );
            }

            CommandOutcome::State(Box::new(state))
        }
    };

    Ok(outcome)
}

/// Carries out a command and tells the sender if it failed.
pub(crate) async fn handle(
    registry: Arc<QueueRegistry>,
    envelope: CommandEnvelope,
) -> Result<CommandOutcome, CommandError> {
    let result = execute(&registry, &envelope).await;

    if let Err(error) = &result {
        report_failure(&registry, &envelope, error);
    }

    result
}

/// Logs a failed command and sends the failure to the connection it came from, and nobody else.
pub(crate) fn report_failure(
    registry: &QueueRegistry,
    envelope: &CommandEnvelope,
    error: &CommandError,
) {
    warn!("Command {} failed: {}", envelope.label(), error);

    if let Some(connection_id) = envelope.connection_id {
        registry.dispatch(
            EventTarget::Connection(connection_id),
            CollabEvent::CommandFailed {
                room_id: envelope.room_id,
                reason: error.reason(),
                message: error.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_errors_keep_their_reason() {
        let cases = [
            (QueueError::QueueEmpty, "queue-empty"),
            (
                QueueError::InvalidTransition {
                    action: "pause",
                    state: "stopped",
                },
                "invalid-transition",
            ),
            (
                QueueError::PermissionDenied {
                    user_id: 2,
                    action: "remove",
                },
                "permission-denied",
            ),
            (
                QueueError::NotFound {
                    resource: "song",
                    identifier: "a".to_string(),
                },
                "not-found",
            ),
        ];

        for (error, reason) in cases {
            assert_eq!(CommandError::from(error).reason(), reason);
        }
    }

    #[test]
    fn test_storage_errors_are_storage_failures() {
        let error = CommandError::from(DatabaseError::Internal("down".into()));

        assert_eq!(error.reason(), "storage-failure");
    }
}
