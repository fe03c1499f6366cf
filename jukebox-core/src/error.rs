use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

/// Everything that can go wrong when applying a change to a room's queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The song or vote that was referenced does not exist
    #[error("{resource} {identifier} does not exist")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },
    /// The playback state machine does not allow this action in its current state
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
    /// The user is not allowed to perform this change
    #[error("User {user_id} may not {action}")]
    PermissionDenied { user_id: i32, action: &'static str },
    /// Playback was requested but nothing is queued
    #[error("Queue is empty")]
    QueueEmpty,
}
