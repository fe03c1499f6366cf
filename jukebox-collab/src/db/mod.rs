use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jukebox_core::{TrackMetadata, TrackRef, UserId};
use thiserror::Error;

mod data;
pub use data::*;

mod memory;
pub use memory::*;

mod pg;
pub use pg::*;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
}

/// Helper trait to reduce boilerplate
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    fn any(self) -> DatabaseError;
}

/// Helper trait to reduce boilerplate
pub trait DatabaseResult<T> {
    /// Turns a conflict into `None`, since re-inserting what is already stored is harmless
    fn skip_conflict(self) -> Result<Option<T>>;
}

impl<T> DatabaseResult<T> for Result<T> {
    fn skip_conflict(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(DatabaseError::Conflict { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// The durable store behind the room queues.
#[async_trait]
pub trait Database
where
    Self: Send + Sync + 'static,
{
    async fn room_by_id(&self, room_id: PrimaryKey) -> Result<RoomData>;

    /// Returns the rows of a room that have not finished playing, oldest first.
    async fn find_active_queue_rows(&self, room_id: PrimaryKey) -> Result<Vec<QueueRowData>>;
    async fn find_votes_for_queue_rows(&self, queue_row_ids: &[PrimaryKey])
        -> Result<Vec<VoteData>>;

    /// Inserts the rows and returns their ids, in the same order.
    async fn insert_queue_rows(&self, rows: Vec<NewQueueRow>) -> Result<Vec<PrimaryKey>>;
    /// Inserts the votes, silently skipping any that are already stored.
    /// Returns how many were actually inserted.
    async fn insert_votes(&self, votes: Vec<VoteData>) -> Result<u64>;
    async fn delete_votes(&self, queue_row_id: PrimaryKey, user_id: UserId) -> Result<()>;
    async fn delete_queue_row(&self, queue_row_id: PrimaryKey) -> Result<()>;
    async fn mark_queue_row_finished(&self, queue_row_id: PrimaryKey) -> Result<()>;
    async fn update_queue_row_start_time(
        &self,
        queue_row_id: PrimaryKey,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Returns the tracks already known, so their metadata needn't be fetched again.
    async fn track_records_by_refs(&self, track_refs: &[TrackRef]) -> Result<Vec<TrackRecordData>>;
    /// Stores the track, refreshing its metadata if it already exists.
    async fn find_or_create_track_record(&self, metadata: &TrackMetadata) -> Result<TrackRecordData>;
}
