use chrono::{DateTime, Utc};
use jukebox_core::{TrackMetadata, TrackRef, UserId};

/// The type used for primary keys in the database.
pub type PrimaryKey = i32;

/// A room, as far as the queue is concerned
#[derive(Debug, Clone)]
pub struct RoomData {
    pub id: PrimaryKey,
    pub title: String,
    /// The user who created the room, who may moderate its queue
    pub creator_id: UserId,
}

/// A known track and its cached metadata
#[derive(Debug, Clone)]
pub struct TrackRecordData {
    pub id: PrimaryKey,
    pub metadata: TrackMetadata,
}

/// A song instance in a room's queue, joined with its track
#[derive(Debug, Clone)]
pub struct QueueRowData {
    pub id: PrimaryKey,
    pub room_id: PrimaryKey,
    pub track_ref: TrackRef,
    pub metadata: Option<TrackMetadata>,
    /// Rows written before the enqueuer was recorded have none
    pub enqueued_by: Option<UserId>,
    pub insert_time: DateTime<Utc>,
    /// Null while queued or paused
    pub start_time: Option<DateTime<Utc>>,
    /// The song was played and stopped
    pub finished: bool,
}

#[derive(Debug, Clone)]
pub struct NewQueueRow {
    pub room_id: PrimaryKey,
    pub track_id: PrimaryKey,
    pub enqueued_by: UserId,
    pub insert_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub finished: bool,
}

/// A vote row. Several rows may exist per user and song; the latest one counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteData {
    pub queue_row_id: PrimaryKey,
    pub user_id: UserId,
    pub is_upvote: bool,
    pub cast_at: DateTime<Utc>,
}
