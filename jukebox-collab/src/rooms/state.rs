use chrono::{DateTime, Utc};
use jukebox_core::{
    PlaybackChange, PlaybackStatus, RoomQueue, RoomSong, TrackMetadata, TrackRef, UserId,
};

use crate::RoomData;

/// What clients are told about a song
#[derive(Debug, Clone, PartialEq)]
pub struct SongSummary {
    pub track_ref: TrackRef,
    pub score: i32,
    pub enqueued_by: UserId,
    pub insert_time: DateTime<Utc>,
    pub playback_started_at: Option<DateTime<Utc>>,
    /// Unknown until the song has been flushed once
    pub metadata: Option<TrackMetadata>,
}

/// An upcoming song and its position in the queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedSong {
    /// Zero based, the head of the queue is 0
    pub index: usize,
    pub song: SongSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteEntry {
    pub user_id: UserId,
    pub is_upvote: bool,
    pub cast_at: DateTime<Utc>,
}

/// A vote, together with the song it was cast on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongVote {
    pub track_ref: TrackRef,
    pub vote: VoteEntry,
}

/// A read-only snapshot of a room, enough to render it completely.
#[derive(Debug, Clone)]
pub struct QueueState {
    pub room: RoomData,
    pub status: PlaybackStatus,
    pub playback: PlaybackChange,
    pub active: Option<SongSummary>,
    pub upcoming: Vec<QueuedSong>,
    pub votes: Vec<SongVote>,
}

impl From<&RoomSong> for SongSummary {
    fn from(song: &RoomSong) -> Self {
        Self {
            track_ref: song.track_ref().clone(),
            score: song.score(),
            enqueued_by: song.enqueued_by(),
            insert_time: song.insert_time(),
            playback_started_at: song.playback_started_at(),
            metadata: song.metadata().cloned(),
        }
    }
}

/// Lists the upcoming songs of a queue, in the order they will play
pub fn queued_songs(queue: &RoomQueue) -> Vec<QueuedSong> {
    queue
        .upcoming()
        .iter()
        .enumerate()
        .map(|(index, song)| QueuedSong {
            index,
            song: song.into(),
        })
        .collect()
}

/// Lists every vote on an upcoming song
pub fn song_votes(queue: &RoomQueue) -> Vec<SongVote> {
    queue
        .votes()
        .into_iter()
        .map(|(track_ref, vote)| SongVote {
            track_ref,
            vote: VoteEntry {
                user_id: vote.user_id,
                is_upvote: vote.is_upvote,
                cast_at: vote.cast_at,
            },
        })
        .collect()
}

impl QueueState {
    pub fn capture(room: &RoomData, queue: &RoomQueue) -> Self {
        Self {
            room: room.clone(),
            status: queue.playback().status(),
            playback: queue.playback().as_change(),
            active: queue.active_song().map(SongSummary::from),
            upcoming: queued_songs(queue),
            votes: song_votes(queue),
        }
    }
}
