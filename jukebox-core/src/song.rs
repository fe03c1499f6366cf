use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The type used for user identifiers.
pub type UserId = i32;

/// The durable identity of a song instance, assigned when it is first flushed.
pub type QueueRowId = i32;

/// An opaque, stable identifier of a track at the metadata provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackRef(String);

impl TrackRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TrackRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TrackRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Descriptive information about a track, as returned by the metadata provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    pub track_ref: TrackRef,
    pub title: String,
    pub artists: Vec<String>,
    /// The length of the track, in milliseconds.
    pub duration_ms: u64,
    pub cover_url: Option<String>,
}

/// A single user's opinion on a queued song.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vote {
    pub user_id: UserId,
    pub is_upvote: bool,
    pub cast_at: DateTime<Utc>,
}

/// One song instance in a room: queued, playing, or already played.
#[derive(Debug, Clone)]
pub struct RoomSong {
    track_ref: TrackRef,
    enqueued_by: UserId,
    insert_time: DateTime<Utc>,
    /// At most one vote per user
    votes: Vec<Vote>,
    score: i32,
    playback_started_at: Option<DateTime<Utc>>,
    metadata: Option<TrackMetadata>,
    queue_row_id: Option<QueueRowId>,
}

impl RoomSong {
    pub fn new(track_ref: TrackRef, enqueued_by: UserId, insert_time: DateTime<Utc>) -> Self {
        Self {
            track_ref,
            enqueued_by,
            insert_time,
            votes: vec![],
            score: 0,
            playback_started_at: None,
            metadata: None,
            queue_row_id: None,
        }
    }

    /// Rebuilds a song from its durable row.
    ///
    /// The stored votes are an audit log and may contain several rows per user,
    /// so only the most recent vote of each user is kept.
    pub fn restore(
        track_ref: TrackRef,
        enqueued_by: UserId,
        insert_time: DateTime<Utc>,
        playback_started_at: Option<DateTime<Utc>>,
        queue_row_id: QueueRowId,
        votes: impl IntoIterator<Item = Vote>,
    ) -> Self {
        let mut song = Self::new(track_ref, enqueued_by, insert_time);
        song.playback_started_at = playback_started_at;
        song.queue_row_id = Some(queue_row_id);

        for vote in votes {
            match song.votes.iter_mut().find(|v| v.user_id == vote.user_id) {
                Some(existing) if existing.cast_at <= vote.cast_at => *existing = vote,
                Some(_) => {}
                None => song.votes.push(vote),
            }
        }

        song.recompute_score();
        song
    }

    /// Casts a vote, replacing the user's previous vote if there is one.
    /// Returns true if the user had already voted.
    pub fn cast_vote(&mut self, user_id: UserId, is_upvote: bool, at: DateTime<Utc>) -> bool {
        let vote = Vote {
            user_id,
            is_upvote,
            cast_at: at,
        };

        let existed = match self.votes.iter_mut().find(|v| v.user_id == user_id) {
            Some(existing) => {
                *existing = vote;
                true
            }
            None => {
                self.votes.push(vote);
                false
            }
        };

        self.recompute_score();
        existed
    }

    /// Removes the user's vote. Returns true if there was one.
    pub fn retract_vote(&mut self, user_id: UserId) -> bool {
        let before = self.votes.len();
        self.votes.retain(|v| v.user_id != user_id);

        let removed = self.votes.len() != before;
        if removed {
            self.recompute_score();
        }

        removed
    }

    /// Flips the polarity of the user's existing vote. Returns false if the user has not voted.
    pub fn swap_vote(&mut self, user_id: UserId, at: DateTime<Utc>) -> bool {
        let Some(vote) = self.votes.iter_mut().find(|v| v.user_id == user_id) else {
            return false;
        };

        vote.is_upvote = !vote.is_upvote;
        vote.cast_at = at;

        self.recompute_score();
        true
    }

    pub fn mark_playback_start(&mut self, at: DateTime<Utc>) {
        self.playback_started_at = Some(at);
    }

    pub fn clear_playback_start(&mut self) {
        self.playback_started_at = None;
    }

    fn recompute_score(&mut self) {
        self.score = self
            .votes
            .iter()
            .map(|v| if v.is_upvote { 1 } else { -1 })
            .sum();
    }

    pub fn track_ref(&self) -> &TrackRef {
        &self.track_ref
    }

    pub fn enqueued_by(&self) -> UserId {
        self.enqueued_by
    }

    pub fn insert_time(&self) -> DateTime<Utc> {
        self.insert_time
    }

    pub fn score(&self) -> i32 {
        self.score
    }

    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }

    pub fn vote_of(&self, user_id: UserId) -> Option<&Vote> {
        self.votes.iter().find(|v| v.user_id == user_id)
    }

    pub fn playback_started_at(&self) -> Option<DateTime<Utc>> {
        self.playback_started_at
    }

    pub fn metadata(&self) -> Option<&TrackMetadata> {
        self.metadata.as_ref()
    }

    pub fn set_metadata(&mut self, metadata: TrackMetadata) {
        self.metadata = Some(metadata);
    }

    pub fn queue_row_id(&self) -> Option<QueueRowId> {
        self.queue_row_id
    }

    pub fn set_queue_row_id(&mut self, id: QueueRowId) {
        self.queue_row_id = Some(id);
    }

    /// Identifies this song instance within its room, even before it has a durable row.
    pub fn key(&self) -> SongKey {
        SongKey {
            track_ref: self.track_ref.clone(),
            insert_time: self.insert_time,
        }
    }
}

/// Identifies a song instance: the same track enqueued twice is two instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SongKey {
    pub track_ref: TrackRef,
    pub insert_time: DateTime<Utc>,
}
