//! All schemas that are exposed from endpoints are defined here
//! along with the conversions from collab types

use chrono::{DateTime, Utc};
use jukebox_collab::{
    CommandOutcome, QueueState, QueuedSong as CollabQueuedSong, RoomData,
    SongSummary as CollabSongSummary, SongVote,
};
use jukebox_core::{PlaybackChange, PlaybackStatus, TrackMetadata, VoteOutcome};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    track_ref: String,
    title: String,
    artists: Vec<String>,
    duration_ms: u64,
    cover_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    track_ref: String,
    score: i32,
    enqueued_by: i32,
    insert_time: DateTime<Utc>,
    playback_started_at: Option<DateTime<Utc>>,
    track: Option<Track>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueuedSong {
    /// The position in the queue, the head is 0
    index: usize,
    #[serde(flatten)]
    song: Song,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    track_ref: String,
    user_id: i32,
    is_upvote: bool,
    cast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Playback {
    active_track_ref: Option<String>,
    /// Clients compute their offset into the track as `now - anchorInstant`
    anchor_instant: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    id: i32,
    title: String,
    creator_id: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    room: Room,
    state: PlaybackState,
    playback: Playback,
    active: Option<Song>,
    upcoming: Vec<QueuedSong>,
    votes: Vec<Vote>,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum VoteResult {
    /// The user had not voted on this song before
    Cast,
    /// The user's previous vote was replaced
    Changed,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum CommandResultKind {
    Enqueued,
    Voted,
    Done,
    State,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    kind: CommandResultKind,
    /// Whether an enqueued track was new to the queue
    #[serde(skip_serializing_if = "Option::is_none")]
    added: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vote: Option<VoteResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<RoomState>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    now: DateTime<Utc>,
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl<I, O> ToSerialized<Option<O>> for Option<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Option<O> {
        self.as_ref().map(|x| x.to_serialized())
    }
}

impl ToSerialized<Track> for TrackMetadata {
    fn to_serialized(&self) -> Track {
        Track {
            track_ref: self.track_ref.to_string(),
            title: self.title.clone(),
            artists: self.artists.clone(),
            duration_ms: self.duration_ms,
            cover_url: self.cover_url.clone(),
        }
    }
}

impl ToSerialized<Song> for CollabSongSummary {
    fn to_serialized(&self) -> Song {
        Song {
            track_ref: self.track_ref.to_string(),
            score: self.score,
            enqueued_by: self.enqueued_by,
            insert_time: self.insert_time,
            playback_started_at: self.playback_started_at,
            track: self.metadata.to_serialized(),
        }
    }
}

impl ToSerialized<QueuedSong> for CollabQueuedSong {
    fn to_serialized(&self) -> QueuedSong {
        QueuedSong {
            index: self.index,
            song: self.song.to_serialized(),
        }
    }
}

impl ToSerialized<Vote> for SongVote {
    fn to_serialized(&self) -> Vote {
        Vote {
            track_ref: self.track_ref.to_string(),
            user_id: self.vote.user_id,
            is_upvote: self.vote.is_upvote,
            cast_at: self.vote.cast_at,
        }
    }
}

impl ToSerialized<PlaybackState> for PlaybackStatus {
    fn to_serialized(&self) -> PlaybackState {
        match self {
            PlaybackStatus::Stopped => PlaybackState::Stopped,
            PlaybackStatus::Playing => PlaybackState::Playing,
            PlaybackStatus::Paused => PlaybackState::Paused,
        }
    }
}

impl ToSerialized<Playback> for PlaybackChange {
    fn to_serialized(&self) -> Playback {
        Playback {
            active_track_ref: self.active_track_ref.as_ref().map(|t| t.to_string()),
            anchor_instant: self.anchor_instant,
        }
    }
}

impl ToSerialized<Room> for RoomData {
    fn to_serialized(&self) -> Room {
        Room {
            id: self.id,
            title: self.title.clone(),
            creator_id: self.creator_id,
        }
    }
}

impl ToSerialized<RoomState> for QueueState {
    fn to_serialized(&self) -> RoomState {
        RoomState {
            room: self.room.to_serialized(),
            state: self.status.to_serialized(),
            playback: self.playback.to_serialized(),
            active: self.active.to_serialized(),
            upcoming: self.upcoming.to_serialized(),
            votes: self.votes.to_serialized(),
        }
    }
}

impl ToSerialized<CommandResult> for CommandOutcome {
    fn to_serialized(&self) -> CommandResult {
        let empty = |kind| CommandResult {
            kind,
            added: None,
            vote: None,
            state: None,
        };

        match self {
            CommandOutcome::Enqueued { added } => CommandResult {
                added: Some(*added),
                ..empty(CommandResultKind::Enqueued)
            },
            CommandOutcome::Voted(outcome) => CommandResult {
                vote: Some(match outcome {
                    VoteOutcome::Cast => VoteResult::Cast,
                    VoteOutcome::Changed => VoteResult::Changed,
                }),
                ..empty(CommandResultKind::Voted)
            },
            CommandOutcome::Done => empty(CommandResultKind::Done),
            CommandOutcome::State(state) => CommandResult {
                state: Some(state.to_serialized()),
                ..empty(CommandResultKind::State)
            },
        }
    }
}

impl ServerTime {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use jukebox_core::TrackRef;

    use super::*;

    #[test]
    fn test_queued_song_is_flat() {
        let song = CollabQueuedSong {
            index: 2,
            song: CollabSongSummary {
                track_ref: TrackRef::new("abc"),
                score: -1,
                enqueued_by: 4,
                insert_time: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
                playback_started_at: None,
                metadata: None,
            },
        };

        let json = serde_json::to_value(song.to_serialized()).unwrap();

        assert_eq!(json["index"], 2);
        assert_eq!(json["trackRef"], "abc");
        assert_eq!(json["enqueuedBy"], 4);
        assert!(json["track"].is_null());
    }

    #[test]
    fn test_command_results_are_tagged() {
        let json = serde_json::to_value(
            CommandOutcome::Voted(VoteOutcome::Changed).to_serialized(),
        )
        .unwrap();

        assert_eq!(json["kind"], "voted");
        assert_eq!(json["vote"], "changed");
        assert!(json.get("state").is_none(), "Absent fields are skipped");
    }
}
