use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::{PlaybackState, QueueError, Result, RoomSong, TrackRef, UserId, Vote};

/// The type used for room identifiers.
pub type RoomId = i32;

/// The order songs play in: higher score first, earlier insertion breaking ties.
pub fn queue_order(a: &RoomSong, b: &RoomSong) -> Ordering {
    b.score()
        .cmp(&a.score())
        .then_with(|| a.insert_time().cmp(&b.insert_time()))
}

/// The in-memory state of one room: what is queued, what was played, and what is playing now.
#[derive(Debug, Clone)]
pub struct RoomQueue {
    room_id: RoomId,
    /// Kept in [queue_order] after every mutation
    upcoming: Vec<RoomSong>,
    /// Ordered by playback start, oldest first
    history: Vec<RoomSong>,
    pub(crate) playback: PlaybackState,
}

/// Describes what happened to a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// The user had not voted on this song before
    Cast,
    /// The user's previous vote was replaced
    Changed,
}

impl RoomQueue {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            upcoming: vec![],
            history: vec![],
            playback: PlaybackState::Stopped,
        }
    }

    /// Rebuilds a room from songs loaded out of storage.
    ///
    /// Songs whose playback started before `now` have been played. The most recently
    /// started of them is restored as the playing song, the rest go to the history.
    /// Everything else is upcoming.
    pub fn restore(room_id: RoomId, songs: Vec<RoomSong>, now: DateTime<Utc>) -> Self {
        let mut queue = Self::new(room_id);

        let (mut started, upcoming): (Vec<_>, Vec<_>) = songs
            .into_iter()
            .partition(|s| s.playback_started_at().is_some_and(|t| t <= now));

        started.sort_by_key(|s| s.playback_started_at());

        if let Some(active) = started.pop() {
            queue.playback = PlaybackState::Playing { song: active };
        }

        queue.history = started;
        queue.upcoming = upcoming;
        queue.reorder();

        queue
    }

    /// Adds a track to the queue. Returns false if the track is already queued.
    pub fn enqueue(&mut self, track_ref: TrackRef, user_id: UserId, now: DateTime<Utc>) -> bool {
        if self.upcoming_song(&track_ref).is_some() {
            return false;
        }

        self.upcoming.push(RoomSong::new(track_ref, user_id, now));
        self.reorder();

        true
    }

    /// Removes a queued track. Only the user who queued it, or the room's owner, may do so.
    pub fn remove(
        &mut self,
        track_ref: &TrackRef,
        user_id: UserId,
        owner_id: UserId,
    ) -> Result<RoomSong> {
        let index = self
            .upcoming
            .iter()
            .position(|s| s.track_ref() == track_ref)
            .ok_or_else(|| song_not_found(track_ref))?;

        let song = &self.upcoming[index];
        if song.enqueued_by() != user_id && owner_id != user_id {
            return Err(QueueError::PermissionDenied {
                user_id,
                action: "remove a song queued by someone else",
            });
        }

        Ok(self.upcoming.remove(index))
    }

    /// Casts an up or down vote on a queued track, replacing the user's previous vote.
    pub fn cast_vote(
        &mut self,
        track_ref: &TrackRef,
        user_id: UserId,
        is_upvote: bool,
        at: DateTime<Utc>,
    ) -> Result<VoteOutcome> {
        let existed = self
            .upcoming_song_mut(track_ref)?
            .cast_vote(user_id, is_upvote, at);

        self.reorder();

        Ok(if existed {
            VoteOutcome::Changed
        } else {
            VoteOutcome::Cast
        })
    }

    /// Removes the user's vote on a queued track.
    pub fn retract_vote(&mut self, track_ref: &TrackRef, user_id: UserId) -> Result<()> {
        if !self.upcoming_song_mut(track_ref)?.retract_vote(user_id) {
            return Err(vote_not_found(track_ref, user_id));
        }

        self.reorder();
        Ok(())
    }

    /// Flips the polarity of the user's vote on a queued track.
    pub fn swap_vote(
        &mut self,
        track_ref: &TrackRef,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if !self.upcoming_song_mut(track_ref)?.swap_vote(user_id, at) {
            return Err(vote_not_found(track_ref, user_id));
        }

        self.reorder();
        Ok(())
    }

    /// Returns the track that would play if play were invoked now.
    ///
    /// While paused this is the paused song, since playing resumes it.
    pub fn head(&self) -> Option<&RoomSong> {
        match &self.playback {
            PlaybackState::Paused { song, .. } => Some(song),
            _ => self.upcoming.first(),
        }
    }

    /// Returns all upcoming songs, in the order they will play.
    pub fn upcoming(&self) -> &[RoomSong] {
        &self.upcoming
    }

    /// Returns all played songs, oldest first.
    pub fn history(&self) -> &[RoomSong] {
        &self.history
    }

    /// Returns every vote on an upcoming song, paired with the song it was cast on.
    pub fn votes(&self) -> Vec<(TrackRef, Vote)> {
        self.upcoming
            .iter()
            .flat_map(|s| s.votes().iter().map(|v| (s.track_ref().clone(), *v)))
            .collect()
    }

    /// Returns every song this room knows of: upcoming, active and played.
    pub fn all_songs(&self) -> impl Iterator<Item = &RoomSong> {
        self.upcoming
            .iter()
            .chain(self.playback.song())
            .chain(self.history.iter())
    }

    pub(crate) fn all_songs_mut(&mut self) -> impl Iterator<Item = &mut RoomSong> {
        self.upcoming
            .iter_mut()
            .chain(self.playback.song_mut())
            .chain(self.history.iter_mut())
    }

    /// Calls `f` on every song, wherever it lives, without affecting the order.
    ///
    /// Used to attach information learned while persisting, such as row ids and metadata.
    pub fn update_songs<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut RoomSong),
    {
        for song in self.all_songs_mut() {
            f(song)
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn upcoming_song(&self, track_ref: &TrackRef) -> Option<&RoomSong> {
        self.upcoming.iter().find(|s| s.track_ref() == track_ref)
    }

    fn upcoming_song_mut(&mut self, track_ref: &TrackRef) -> Result<&mut RoomSong> {
        self.upcoming
            .iter_mut()
            .find(|s| s.track_ref() == track_ref)
            .ok_or_else(|| song_not_found(track_ref))
    }

    /// Takes the next song off the top of the queue.
    pub(crate) fn pop_upcoming(&mut self) -> Option<RoomSong> {
        if self.upcoming.is_empty() {
            None
        } else {
            Some(self.upcoming.remove(0))
        }
    }

    /// Appends a played song to the history, keeping it ordered by playback start.
    pub(crate) fn push_history(&mut self, song: RoomSong) {
        let index = self
            .history
            .partition_point(|s| s.playback_started_at() <= song.playback_started_at());

        self.history.insert(index, song);
    }

    /// Restores the total order after scores changed.
    fn reorder(&mut self) {
        self.upcoming.sort_by(queue_order);
    }
}

fn song_not_found(track_ref: &TrackRef) -> QueueError {
    QueueError::NotFound {
        resource: "song",
        identifier: track_ref.to_string(),
    }
}

fn vote_not_found(track_ref: &TrackRef, user_id: UserId) -> QueueError {
    QueueError::NotFound {
        resource: "vote",
        identifier: format!("{}:{}", track_ref, user_id),
    }
}
