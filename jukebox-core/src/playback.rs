use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{QueueError, Result, RoomQueue, RoomSong, TrackRef};

/// Where a room's shared playback currently is.
#[derive(Debug, Clone, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing {
        song: RoomSong,
    },
    Paused {
        song: RoomSong,
        paused_at: DateTime<Utc>,
    },
}

/// The serializable name of a [PlaybackState].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
}

/// What every client in a room needs to render the same playback position.
///
/// A client computes its local offset into the track as `now - anchor`.
/// A paused room has an active track but no anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackChange {
    pub active_track_ref: Option<TrackRef>,
    pub anchor_instant: Option<DateTime<Utc>>,
}

impl PlaybackState {
    /// Returns the song occupying the active slot, if any.
    pub fn song(&self) -> Option<&RoomSong> {
        match self {
            Self::Stopped => None,
            Self::Playing { song } | Self::Paused { song, .. } => Some(song),
        }
    }

    pub(crate) fn song_mut(&mut self) -> Option<&mut RoomSong> {
        match self {
            Self::Stopped => None,
            Self::Playing { song } | Self::Paused { song, .. } => Some(song),
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        match self {
            Self::Stopped => PlaybackStatus::Stopped,
            Self::Playing { .. } => PlaybackStatus::Playing,
            Self::Paused { .. } => PlaybackStatus::Paused,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Playing { .. } => "playing",
            Self::Paused { .. } => "paused",
        }
    }

    /// Returns the notification describing this state.
    pub fn as_change(&self) -> PlaybackChange {
        match self {
            Self::Stopped => PlaybackChange {
                active_track_ref: None,
                anchor_instant: None,
            },
            Self::Playing { song } => PlaybackChange {
                active_track_ref: Some(song.track_ref().clone()),
                anchor_instant: song.playback_started_at(),
            },
            Self::Paused { song, .. } => PlaybackChange {
                active_track_ref: Some(song.track_ref().clone()),
                anchor_instant: None,
            },
        }
    }
}

impl RoomQueue {
    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    /// Starts the head of the queue, or resumes the paused song.
    ///
    /// Resuming starts a fresh interval at `now`; time played before the pause is not replayed.
    pub fn play(&mut self, now: DateTime<Utc>) -> Result<PlaybackChange> {
        match std::mem::take(&mut self.playback) {
            PlaybackState::Paused { mut song, .. } => {
                song.mark_playback_start(now);
                self.playback = PlaybackState::Playing { song };
            }
            PlaybackState::Stopped => {
                let Some(mut song) = self.pop_upcoming() else {
                    return Err(QueueError::QueueEmpty);
                };

                song.mark_playback_start(now);
                self.playback = PlaybackState::Playing { song };
            }
            playing @ PlaybackState::Playing { .. } => {
                self.playback = playing;
                return Err(self.invalid("play"));
            }
        }

        Ok(self.playback.as_change())
    }

    /// Freezes the shared clock on the active song.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<PlaybackChange> {
        match std::mem::take(&mut self.playback) {
            PlaybackState::Playing { song } => {
                self.playback = PlaybackState::Paused {
                    song,
                    paused_at: now,
                };

                Ok(self.playback.as_change())
            }
            other => {
                self.playback = other;
                Err(self.invalid("pause"))
            }
        }
    }

    /// Ends playback, moving the active song into the history.
    pub fn stop(&mut self) -> Result<PlaybackChange> {
        match std::mem::take(&mut self.playback) {
            PlaybackState::Stopped => Err(self.invalid("stop")),
            PlaybackState::Playing { song } | PlaybackState::Paused { song, .. } => {
                self.push_history(song);
                Ok(self.playback.as_change())
            }
        }
    }

    /// Stops the active song and starts the next one, as one step.
    ///
    /// If nothing else is queued, playback ends.
    pub fn skip(&mut self, now: DateTime<Utc>) -> Result<PlaybackChange> {
        match std::mem::take(&mut self.playback) {
            PlaybackState::Stopped => Err(self.invalid("skip")),
            PlaybackState::Playing { song } | PlaybackState::Paused { song, .. } => {
                self.push_history(song);

                if let Some(mut next) = self.pop_upcoming() {
                    next.mark_playback_start(now);
                    self.playback = PlaybackState::Playing { song: next };
                }

                Ok(self.playback.as_change())
            }
        }
    }

    /// Returns the song in the active slot, if any.
    pub fn active_song(&self) -> Option<&RoomSong> {
        self.playback.song()
    }

    fn invalid(&self, action: &'static str) -> QueueError {
        QueueError::InvalidTransition {
            action,
            state: self.playback.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{Clock, ManualClock};

    fn clock() -> ManualClock {
        ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp"))
    }

    fn active(queue: &RoomQueue) -> Option<&str> {
        queue.active_song().map(|s| s.track_ref().as_str())
    }

    #[test]
    fn test_play_on_empty_queue_fails() {
        let clock = clock();
        let mut queue = RoomQueue::new(1);

        assert_eq!(queue.play(clock.now()), Err(QueueError::QueueEmpty));
        assert_eq!(queue.playback().status(), PlaybackStatus::Stopped);
    }

    #[test]
    fn test_invalid_transitions() {
        let clock = clock();
        let mut queue = RoomQueue::new(1);
        queue.enqueue("a".into(), 1, clock.now());

        assert!(matches!(
            queue.pause(clock.now()),
            Err(QueueError::InvalidTransition { action: "pause", state: "stopped" })
        ));
        assert!(matches!(queue.stop(), Err(QueueError::InvalidTransition { .. })));
        assert!(matches!(
            queue.skip(clock.now()),
            Err(QueueError::InvalidTransition { .. })
        ));

        queue.play(clock.now()).unwrap();
        assert!(matches!(
            queue.play(clock.now()),
            Err(QueueError::InvalidTransition { action: "play", state: "playing" })
        ));
        assert_eq!(active(&queue), Some("a"), "failed play leaves the song active");

        queue.pause(clock.now()).unwrap();
        assert!(matches!(
            queue.pause(clock.now()),
            Err(QueueError::InvalidTransition { action: "pause", state: "paused" })
        ));
    }

    #[test]
    fn test_resume_reanchors_playback() {
        let clock = clock();
        let mut queue = RoomQueue::new(1);
        queue.enqueue("a".into(), 1, clock.now());

        let started = queue.play(clock.now()).unwrap();
        clock.advance(Duration::seconds(42));

        let paused = queue.pause(clock.now()).unwrap();
        assert_eq!(paused.active_track_ref, Some("a".into()));
        assert_eq!(paused.anchor_instant, None, "a paused room has no anchor");
        assert_eq!(
            queue.head().map(|s| s.track_ref().as_str()),
            Some("a"),
            "head of a paused room is the paused song"
        );

        clock.advance(Duration::seconds(5));
        let resumed = queue.play(clock.now()).unwrap();

        assert_eq!(resumed.active_track_ref, Some("a".into()), "same song resumes");
        assert!(
            resumed.anchor_instant > started.anchor_instant,
            "anchor is the resume instant"
        );
    }

    #[test]
    fn test_stop_moves_song_to_history_once() {
        let clock = clock();
        let mut queue = RoomQueue::new(1);
        queue.enqueue("a".into(), 1, clock.now());
        queue.play(clock.now()).unwrap();

        let stopped = queue.stop().unwrap();
        assert_eq!(stopped.active_track_ref, None);
        assert_eq!(queue.history().len(), 1);

        assert!(queue.stop().is_err(), "stopping twice is invalid");
        assert_eq!(queue.history().len(), 1, "no duplicate history entry");
    }

    #[test]
    fn test_stop_while_paused() {
        let clock = clock();
        let mut queue = RoomQueue::new(1);
        queue.enqueue("a".into(), 1, clock.now());
        queue.play(clock.now()).unwrap();
        queue.pause(clock.now()).unwrap();

        queue.stop().unwrap();
        assert_eq!(queue.playback().status(), PlaybackStatus::Stopped);
        assert_eq!(queue.history()[0].track_ref().as_str(), "a");
    }

    #[test]
    fn test_skip_is_atomic() {
        let clock = clock();
        let mut queue = RoomQueue::new(1);
        queue.enqueue("a".into(), 1, clock.now());
        queue.enqueue("b".into(), 1, clock.now());
        queue.play(clock.now()).unwrap();

        let skipped = queue.skip(clock.now()).unwrap();
        assert_eq!(skipped.active_track_ref, Some("b".into()));
        assert!(skipped.anchor_instant.is_some());
        assert_eq!(queue.playback().status(), PlaybackStatus::Playing);

        let ended = queue.skip(clock.now()).unwrap();
        assert_eq!(ended.active_track_ref, None, "nothing left to play");
        assert_eq!(queue.playback().status(), PlaybackStatus::Stopped);

        let history: Vec<_> = queue
            .history()
            .iter()
            .map(|s| s.track_ref().as_str())
            .collect();
        assert_eq!(history, vec!["a", "b"], "history is in playback order");
    }

    #[test]
    fn test_room_scenario() {
        let clock = clock();
        let mut queue = RoomQueue::new(1);
        let (u1, u2) = (1, 2);

        queue.enqueue("t1".into(), u1, clock.now());
        assert_eq!(queue.head().map(|s| s.track_ref().as_str()), Some("t1"));

        queue.enqueue("t2".into(), u2, clock.now());
        queue.cast_vote(&"t1".into(), u2, false, clock.now()).unwrap();
        queue.cast_vote(&"t2".into(), u2, true, clock.now()).unwrap();
        assert_eq!(queue.upcoming_song(&"t1".into()).map(|s| s.score()), Some(-1));
        assert_eq!(queue.upcoming_song(&"t2".into()).map(|s| s.score()), Some(1));
        assert_eq!(queue.head().map(|s| s.track_ref().as_str()), Some("t2"));

        let first = queue.play(clock.now()).unwrap();
        assert_eq!(queue.playback().status(), PlaybackStatus::Playing);
        assert_eq!(active(&queue), Some("t2"));

        queue.pause(clock.now()).unwrap();
        let resumed = queue.play(clock.now()).unwrap();
        assert_eq!(active(&queue), Some("t2"));
        assert!(resumed.anchor_instant > first.anchor_instant);

        queue.stop().unwrap();
        assert_eq!(queue.playback().status(), PlaybackStatus::Stopped);
        assert_eq!(queue.history()[0].track_ref().as_str(), "t2");

        let upcoming: Vec<_> = queue
            .upcoming()
            .iter()
            .map(|s| s.track_ref().as_str())
            .collect();
        assert_eq!(upcoming, vec!["t1"]);
    }
}
