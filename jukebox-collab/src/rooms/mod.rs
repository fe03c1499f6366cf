mod reconcile;
mod room;
mod state;

use std::sync::Arc;

use dashmap::DashMap;
use jukebox_core::{QueueError, RoomId, RoomQueue, TrackRef, UserId, VoteOutcome};
use log::{error, info, warn};

use crate::{CollabContext, CollabEvent, CommandError, DatabaseError, EventTarget};

pub use reconcile::*;
pub use room::*;
pub use state::*;

/// Owns the resident queue of every room that has been touched since startup.
///
/// Rooms are hydrated from storage the first time they are used. Every mutation is
/// broadcast to the room and then flushed back to storage.
pub struct QueueRegistry {
    context: CollabContext,
    rooms: DashMap<RoomId, Arc<ActiveRoom>>,
}

impl QueueRegistry {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
            rooms: Default::default(),
        }
    }

    /// Returns the resident room, hydrating it from storage if this is the first use.
    pub async fn room(&self, room_id: RoomId) -> Result<Arc<ActiveRoom>, CommandError> {
        if let Some(room) = self.rooms.get(&room_id) {
            return Ok(room.clone());
        }

        let data = self
            .context
            .database
            .room_by_id(room_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { resource, .. } => CommandError::NotFound {
                    resource,
                    identifier: room_id.to_string(),
                },
                e => e.into(),
            })?;

        let queue = hydrate(&self.context, &data).await?;
        let room = Arc::new(ActiveRoom::new(data, queue));

        // Another reader may have hydrated the room meanwhile, theirs wins
        Ok(self.rooms.entry(room_id).or_insert(room).clone())
    }

    /// Returns the rooms currently resident in memory
    pub fn resident(&self) -> Vec<Arc<ActiveRoom>> {
        self.rooms.iter().map(|r| r.clone()).collect()
    }

    /// Adds a song to the end of its score group. Returns false if it was already queued.
    pub async fn add_song(
        &self,
        room_id: RoomId,
        user_id: UserId,
        track_ref: TrackRef,
    ) -> Result<bool, CommandError> {
        let room = self.room(room_id).await?;
        let now = self.context.clock.now();

        let added =
            room.mutate(|queue| Ok::<_, QueueError>(queue.enqueue(track_ref, user_id, now)))?;

        if added {
            self.queue_changed(&room);
            self.flush_logged(&room).await;
        }

        Ok(added)
    }

    pub async fn remove_song(
        &self,
        room_id: RoomId,
        user_id: UserId,
        track_ref: &TrackRef,
    ) -> Result<(), CommandError> {
        let room = self.room(room_id).await?;
        let owner_id = room.data().creator_id;

        room.mutate(|queue| queue.remove(track_ref, user_id, owner_id))?;

        self.queue_changed(&room);
        self.flush_logged(&room).await;

        Ok(())
    }

    pub async fn upvote(
        &self,
        room_id: RoomId,
        user_id: UserId,
        track_ref: &TrackRef,
    ) -> Result<VoteOutcome, CommandError> {
        self.vote(room_id, user_id, track_ref, true).await
    }

    pub async fn downvote(
        &self,
        room_id: RoomId,
        user_id: UserId,
        track_ref: &TrackRef,
    ) -> Result<VoteOutcome, CommandError> {
        self.vote(room_id, user_id, track_ref, false).await
    }

    async fn vote(
        &self,
        room_id: RoomId,
        user_id: UserId,
        track_ref: &TrackRef,
        is_upvote: bool,
    ) -> Result<VoteOutcome, CommandError> {
        let room = self.room(room_id).await?;
        let now = self.context.clock.now();

        let outcome = room.mutate(|queue| queue.cast_vote(track_ref, user_id, is_upvote, now))?;

        self.queue_changed(&room);
        self.flush_logged(&room).await;

        Ok(outcome)
    }

    pub async fn retract_vote(
        &self,
        room_id: RoomId,
        user_id: UserId,
        track_ref: &TrackRef,
    ) -> Result<(), CommandError> {
        let room = self.room(room_id).await?;

        room.mutate(|queue| queue.retract_vote(track_ref, user_id))?;

        self.queue_changed(&room);
        self.flush_logged(&room).await;

        Ok(())
    }

    /// Flips the polarity of a vote the user already cast.
    pub async fn swap_vote(
        &self,
        room_id: RoomId,
        user_id: UserId,
        track_ref: &TrackRef,
    ) -> Result<(), CommandError> {
        let room = self.room(room_id).await?;
        let now = self.context.clock.now();

        room.mutate(|queue| queue.swap_vote(track_ref, user_id, now))?;

        self.queue_changed(&room);
        self.flush_logged(&room).await;

        Ok(())
    }

    pub async fn play(&self, room_id: RoomId) -> Result<(), CommandError> {
        let now = self.context.clock.now();
        self.transition(room_id, true, |queue| queue.play(now)).await
    }

    pub async fn pause(&self, room_id: RoomId) -> Result<(), CommandError> {
        let now = self.context.clock.now();
        self.transition(room_id, false, |queue| queue.pause(now)).await
    }

    pub async fn stop(&self, room_id: RoomId) -> Result<(), CommandError> {
        self.transition(room_id, false, |queue| queue.stop()).await
    }

    pub async fn skip(&self, room_id: RoomId) -> Result<(), CommandError> {
        let now = self.context.clock.now();
        self.transition(room_id, true, |queue| queue.skip(now)).await
    }

    /// Applies a playback transition and announces it.
    async fn transition<F>(
        &self,
        room_id: RoomId,
        affects_queue: bool,
        transition: F,
    ) -> Result<(), CommandError>
    where
        F: FnOnce(&mut RoomQueue) -> jukebox_core::Result<jukebox_core::PlaybackChange>,
    {
        let room = self.room(room_id).await?;

        let change = room.mutate(transition)?;

        self.dispatch(
            EventTarget::Room(room_id),
            CollabEvent::PlaybackChanged { room_id, change },
        );

        if affects_queue {
            self.queue_changed(&room);
        }

        self.flush_logged(&room).await;
        Ok(())
    }

    /// Returns a snapshot of the room. Changes nothing, but may hydrate the room.
    pub async fn get_queue_state(&self, room_id: RoomId) -> Result<QueueState, CommandError> {
        let room = self.room(room_id).await?;

        Ok(QueueState::capture(room.data(), &room.snapshot()))
    }

    /// Writes the room's current state to storage, retrying failed metadata requests.
    pub async fn flush(&self, room_id: RoomId) -> Result<FlushReport, CommandError> {
        let room = self.room(room_id).await?;
        persist(&self.context, &room, FlushMode::Thorough).await
    }

    /// Flushes every resident room, used on shutdown.
    pub async fn flush_all(&self) {
        for room in self.resident() {
            if let Err(e) = persist(&self.context, &room, FlushMode::Thorough).await {
                error!("Failed to flush room {}: {}", room.id(), e);
            }
        }

        info!("Flushed all resident rooms");
    }

    /// Flushes a room after a mutation.
    ///
    /// A failure here leaves the mutation in place, the next flush writes it.
    async fn flush_logged(&self, room: &ActiveRoom) {
        match persist(&self.context, room, FlushMode::Inline).await {
            Ok(_) => {}
            Err(e @ CommandError::UpstreamFailure(_)) => {
                warn!("Room {} is flushed except for new tracks: {}", room.id(), e)
            }
            Err(e) => error!("Failed to flush room {}: {}", room.id(), e),
        }
    }

    fn queue_changed(&self, room: &ActiveRoom) {
        let snapshot = room.snapshot();

        self.dispatch(
            EventTarget::Room(room.id()),
            CollabEvent::QueueChanged {
                room_id: room.id(),
                upcoming: queued_songs(&snapshot),
                votes: song_votes(&snapshot),
            },
        )
    }

    pub(crate) fn dispatch(&self, target: EventTarget, event: CollabEvent) {
        self.context.dispatcher.dispatch(target, event)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use jukebox_core::{Clock, PlaybackStatus};

    use super::*;
    use crate::{
        metadata::tests::FakeMetadataProvider,
        testing::{Harness, CREATOR},
        Database, VoteData,
    };

    fn track(value: &str) -> TrackRef {
        TrackRef::new(value)
    }

    fn upcoming_refs(state: &QueueState) -> Vec<String> {
        state
            .upcoming
            .iter()
            .map(|s| s.song.track_ref.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_room_scenario() {
        let harness = Harness::new();
        let registry = QueueRegistry::new(&harness.context);
        let room_id = harness.room.id;

        registry.add_song(room_id, 1, track("t1")).await.unwrap();
        let state = registry.get_queue_state(room_id).await.unwrap();
        assert_eq!(upcoming_refs(&state), vec!["t1"]);

        registry.add_song(room_id, 2, track("t2")).await.unwrap();
        registry.downvote(room_id, 2, &track("t1")).await.unwrap();
        registry.upvote(room_id, 2, &track("t2")).await.unwrap();

        let state = registry.get_queue_state(room_id).await.unwrap();
        assert_eq!(upcoming_refs(&state), vec!["t2", "t1"], "Votes reorder");
        assert_eq!(state.upcoming[0].song.score, 1);
        assert_eq!(state.upcoming[1].song.score, -1);

        registry.play(room_id).await.unwrap();
        let before_pause = registry.get_queue_state(room_id).await.unwrap();
        assert_eq!(before_pause.status, PlaybackStatus::Playing);
        assert_eq!(before_pause.playback.active_track_ref, Some(track("t2")));

        harness.clock.advance(Duration::seconds(30));
        registry.pause(room_id).await.unwrap();
        registry.play(room_id).await.unwrap();

        let resumed = registry.get_queue_state(room_id).await.unwrap();
        assert_eq!(resumed.playback.active_track_ref, Some(track("t2")));
        assert!(
            resumed.playback.anchor_instant > before_pause.playback.anchor_instant,
            "Resuming starts a fresh interval"
        );

        registry.stop(room_id).await.unwrap();

        let state = registry.get_queue_state(room_id).await.unwrap();
        let snapshot = registry.room(room_id).await.unwrap().snapshot();

        assert_eq!(state.status, PlaybackStatus::Stopped);
        assert_eq!(upcoming_refs(&state), vec!["t1"]);
        assert_eq!(snapshot.history().len(), 1);
        assert_eq!(snapshot.history()[0].track_ref(), &track("t2"));
    }

    #[tokio::test]
    async fn test_mutations_are_broadcast_to_the_room() {
        let harness = Harness::new();
        let registry = QueueRegistry::new(&harness.context);
        let room_id = harness.room.id;

        registry.add_song(room_id, 1, track("a")).await.unwrap();
        registry.play(room_id).await.unwrap();

        let events = harness.drain_events();

        assert!(events
            .iter()
            .all(|e| e.target == EventTarget::Room(room_id)));

        let playback: Vec<_> = events
            .iter()
            .filter_map(|e| match &e.event {
                CollabEvent::PlaybackChanged { change, .. } => Some(change.clone()),
                _ => None,
            })
            .collect();

        assert_eq!(playback.len(), 1, "One notification per audible change");
        assert_eq!(playback[0].active_track_ref, Some(track("a")));
        assert!(playback[0].anchor_instant.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_ignored() {
        let harness = Harness::new();
        let registry = QueueRegistry::new(&harness.context);
        let room_id = harness.room.id;

        assert!(registry.add_song(room_id, 1, track("a")).await.unwrap());
        assert!(!registry.add_song(room_id, 2, track("a")).await.unwrap());

        assert_eq!(harness.database.all_queue_rows(room_id).len(), 1);
    }

    #[tokio::test]
    async fn test_flush_is_idempotent() {
        let harness = Harness::new();
        let registry = QueueRegistry::new(&harness.context);
        let room_id = harness.room.id;

        registry.add_song(room_id, 1, track("a")).await.unwrap();
        registry.add_song(room_id, 1, track("b")).await.unwrap();
        registry.upvote(room_id, 2, &track("b")).await.unwrap();
        registry.downvote(room_id, 3, &track("b")).await.unwrap();
        registry.play(room_id).await.unwrap();

        let first = registry.flush(room_id).await.unwrap();
        let second = registry.flush(room_id).await.unwrap();

        assert!(first.is_empty(), "Every mutation was already flushed");
        assert!(second.is_empty());
        assert_eq!(harness.database.all_queue_rows(room_id).len(), 2);
        assert_eq!(harness.database.all_votes().len(), 2);
    }

    #[tokio::test]
    async fn test_state_survives_a_restart() {
        let harness = Harness::new();
        let registry = QueueRegistry::new(&harness.context);
        let room_id = harness.room.id;

        registry.add_song(room_id, 1, track("a")).await.unwrap();
        registry.add_song(room_id, 2, track("b")).await.unwrap();
        registry.add_song(room_id, 2, track("c")).await.unwrap();
        registry.upvote(room_id, 3, &track("b")).await.unwrap();
        registry.downvote(room_id, 3, &track("c")).await.unwrap();
        registry.swap_vote(room_id, 3, &track("c")).await.unwrap();
        registry.play(room_id).await.unwrap();

        let before = registry.get_queue_state(room_id).await.unwrap();

        harness.clock.advance(Duration::seconds(10));
        let (context, _events) = harness.restarted();
        let restored = QueueRegistry::new(&context);
        let after = restored.get_queue_state(room_id).await.unwrap();

        assert_eq!(after.status, PlaybackStatus::Playing);
        assert_eq!(after.playback, before.playback, "Same song, same anchor");
        assert_eq!(upcoming_refs(&after), upcoming_refs(&before));
        assert_eq!(after.votes, before.votes, "Only the latest vote counts");
        assert_eq!(
            after.upcoming.iter().map(|s| s.song.enqueued_by).collect::<Vec<_>>(),
            before.upcoming.iter().map(|s| s.song.enqueued_by).collect::<Vec<_>>(),
        );
        assert!(after.upcoming.iter().all(|s| s.song.metadata.is_some()));
    }

    #[tokio::test]
    async fn test_played_songs_are_finished_in_storage() {
        let harness = Harness::new();
        let registry = QueueRegistry::new(&harness.context);
        let room_id = harness.room.id;

        registry.add_song(room_id, 1, track("a")).await.unwrap();
        registry.add_song(room_id, 1, track("b")).await.unwrap();
        registry.play(room_id).await.unwrap();
        registry.skip(room_id).await.unwrap();

        let rows = harness.database.all_queue_rows(room_id);
        let a = rows.iter().find(|r| r.track_ref == track("a")).unwrap();
        let b = rows.iter().find(|r| r.track_ref == track("b")).unwrap();

        assert!(a.finished && a.start_time.is_some());
        assert!(!b.finished && b.start_time.is_some(), "b is playing now");
    }

    #[tokio::test]
    async fn test_pause_stores_no_start_time() {
        let harness = Harness::new();
        let registry = QueueRegistry::new(&harness.context);
        let room_id = harness.room.id;

        registry.add_song(room_id, 1, track("a")).await.unwrap();
        registry.play(room_id).await.unwrap();
        registry.pause(room_id).await.unwrap();

        let rows = harness.database.all_queue_rows(room_id);
        assert_eq!(rows[0].start_time, None);

        let (context, _events) = harness.restarted();
        let state = QueueRegistry::new(&context)
            .get_queue_state(room_id)
            .await
            .unwrap();

        assert_eq!(state.status, PlaybackStatus::Stopped);
        assert_eq!(upcoming_refs(&state), vec!["a"], "The paused song is queued again");
    }

    #[tokio::test]
    async fn test_retracted_votes_stay_retracted() {
        let harness = Harness::new();
        let registry = QueueRegistry::new(&harness.context);
        let room_id = harness.room.id;

        registry.add_song(room_id, 1, track("a")).await.unwrap();
        registry.upvote(room_id, 2, &track("a")).await.unwrap();
        registry.retract_vote(room_id, 2, &track("a")).await.unwrap();

        assert!(harness.database.all_votes().is_empty());

        let (context, _events) = harness.restarted();
        let state = QueueRegistry::new(&context)
            .get_queue_state(room_id)
            .await
            .unwrap();

        assert_eq!(state.upcoming[0].song.score, 0);
        assert!(state.votes.is_empty());
    }

    #[tokio::test]
    async fn test_removal_permissions() {
        let harness = Harness::new();
        let registry = QueueRegistry::new(&harness.context);
        let room_id = harness.room.id;

        registry.add_song(room_id, 1, track("a")).await.unwrap();
        registry.add_song(room_id, 1, track("b")).await.unwrap();

        let denied = registry.remove_song(room_id, 2, &track("a")).await;
        assert!(matches!(
            denied,
            Err(CommandError::PermissionDenied { user_id: 2, .. })
        ));

        registry.remove_song(room_id, 1, &track("a")).await.unwrap();
        registry
            .remove_song(room_id, CREATOR, &track("b"))
            .await
            .expect("the room creator may remove any song");

        assert!(harness.database.all_queue_rows(room_id).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_room_is_not_found() {
        let harness = Harness::new();
        let registry = QueueRegistry::new(&harness.context);

        let result = registry.get_queue_state(4040).await;

        assert!(matches!(
            result,
            Err(CommandError::NotFound {
                resource: "room",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_mutation_and_retries() {
        let harness = Harness::new();
        let registry = QueueRegistry::new(&harness.context);
        let room_id = harness.room.id;

        // Hydrate while storage works
        registry.get_queue_state(room_id).await.unwrap();

        harness.database.set_failing(true);
        registry.add_song(room_id, 1, track("a")).await.unwrap();
        registry.upvote(room_id, 2, &track("a")).await.unwrap();

        let state = registry.get_queue_state(room_id).await.unwrap();
        assert_eq!(state.upcoming[0].song.score, 1, "Memory stays the source of truth");

        harness.database.set_failing(false);
        let report = registry.flush(room_id).await.unwrap();

        assert_eq!(report.rows_inserted, 1);
        assert_eq!(report.votes_inserted, 1);
        assert_eq!(harness.database.all_queue_rows(room_id).len(), 1);
    }

    #[tokio::test]
    async fn test_hydration_failure_fails_the_command() {
        let harness = Harness::new();
        let registry = QueueRegistry::new(&harness.context);

        harness.database.set_failing(true);
        let result = registry.add_song(harness.room.id, 1, track("a")).await;

        assert!(matches!(result, Err(CommandError::StorageFailure(_))));
    }

    #[tokio::test]
    async fn test_upstream_failure_only_delays_the_flush() {
        let harness = Harness::with_metadata(FakeMetadataProvider::failing(3));
        let registry = QueueRegistry::new(&harness.context);
        let room_id = harness.room.id;

        assert!(registry.add_song(room_id, 1, track("a")).await.unwrap());
        assert!(harness.database.all_queue_rows(room_id).is_empty());
        assert_eq!(
            harness.metadata.failures_left(),
            2,
            "The flush after a command asks the provider once"
        );

        let report = registry.flush(room_id).await.unwrap();
        assert_eq!(report.rows_inserted, 1);

        let state = registry.get_queue_state(room_id).await.unwrap();
        assert!(state.upcoming[0].song.metadata.is_some());
    }

    #[tokio::test]
    async fn test_known_tracks_are_not_fetched_again() {
        let harness = Harness::new();
        let registry = QueueRegistry::new(&harness.context);
        let room_id = harness.room.id;

        registry.add_song(room_id, 1, track("a")).await.unwrap();
        registry.play(room_id).await.unwrap();
        registry.stop(room_id).await.unwrap();
        registry.add_song(room_id, 1, track("a")).await.unwrap();

        assert_eq!(harness.metadata.requested(), 1);
        assert_eq!(harness.database.all_tracks().len(), 1);
        assert_eq!(harness.database.all_queue_rows(room_id).len(), 2);
    }

    #[tokio::test]
    async fn test_enqueuer_is_inferred_for_legacy_rows() {
        let harness = Harness::new();
        let room_id = harness.room.id;
        let database = &harness.database;
        let now = harness.clock.now();

        let first = database
            .find_or_create_track_record(&crate::metadata::tests::describe(&track("a")))
            .await
            .unwrap();
        let second = database
            .find_or_create_track_record(&crate::metadata::tests::describe(&track("b")))
            .await
            .unwrap();

        let voted = database.seed_legacy_queue_row(room_id, first.id, now);
        database.seed_legacy_queue_row(room_id, second.id, now + Duration::seconds(1));

        database
            .insert_votes(vec![
                VoteData {
                    queue_row_id: voted,
                    user_id: 8,
                    is_upvote: true,
                    cast_at: now + Duration::seconds(3),
                },
                VoteData {
                    queue_row_id: voted,
                    user_id: 7,
                    is_upvote: false,
                    cast_at: now + Duration::seconds(2),
                },
            ])
            .await
            .unwrap();

        let registry = QueueRegistry::new(&harness.context);
        let state = registry.get_queue_state(room_id).await.unwrap();

        let enqueuer = |value: &str| {
            state
                .upcoming
                .iter()
                .find(|s| s.song.track_ref == track(value))
                .map(|s| s.song.enqueued_by)
        };

        assert_eq!(enqueuer("a"), Some(7), "The first voter");
        assert_eq!(enqueuer("b"), Some(CREATOR), "Nobody voted, so the room creator");
    }

    #[tokio::test]
    async fn test_unknown_track_doesnt_hold_back_the_room() {
        let harness = Harness::with_metadata(FakeMetadataProvider::not_knowing(&["bogus"]));
        let registry = QueueRegistry::new(&harness.context);
        let room_id = harness.room.id;

        registry.add_song(room_id, 1, track("a")).await.unwrap();
        registry.add_song(room_id, 1, track("bogus")).await.unwrap();
        registry.add_song(room_id, 1, track("b")).await.unwrap();
        registry.upvote(room_id, 2, &track("b")).await.unwrap();
        registry.play(room_id).await.unwrap();

        let rows = harness.database.all_queue_rows(room_id);
        let playing = rows.iter().find(|r| r.track_ref == track("b")).unwrap();

        assert_eq!(rows.len(), 2, "Every song but the unknown one is stored");
        assert!(playing.start_time.is_some(), "The playing song is anchored");
        assert_eq!(harness.database.all_votes().len(), 1);

        let report = registry.flush(room_id).await.unwrap();
        assert_eq!(report.songs_unresolved, 1);
        assert_eq!(report.rows_inserted, 0);

        let (context, _events) = harness.restarted();
        let state = QueueRegistry::new(&context)
            .get_queue_state(room_id)
            .await
            .unwrap();

        assert_eq!(state.status, PlaybackStatus::Playing);
        assert_eq!(state.playback.active_track_ref, Some(track("b")));
        assert_eq!(upcoming_refs(&state), vec!["a"]);
    }

    #[tokio::test]
    async fn test_upstream_failure_writes_the_rest_of_the_room() {
        let harness = Harness::new();
        let registry = QueueRegistry::new(&harness.context);
        let room_id = harness.room.id;

        registry.add_song(room_id, 1, track("a")).await.unwrap();

        *harness.metadata.failures_left.lock() = 10;
        registry.add_song(room_id, 1, track("b")).await.unwrap();
        registry.upvote(room_id, 2, &track("a")).await.unwrap();
        registry.play(room_id).await.unwrap();

        let result = registry.flush(room_id).await;
        assert!(matches!(result, Err(CommandError::UpstreamFailure(_))));

        let rows = harness.database.all_queue_rows(room_id);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].start_time.is_some(), "The playing song is still anchored");
        assert_eq!(harness.database.all_votes().len(), 1);

        *harness.metadata.failures_left.lock() = 0;
        let report = registry.flush(room_id).await.unwrap();

        assert_eq!(report.rows_inserted, 1, "The delayed song is stored once it resolves");
        assert_eq!(harness.database.all_queue_rows(room_id).len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_votes_are_skipped_by_storage() {
        let harness = Harness::new();
        let registry = QueueRegistry::new(&harness.context);
        let room_id = harness.room.id;

        registry.add_song(room_id, 1, track("a")).await.unwrap();
        registry.upvote(room_id, 2, &track("a")).await.unwrap();

        let stored = harness.database.all_votes();
        assert_eq!(stored.len(), 1);

        let inserted = harness
            .database
            .insert_votes(stored.clone())
            .await
            .expect("a duplicate vote is not an error");

        assert_eq!(inserted, 0);
        assert_eq!(harness.database.all_votes(), stored);
    }
}
