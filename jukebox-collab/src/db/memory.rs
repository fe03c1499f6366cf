use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crossbeam::atomic::AtomicCell;
use jukebox_core::{TrackMetadata, TrackRef, UserId};
use parking_lot::Mutex;

use crate::{
    Database, DatabaseError, NewQueueRow, PrimaryKey, QueueRowData, Result, RoomData,
    TrackRecordData, VoteData,
};

/// A database kept entirely in memory, for development and tests.
///
/// It can be told to fail every call, to simulate the store being unavailable.
#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<MemoryState>,
    failing: AtomicCell<bool>,
}

#[derive(Default)]
struct MemoryState {
    next_id: PrimaryKey,
    rooms: HashMap<PrimaryKey, RoomData>,
    tracks: Vec<TrackRecordData>,
    queue: Vec<StoredQueueRow>,
    votes: Vec<VoteData>,
}

#[derive(Debug, Clone)]
struct StoredQueueRow {
    id: PrimaryKey,
    room_id: PrimaryKey,
    track_id: PrimaryKey,
    enqueued_by: Option<UserId>,
    insert_time: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    finished: bool,
}

impl MemoryState {
    fn allocate_id(&mut self) -> PrimaryKey {
        self.next_id += 1;
        self.next_id
    }

    fn track(&self, track_id: PrimaryKey) -> Option<&TrackRecordData> {
        self.tracks.iter().find(|t| t.id == track_id)
    }

    fn row_mut(&mut self, queue_row_id: PrimaryKey) -> Result<&mut StoredQueueRow> {
        self.queue
            .iter_mut()
            .find(|r| r.id == queue_row_id)
            .ok_or(DatabaseError::NotFound {
                resource: "queue row",
                identifier: "id",
            })
    }

    fn to_data(&self, row: &StoredQueueRow) -> QueueRowData {
        let metadata = self.track(row.track_id).map(|t| t.metadata.clone());

        QueueRowData {
            id: row.id,
            room_id: row.room_id,
            track_ref: metadata
                .as_ref()
                .map(|m| m.track_ref.clone())
                .unwrap_or_else(|| TrackRef::new("")),
            metadata,
            enqueued_by: row.enqueued_by,
            insert_time: row.insert_time,
            start_time: row.start_time,
            finished: row.finished,
        }
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a room the queue can be hydrated for.
    pub fn add_room(&self, title: &str, creator_id: UserId) -> RoomData {
        let mut state = self.state.lock();

        let room = RoomData {
            id: state.allocate_id(),
            title: title.to_string(),
            creator_id,
        };

        state.rooms.insert(room.id, room.clone());
        room
    }

    /// Makes every following call fail until turned off again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing)
    }

    /// Inserts a row the way older versions stored them, without recording who queued it.
    pub fn seed_legacy_queue_row(
        &self,
        room_id: PrimaryKey,
        track_id: PrimaryKey,
        insert_time: DateTime<Utc>,
    ) -> PrimaryKey {
        let mut state = self.state.lock();
        let id = state.allocate_id();

        state.queue.push(StoredQueueRow {
            id,
            room_id,
            track_id,
            enqueued_by: None,
            insert_time,
            start_time: None,
            finished: false,
        });

        id
    }

    /// Returns every row of a room, finished or not.
    pub fn all_queue_rows(&self, room_id: PrimaryKey) -> Vec<QueueRowData> {
        let state = self.state.lock();

        state
            .queue
            .iter()
            .filter(|r| r.room_id == room_id)
            .map(|r| state.to_data(r))
            .collect()
    }

    pub fn all_votes(&self) -> Vec<VoteData> {
        self.state.lock().votes.clone()
    }

    pub fn all_tracks(&self) -> Vec<TrackRecordData> {
        self.state.lock().tracks.clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load() {
            return Err(DatabaseError::Internal("storage unavailable".into()));
        }

        Ok(())
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn room_by_id(&self, room_id: PrimaryKey) -> Result<RoomData> {
        self.check()?;

        self.state
            .lock()
            .rooms
            .get(&room_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "room",
                identifier: "id",
            })
    }

    async fn find_active_queue_rows(&self, room_id: PrimaryKey) -> Result<Vec<QueueRowData>> {
        self.check()?;

        let state = self.state.lock();
        let mut rows: Vec<_> = state
            .queue
            .iter()
            .filter(|r| r.room_id == room_id && !r.finished)
            .map(|r| state.to_data(r))
            .collect();

        rows.sort_by_key(|r| r.insert_time);
        Ok(rows)
    }

    async fn find_votes_for_queue_rows(
        &self,
        queue_row_ids: &[PrimaryKey],
    ) -> Result<Vec<VoteData>> {
        self.check()?;

        let mut votes: Vec<_> = self
            .state
            .lock()
            .votes
            .iter()
            .filter(|v| queue_row_ids.contains(&v.queue_row_id))
            .copied()
            .collect();

        votes.sort_by_key(|v| v.cast_at);
        Ok(votes)
    }

    async fn insert_queue_rows(&self, rows: Vec<NewQueueRow>) -> Result<Vec<PrimaryKey>> {
        self.check()?;

        let mut state = self.state.lock();

        if rows.iter().any(|r| state.track(r.track_id).is_none()) {
            return Err(DatabaseError::NotFound {
                resource: "track",
                identifier: "id",
            });
        }

        let ids = rows
            .into_iter()
            .map(|row| {
                let id = state.allocate_id();

                state.queue.push(StoredQueueRow {
                    id,
                    room_id: row.room_id,
                    track_id: row.track_id,
                    enqueued_by: Some(row.enqueued_by),
                    insert_time: row.insert_time,
                    start_time: row.start_time,
                    finished: row.finished,
                });

                id
            })
            .collect();

        Ok(ids)
    }

    async fn insert_votes(&self, votes: Vec<VoteData>) -> Result<u64> {
        self.check()?;

        let mut state = self.state.lock();
        let mut inserted = 0;

        for vote in votes {
            if !state.votes.contains(&vote) {
                state.votes.push(vote);
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    async fn delete_votes(&self, queue_row_id: PrimaryKey, user_id: UserId) -> Result<()> {
        self.check()?;

        self.state
            .lock()
            .votes
            .retain(|v| !(v.queue_row_id == queue_row_id && v.user_id == user_id));

        Ok(())
    }

    async fn delete_queue_row(&self, queue_row_id: PrimaryKey) -> Result<()> {
        self.check()?;

        let mut state = self.state.lock();
        state.row_mut(queue_row_id)?;

        state.queue.retain(|r| r.id != queue_row_id);
        state.votes.retain(|v| v.queue_row_id != queue_row_id);

        Ok(())
    }

    async fn mark_queue_row_finished(&self, queue_row_id: PrimaryKey) -> Result<()> {
        self.check()?;

        self.state.lock().row_mut(queue_row_id)?.finished = true;
        Ok(())
    }

    async fn update_queue_row_start_time(
        &self,
        queue_row_id: PrimaryKey,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.check()?;

        self.state.lock().row_mut(queue_row_id)?.start_time = start_time;
        Ok(())
    }

    async fn track_records_by_refs(&self, track_refs: &[TrackRef]) -> Result<Vec<TrackRecordData>> {
        self.check()?;

        Ok(self
            .state
            .lock()
            .tracks
            .iter()
            .filter(|t| track_refs.contains(&t.metadata.track_ref))
            .cloned()
            .collect())
    }

    async fn find_or_create_track_record(&self, metadata: &TrackMetadata) -> Result<TrackRecordData> {
        self.check()?;

        let mut state = self.state.lock();

        if let Some(existing) = state
            .tracks
            .iter_mut()
            .find(|t| t.metadata.track_ref == metadata.track_ref)
        {
            existing.metadata = metadata.clone();
            return Ok(existing.clone());
        }

        let record = TrackRecordData {
            id: state.allocate_id(),
            metadata: metadata.clone(),
        };

        state.tracks.push(record.clone());
        Ok(record)
    }
}
