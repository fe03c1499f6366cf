use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use jukebox_core::{PlaybackState, RoomQueue, RoomSong, SongKey, TrackRef, UserId, Vote};
use log::{debug, info, warn};

use crate::{
    fetch_in_batches, ActiveRoom, CollabContext, CommandError, DatabaseError, DatabaseResult,
    MetadataError, NewQueueRow, PrimaryKey, QueueRowData, RoomData, TrackRecordData, VoteData,
};

/// How hard a flush tries to get metadata for tracks it hasn't stored yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Right after a command, in the pipeline. Each metadata batch is requested once.
    Inline,
    /// Explicit and shutdown flushes. Failed metadata batches are retried with back-off.
    Thorough,
}

impl FlushMode {
    fn metadata_attempts(self, context: &CollabContext) -> u32 {
        match self {
            Self::Inline => 1,
            Self::Thorough => context.config.metadata_retry_attempts,
        }
    }
}

/// What a flush had to write
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub rows_inserted: usize,
    pub rows_updated: usize,
    pub rows_finished: usize,
    pub rows_deleted: usize,
    pub votes_inserted: u64,
    pub votes_deleted: usize,
    /// Songs left unstored because their track couldn't be described
    pub songs_unresolved: usize,
}

impl FlushReport {
    /// Storage already matched memory
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Track records for the songs being stored, and why some may be missing
struct ResolvedTracks {
    records: HashMap<TrackRef, TrackRecordData>,
    error: Option<MetadataError>,
}

/// How a song's row should look once flushed
struct DesiredRow<'a> {
    song: &'a RoomSong,
    start_time: Option<DateTime<Utc>>,
    finished: bool,
}

fn desired_rows(queue: &RoomQueue) -> Vec<DesiredRow<'_>> {
    let upcoming = queue.upcoming().iter().map(|song| DesiredRow {
        song,
        start_time: None,
        finished: false,
    });

    // A paused song has no running clock, so it is stored without a start time
    let active = match queue.playback() {
        PlaybackState::Stopped => None,
        PlaybackState::Playing { song } => Some(DesiredRow {
            song,
            start_time: song.playback_started_at(),
            finished: false,
        }),
        PlaybackState::Paused { song, .. } => Some(DesiredRow {
            song,
            start_time: None,
            finished: false,
        }),
    };

    let history = queue.history().iter().map(|song| DesiredRow {
        song,
        start_time: song.playback_started_at(),
        finished: true,
    });

    upcoming.chain(active).chain(history).collect()
}

/// Rebuilds a room's queue from storage.
pub(crate) async fn hydrate(
    context: &CollabContext,
    room: &RoomData,
) -> Result<RoomQueue, DatabaseError> {
    let database = &context.database;

    let rows = database.find_active_queue_rows(room.id).await?;
    let row_ids: Vec<_> = rows.iter().map(|r| r.id).collect();

    let votes = if row_ids.is_empty() {
        vec![]
    } else {
        database.find_votes_for_queue_rows(&row_ids).await?
    };

    let mut votes_by_row: HashMap<PrimaryKey, Vec<Vote>> = HashMap::new();
    for vote in votes {
        votes_by_row.entry(vote.queue_row_id).or_default().push(Vote {
            user_id: vote.user_id,
            is_upvote: vote.is_upvote,
            cast_at: vote.cast_at,
        });
    }

    let songs: Vec<_> = rows
        .into_iter()
        .map(|row| {
            let votes = votes_by_row.remove(&row.id).unwrap_or_default();
            let enqueued_by = infer_enqueuer(&row, &votes, room);

            let mut song = RoomSong::restore(
                row.track_ref,
                enqueued_by,
                row.insert_time,
                row.start_time,
                row.id,
                votes,
            );

            if let Some(metadata) = row.metadata {
                song.set_metadata(metadata);
            }

            song
        })
        .collect();

    let queue = RoomQueue::restore(room.id, songs, context.clock.now());

    info!(
        "Hydrated room {} with {} upcoming and {} played songs",
        room.title,
        queue.upcoming().len(),
        queue.history().len() + usize::from(queue.active_song().is_some())
    );

    Ok(queue)
}

/// Works out who queued a song, for rows that don't record it.
fn infer_enqueuer(row: &QueueRowData, votes: &[Vote], room: &RoomData) -> UserId {
    if let Some(user_id) = row.enqueued_by {
        return user_id;
    }

    match votes.iter().min_by_key(|v| v.cast_at) {
        Some(vote) => {
            debug!(
                "Queue row {} has no enqueuer, assuming its first voter {}",
                row.id, vote.user_id
            );
            vote.user_id
        }
        None => {
            warn!(
                "Queue row {} has no enqueuer or votes, assuming the room creator {}",
                row.id, room.creator_id
            );
            room.creator_id
        }
    }
}

/// Brings storage in line with the in-memory queue of a room.
///
/// Only differences are written, so flushing an unchanged room writes nothing.
/// Row ids and metadata learned along the way are attached to the in-memory songs.
///
/// A song whose track can't be described stays unstored until a later flush, and
/// the rest of the room is written regardless. If the metadata provider failed,
/// that is returned once everything else has been written.
pub(crate) async fn persist(
    context: &CollabContext,
    room: &ActiveRoom,
    mode: FlushMode,
) -> Result<FlushReport, CommandError> {
    let _flushing = room.flush_lock.lock().await;

    let database = &context.database;
    let room_id = room.id();
    let snapshot = room.snapshot();
    let desired = desired_rows(&snapshot);

    let mut report = FlushReport::default();

    let stored: HashMap<PrimaryKey, QueueRowData> = database
        .find_active_queue_rows(room_id)
        .await?
        .into_iter()
        .map(|r| (r.id, r))
        .collect();

    let mut row_ids: HashMap<SongKey, PrimaryKey> = desired
        .iter()
        .filter_map(|d| d.song.queue_row_id().map(|id| (d.song.key(), id)))
        .collect();

    let known: HashSet<PrimaryKey> = row_ids.values().copied().collect();

    // Songs that have never been stored
    let new_songs: Vec<_> = desired
        .iter()
        .filter(|d| d.song.queue_row_id().is_none())
        .collect();

    let mut upstream_error = None;

    if !new_songs.is_empty() {
        let resolved = ensure_tracks(context, &new_songs, mode).await?;
        let tracks = resolved.records;
        upstream_error = resolved.error;

        let mut storable = Vec::with_capacity(new_songs.len());
        let mut new_rows = Vec::with_capacity(new_songs.len());

        for d in &new_songs {
            let Some(track) = tracks.get(d.song.track_ref()) else {
                warn!(
                    "Track {} in room {} has no metadata yet, its song is not stored",
                    d.song.track_ref(),
                    room_id
                );
                report.songs_unresolved += 1;
                continue;
            };

            storable.push(d.song.key());
            new_rows.push(NewQueueRow {
                room_id,
                track_id: track.id,
                enqueued_by: d.song.enqueued_by(),
                insert_time: d.song.insert_time(),
                start_time: d.start_time,
                finished: d.finished,
            });
        }

        let assigned: HashMap<SongKey, PrimaryKey> = if new_rows.is_empty() {
            HashMap::new()
        } else {
            let ids = database.insert_queue_rows(new_rows).await?;
            storable.into_iter().zip(ids).collect()
        };

        report.rows_inserted = assigned.len();

        // Recorded before anything else can fail, so these rows are never inserted twice
        room.with_queue(|queue| {
            queue.update_songs(|song| {
                if song.queue_row_id().is_none() {
                    if let Some(id) = assigned.get(&song.key()) {
                        song.set_queue_row_id(*id);
                    }
                }

                if song.metadata().is_none() {
                    if let Some(track) = tracks.get(song.track_ref()) {
                        song.set_metadata(track.metadata.clone());
                    }
                }
            })
        });

        row_ids.extend(assigned);
    }

    for d in &desired {
        let Some(id) = d.song.queue_row_id() else {
            continue;
        };

        // Already finished, nothing left to change
        let Some(row) = stored.get(&id) else {
            continue;
        };

        if row.start_time != d.start_time {
            database.update_queue_row_start_time(id, d.start_time).await?;
            report.rows_updated += 1;
        }

        if d.finished {
            database.mark_queue_row_finished(id).await?;
            report.rows_finished += 1;
        }
    }

    // Removed from memory, so removed from the queue
    for id in stored.keys().filter(|id| !known.contains(id)) {
        match database.delete_queue_row(*id).await {
            Ok(()) | Err(DatabaseError::NotFound { .. }) => report.rows_deleted += 1,
            Err(e) => return Err(e.into()),
        }
    }

    let (votes_inserted, votes_deleted) = persist_votes(context, &desired, &row_ids).await?;
    report.votes_inserted = votes_inserted;
    report.votes_deleted = votes_deleted;

    if report.is_empty() {
        debug!("Room {} is already up to date", room_id);
    } else {
        info!("Flushed room {}: {:?}", room_id, report);
    }

    match upstream_error {
        Some(e) => Err(e.into()),
        None => Ok(report),
    }
}

/// Inserts votes storage doesn't have yet, and deletes the ones retracted since.
async fn persist_votes(
    context: &CollabContext,
    desired: &[DesiredRow<'_>],
    row_ids: &HashMap<SongKey, PrimaryKey>,
) -> Result<(u64, usize), CommandError> {
    let database = &context.database;

    let ids: Vec<_> = row_ids.values().copied().collect();
    if ids.is_empty() {
        return Ok((0, 0));
    }

    // Storage keeps every vote ever cast, only the latest per user counts
    let mut latest: HashMap<(PrimaryKey, UserId), VoteData> = HashMap::new();
    for vote in database.find_votes_for_queue_rows(&ids).await? {
        latest
            .entry((vote.queue_row_id, vote.user_id))
            .and_modify(|existing| {
                if vote.cast_at >= existing.cast_at {
                    *existing = vote
                }
            })
            .or_insert(vote);
    }

    let mut in_memory = HashSet::new();
    let mut to_insert = vec![];

    for d in desired {
        let Some(&queue_row_id) = row_ids.get(&d.song.key()) else {
            continue;
        };

        for vote in d.song.votes() {
            let data = VoteData {
                queue_row_id,
                user_id: vote.user_id,
                is_upvote: vote.is_upvote,
                cast_at: vote.cast_at,
            };

            in_memory.insert((queue_row_id, vote.user_id));

            if latest.get(&(queue_row_id, vote.user_id)) != Some(&data) {
                to_insert.push(data);
            }
        }
    }

    let inserted = if to_insert.is_empty() {
        0
    } else {
        database.insert_votes(to_insert).await?
    };

    let retracted: Vec<_> = latest
        .keys()
        .filter(|key| !in_memory.contains(*key))
        .copied()
        .collect();

    for (queue_row_id, user_id) in &retracted {
        database.delete_votes(*queue_row_id, *user_id).await?;
    }

    Ok((inserted, retracted.len()))
}

/// Makes sure every track the new songs refer to is stored, fetching metadata for unknown ones.
///
/// Tracks the provider doesn't describe are missing from the result.
async fn ensure_tracks(
    context: &CollabContext,
    new_songs: &[&DesiredRow<'_>],
    mode: FlushMode,
) -> Result<ResolvedTracks, CommandError> {
    let database = &context.database;

    let mut refs: Vec<TrackRef> = new_songs
        .iter()
        .map(|d| d.song.track_ref().clone())
        .collect();
    refs.sort();
    refs.dedup();

    let mut tracks: HashMap<_, _> = database
        .track_records_by_refs(&refs)
        .await?
        .into_iter()
        .map(|t| (t.metadata.track_ref.clone(), t))
        .collect();

    let mut metadata = vec![];
    let mut unknown = vec![];

    for track_ref in refs.iter().filter(|r| !tracks.contains_key(*r)) {
        let cached = new_songs
            .iter()
            .filter(|d| d.song.track_ref() == track_ref)
            .find_map(|d| d.song.metadata());

        match cached {
            Some(m) => metadata.push(m.clone()),
            None => unknown.push(track_ref.clone()),
        }
    }

    let mut error = None;

    if !unknown.is_empty() {
        debug!("Fetching metadata for {} new tracks", unknown.len());

        let attempts = mode.metadata_attempts(context);
        let fetched =
            fetch_in_batches(context.metadata.as_ref(), &unknown, &context.config, attempts).await;

        metadata.extend(fetched.tracks);
        error = fetched.error;
    }

    let mut conflicted = vec![];

    for m in metadata {
        match database.find_or_create_track_record(&m).await.skip_conflict()? {
            Some(record) => {
                tracks.insert(record.metadata.track_ref.clone(), record);
            }
            None => conflicted.push(m.track_ref),
        }
    }

    // Someone else stored these first
    if !conflicted.is_empty() {
        for record in database.track_records_by_refs(&conflicted).await? {
            tracks.insert(record.metadata.track_ref.clone(), record);
        }
    }

    Ok(ResolvedTracks {
        records: tracks,
        error,
    })
}
