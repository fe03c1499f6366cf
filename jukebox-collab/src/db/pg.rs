use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jukebox_core::{TrackMetadata, TrackRef, UserId};
use sqlx::{
    migrate::Migrator, postgres::PgPoolOptions, query, query_as, query_scalar, Error as SqlxError,
    FromRow, PgPool,
};

use crate::{
    Database, DatabaseError, IntoDatabaseError, NewQueueRow, PrimaryKey, QueueRowData, Result,
    RoomData, TrackRecordData, VoteData,
};

static MIGRATOR: Migrator = sqlx::migrate!("../migrations");

/// A postgres database implementation for jukebox
pub struct PgDatabase {
    pool: PgPool,
}

#[derive(FromRow)]
struct RoomRow {
    id: i32,
    title: String,
    creator_id: i32,
}

#[derive(FromRow)]
struct TrackRow {
    id: i32,
    track_ref: String,
    title: String,
    artists: Vec<String>,
    duration_ms: i64,
    cover_url: Option<String>,
}

#[derive(FromRow)]
struct QueueRow {
    id: i32,
    room_id: i32,
    enqueued_by: Option<i32>,
    insert_time: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    finished: bool,
    track_ref: String,
    title: Option<String>,
    artists: Option<Vec<String>>,
    duration_ms: Option<i64>,
    cover_url: Option<String>,
}

#[derive(FromRow)]
struct VoteRow {
    queue_id: i32,
    user_id: i32,
    is_upvote: bool,
    cast_at: DateTime<Utc>,
}

impl PgDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| e.any())?;

        Ok(Self { pool })
    }

    /// Brings the schema up to date.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn room_by_id(&self, room_id: PrimaryKey) -> Result<RoomData> {
        let row: RoomRow = query_as("SELECT id, title, creator_id FROM rooms WHERE id = $1")
            .bind(room_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("room", "id"))?;

        Ok(RoomData {
            id: row.id,
            title: row.title,
            creator_id: row.creator_id,
        })
    }

    async fn find_active_queue_rows(&self, room_id: PrimaryKey) -> Result<Vec<QueueRowData>> {
        let rows: Vec<QueueRow> = query_as(
            "
            SELECT
                queue.id,
                queue.room_id,
                queue.enqueued_by,
                queue.insert_time,
                queue.start_time,
                queue.finished,
                tracks.track_ref,
                tracks.title,
                tracks.artists,
                tracks.duration_ms,
                tracks.cover_url
            FROM queue
                INNER JOIN tracks ON queue.track_id = tracks.id
            WHERE queue.room_id = $1 AND NOT queue.finished
            ORDER BY queue.insert_time ASC",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(rows.into_iter().map(QueueRowData::from).collect())
    }

    async fn find_votes_for_queue_rows(
        &self,
        queue_row_ids: &[PrimaryKey],
    ) -> Result<Vec<VoteData>> {
        let rows: Vec<VoteRow> = query_as(
            "
            SELECT queue_id, user_id, is_upvote, cast_at
            FROM votes
            WHERE queue_id = ANY($1)
            ORDER BY cast_at ASC",
        )
        .bind(queue_row_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(rows
            .into_iter()
            .map(|r| VoteData {
                queue_row_id: r.queue_id,
                user_id: r.user_id,
                is_upvote: r.is_upvote,
                cast_at: r.cast_at,
            })
            .collect())
    }

    async fn insert_queue_rows(&self, rows: Vec<NewQueueRow>) -> Result<Vec<PrimaryKey>> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;
        let mut ids = Vec::with_capacity(rows.len());

        for row in rows {
            let id: i32 = query_scalar(
                "
                INSERT INTO queue (room_id, track_id, enqueued_by, insert_time, start_time, finished)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id",
            )
            .bind(row.room_id)
            .bind(row.track_id)
            .bind(row.enqueued_by)
            .bind(row.insert_time)
            .bind(row.start_time)
            .bind(row.finished)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| e.any())?;

            ids.push(id);
        }

        tx.commit().await.map_err(|e| e.any())?;
        Ok(ids)
    }

    async fn insert_votes(&self, votes: Vec<VoteData>) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;
        let mut inserted = 0;

        for vote in votes {
            // The unique constraint covers the whole vote, so re-inserting is a no-op
            inserted += query(
                "
                INSERT INTO votes (queue_id, user_id, is_upvote, cast_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (queue_id, user_id, is_upvote, cast_at) DO NOTHING",
            )
            .bind(vote.queue_row_id)
            .bind(vote.user_id)
            .bind(vote.is_upvote)
            .bind(vote.cast_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?
            .rows_affected();
        }

        tx.commit().await.map_err(|e| e.any())?;
        Ok(inserted)
    }

    async fn delete_votes(&self, queue_row_id: PrimaryKey, user_id: UserId) -> Result<()> {
        query("DELETE FROM votes WHERE queue_id = $1 AND user_id = $2")
            .bind(queue_row_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn delete_queue_row(&self, queue_row_id: PrimaryKey) -> Result<()> {
        let result = query("DELETE FROM queue WHERE id = $1")
            .bind(queue_row_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        expect_one_row(result.rows_affected())
    }

    async fn mark_queue_row_finished(&self, queue_row_id: PrimaryKey) -> Result<()> {
        let result = query("UPDATE queue SET finished = true WHERE id = $1")
            .bind(queue_row_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        expect_one_row(result.rows_affected())
    }

    async fn update_queue_row_start_time(
        &self,
        queue_row_id: PrimaryKey,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = query("UPDATE queue SET start_time = $1 WHERE id = $2")
            .bind(start_time)
            .bind(queue_row_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        expect_one_row(result.rows_affected())
    }

    async fn track_records_by_refs(&self, track_refs: &[TrackRef]) -> Result<Vec<TrackRecordData>> {
        let refs: Vec<&str> = track_refs.iter().map(|t| t.as_str()).collect();

        let rows: Vec<TrackRow> = query_as(
            "
            SELECT id, track_ref, title, artists, duration_ms, cover_url
            FROM tracks
            WHERE track_ref = ANY($1)",
        )
        .bind(refs)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(rows.into_iter().map(TrackRecordData::from).collect())
    }

    async fn find_or_create_track_record(&self, metadata: &TrackMetadata) -> Result<TrackRecordData> {
        let row: TrackRow = query_as(
            "
            INSERT INTO tracks (track_ref, title, artists, duration_ms, cover_url)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (track_ref) DO UPDATE SET
                title = EXCLUDED.title,
                artists = EXCLUDED.artists,
                duration_ms = EXCLUDED.duration_ms,
                cover_url = EXCLUDED.cover_url
            RETURNING id, track_ref, title, artists, duration_ms, cover_url",
        )
        .bind(metadata.track_ref.as_str())
        .bind(&metadata.title)
        .bind(&metadata.artists)
        .bind(i64::try_from(metadata.duration_ms).unwrap_or(i64::MAX))
        .bind(&metadata.cover_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(row.into())
    }
}

fn expect_one_row(rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        return Err(DatabaseError::NotFound {
            resource: "queue row",
            identifier: "id",
        });
    }

    Ok(())
}

impl From<TrackRow> for TrackRecordData {
    fn from(row: TrackRow) -> Self {
        Self {
            id: row.id,
            metadata: TrackMetadata {
                track_ref: row.track_ref.into(),
                title: row.title,
                artists: row.artists,
                duration_ms: u64::try_from(row.duration_ms).unwrap_or_default(),
                cover_url: row.cover_url,
            },
        }
    }
}

impl From<QueueRow> for QueueRowData {
    fn from(row: QueueRow) -> Self {
        let track_ref: TrackRef = row.track_ref.into();

        let metadata = row.title.map(|title| TrackMetadata {
            track_ref: track_ref.clone(),
            title,
            artists: row.artists.unwrap_or_default(),
            duration_ms: row
                .duration_ms
                .and_then(|d| u64::try_from(d).ok())
                .unwrap_or_default(),
            cover_url: row.cover_url,
        });

        Self {
            id: row.id,
            room_id: row.room_id,
            track_ref,
            metadata,
            enqueued_by: row.enqueued_by,
            insert_time: row.insert_time,
            start_time: row.start_time,
            finished: row.finished,
        }
    }
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        match self {
            SqlxError::Database(e) if e.is_unique_violation() => DatabaseError::Conflict {
                resource: e.table().map(table_resource).unwrap_or("row"),
                field: "unique key",
                value: e.constraint().unwrap_or_default().to_string(),
            },
            e => DatabaseError::Internal(Box::new(e)),
        }
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => Self::any(e),
        }
    }
}

fn table_resource(table: &str) -> &'static str {
    match table {
        "rooms" => "room",
        "tracks" => "track",
        "queue" => "queue row",
        "votes" => "vote",
        _ => "row",
    }
}
