use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use jukebox_collab::{
    ChannelDispatcher, Collab, CollabConfig, CollabContext, MemoryDatabase, MetadataError,
    RoomData, TrackMetadataProvider,
};
use jukebox_core::{ManualClock, TrackMetadata, TrackRef};

use crate::{context::ServerContext, sse::ServerSentEvents};

/// Names every track after its reference
struct EchoMetadata;

#[async_trait]
impl TrackMetadataProvider for EchoMetadata {
    async fn fetch_many(
        &self,
        track_refs: &[TrackRef],
    ) -> Result<Vec<TrackMetadata>, MetadataError> {
        Ok(track_refs
            .iter()
            .map(|track_ref| TrackMetadata {
                track_ref: track_ref.clone(),
                title: track_ref.to_string(),
                artists: vec![],
                duration_ms: 1000,
                cover_url: None,
            })
            .collect())
    }
}

/// A server context backed by memory, with one room in it
pub struct TestServer {
    pub context: ServerContext,
    pub clock: Arc<ManualClock>,
    pub room: RoomData,
}

impl TestServer {
    /// Must be called from within a tokio runtime
    pub fn new() -> Self {
        let database = Arc::new(MemoryDatabase::new());
        let room = database.add_room("Test room", 1);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let (dispatcher, _events) = ChannelDispatcher::new();

        let collab = Collab::new(CollabContext {
            database,
            metadata: Arc::new(EchoMetadata),
            dispatcher: Arc::new(dispatcher),
            clock: clock.clone(),
            config: CollabConfig::default(),
        });

        Self {
            context: ServerContext {
                collab: Arc::new(collab),
                sse: ServerSentEvents::new(),
            },
            clock,
            room,
        }
    }
}
