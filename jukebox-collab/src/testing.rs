use std::{sync::Arc, time::Duration};

use chrono::TimeZone;
use chrono::Utc;
use jukebox_core::ManualClock;

use crate::{
    metadata::tests::FakeMetadataProvider, ChannelDispatcher, CollabConfig, CollabContext,
    EventReceiver, MemoryDatabase, RoomData, TargetedEvent,
};

pub const CREATOR: i32 = 100;

/// Everything a test needs to drive the collab system without postgres or network
pub struct Harness {
    pub database: Arc<MemoryDatabase>,
    pub metadata: Arc<FakeMetadataProvider>,
    pub clock: Arc<ManualClock>,
    pub events: EventReceiver,
    pub context: CollabContext,
    pub room: RoomData,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_metadata(FakeMetadataProvider::default())
    }

    pub fn with_metadata(metadata: FakeMetadataProvider) -> Self {
        let database = Arc::new(MemoryDatabase::new());
        let metadata = Arc::new(metadata);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let (dispatcher, events) = ChannelDispatcher::new();

        let room = database.add_room("Listening party", CREATOR);

        let context = CollabContext {
            database: database.clone(),
            metadata: metadata.clone(),
            dispatcher: Arc::new(dispatcher),
            clock: clock.clone(),
            config: CollabConfig {
                metadata_batch_pacing: Duration::ZERO,
                metadata_retry_backoff: Duration::from_millis(1),
                ..Default::default()
            },
        };

        Self {
            database,
            metadata,
            clock,
            events,
            context,
            room,
        }
    }

    /// Context for a second process sharing the same storage, as after a restart
    pub fn restarted(&self) -> (CollabContext, EventReceiver) {
        let (dispatcher, events) = ChannelDispatcher::new();

        let context = CollabContext {
            dispatcher: Arc::new(dispatcher),
            ..self.context.clone()
        };

        (context, events)
    }

    pub fn drain_events(&self) -> Vec<TargetedEvent> {
        self.events.try_iter().collect()
    }
}
