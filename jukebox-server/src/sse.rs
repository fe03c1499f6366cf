use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
    routing::get,
};
use futures_util::Stream;
use jukebox_collab::{CollabEvent, ConnectionId, EventReceiver, EventTarget, TargetedEvent};
use jukebox_core::RoomId;
use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll, Waker},
    thread::{self, JoinHandle},
};
use utoipa::ToSchema;

use crate::{
    context::ServerContext,
    errors::{ErrorBody, ServerResult},
    serialized::{Playback, QueuedSong, RoomState, ToSerialized, Vote},
    Router,
};

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum ServerEvent {
    /// Always the first event of a stream. Commands sent with this id get their failures reported here.
    Connected { connection_id: u64 },
    /// The upcoming songs or their votes changed
    QueueChanged {
        room_id: i32,
        upcoming: Vec<QueuedSong>,
        votes: Vec<Vote>,
    },
    /// What is audible in the room changed
    PlaybackChanged { room_id: i32, playback: Playback },
    /// A command sent with this stream's connection id failed
    CommandFailed {
        room_id: i32,
        reason: String,
        message: String,
    },
    /// The room's full state, in reply to a state request
    QueueState { state: RoomState },
}

impl From<CollabEvent> for ServerEvent {
    fn from(value: CollabEvent) -> Self {
        match value {
            CollabEvent::QueueChanged {
                room_id,
                upcoming,
                votes,
            } => Self::QueueChanged {
                room_id,
                upcoming: upcoming.to_serialized(),
                votes: votes.to_serialized(),
            },
            CollabEvent::PlaybackChanged { room_id, change } => Self::PlaybackChanged {
                room_id,
                playback: change.to_serialized(),
            },
            CollabEvent::CommandFailed {
                room_id,
                reason,
                message,
            } => Self::CommandFailed {
                room_id,
                reason: reason.to_string(),
                message,
            },
            CollabEvent::QueueState { state } => Self::QueueState {
                state: state.to_serialized(),
            },
        }
    }
}

/// Manages server sent event connections
pub struct ServerSentEvents {
    me: Weak<Self>,
    connections: Mutex<Vec<Connection>>,
}

struct Connection {
    id: ConnectionId,
    room_id: RoomId,
    pending_messages: Arc<Mutex<VecDeque<ServerEvent>>>,
    waker: Arc<Mutex<Option<Waker>>>,
}

struct ConnectionHandle {
    id: ConnectionId,
    /// A reference to [Connection]'s pending messages
    pending_messages: Arc<Mutex<VecDeque<ServerEvent>>>,
    /// A reference to [Connection]'s stored [Waker]
    waker: Arc<Mutex<Option<Waker>>>,
    /// Required to remove connection when dropped
    manager: Weak<ServerSentEvents>,
}

impl ServerSentEvents {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            connections: Default::default(),
        })
    }

    /// Delivers an event to the connections it is meant for
    pub fn dispatch(&self, targeted: TargetedEvent) {
        let event = ServerEvent::from(targeted.event);
        let connections = self.connections.lock();

        match targeted.target {
            EventTarget::Room(room_id) => {
                for connection in connections.iter().filter(|c| c.room_id == room_id) {
                    connection.send(event.clone())
                }
            }
            EventTarget::Connection(id) => {
                match connections.iter().find(|c| c.id == id) {
                    Some(connection) => connection.send(event),
                    None => debug!("Dropped event for closed connection {}", id),
                }
            }
        }
    }

    /// Forwards every collab event to the connected clients, until the collab system is dropped
    pub fn forward(self: &Arc<Self>, events: EventReceiver) -> std::io::Result<JoinHandle<()>> {
        let manager = self.clone();

        thread::Builder::new()
            .name("jukebox-events".to_string())
            .spawn(move || {
                for targeted in events.iter() {
                    manager.dispatch(targeted)
                }

                info!("Event forwarding stopped");
            })
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    fn connect(&self, room_id: RoomId) -> ConnectionHandle {
        let connection = Connection::new(room_id);
        let handle = connection.handle(self.me.clone());

        connection.send(ServerEvent::Connected {
            connection_id: connection.id.value(),
        });

        debug!("Connection {} subscribed to room {}", connection.id, room_id);

        self.connections.lock().push(connection);
        handle
    }

    fn disconnect(&self, id: ConnectionId) {
        self.connections.lock().retain(|c| c.id != id)
    }
}

impl Connection {
    fn new(room_id: RoomId) -> Self {
        Self {
            id: ConnectionId::new(),
            room_id,
            pending_messages: Default::default(),
            waker: Default::default(),
        }
    }

    fn send(&self, message: ServerEvent) {
        self.pending_messages.lock().push_back(message);

        if let Some(waker) = self.waker.lock().take() {
            waker.wake()
        }
    }

    fn handle(&self, manager: Weak<ServerSentEvents>) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id,
            pending_messages: self.pending_messages.clone(),
            waker: self.waker.clone(),
            manager,
        }
    }
}

impl ConnectionHandle {
    fn next_message(&self) -> Option<ServerEvent> {
        self.pending_messages.lock().pop_front()
    }
}

impl Stream for ConnectionHandle {
    type Item = Result<Event, axum::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(message) = self.next_message() {
            return Poll::Ready(Some(Event::default().json_data(message)));
        }

        *self.waker.lock() = Some(cx.waker().clone());

        // A message may have arrived before the waker was stored
        match self.next_message() {
            Some(message) => Poll::Ready(Some(Event::default().json_data(message))),
            None => Poll::Pending,
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.disconnect(self.id)
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/rooms/{id}/events",
    tag = "events",
    params(
        ("id" = i32, Path, description = "The room to subscribe to")
    ),
    responses(
        (
            status = 200,
            content_type = "text/event-stream",
            description = "A stream of events from the room",
            body = ServerEvent
        ),
        (status = 404, body = ErrorBody)
    )
)]
async fn event_stream(
    State(context): State<ServerContext>,
    Path(room_id): Path<i32>,
) -> ServerResult<Sse<ConnectionHandle>> {
    // Rejects unknown rooms before subscribing
    context.collab.queue_state(room_id).await?;

    Ok(Sse::new(context.sse.connect(room_id)).keep_alive(KeepAlive::default()))
}

pub fn router() -> Router {
    Router::new().route("/:id/events", get(event_stream))
}
