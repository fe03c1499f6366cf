use crossbeam::channel::{unbounded, Receiver, Sender};
use jukebox_core::{Id, PlaybackChange, RoomId};

use crate::{QueueState, QueuedSong, SongVote};

/// Marker for the ids handed out to realtime subscribers.
#[derive(Debug)]
pub struct Subscriber;

/// Identifies one realtime connection, so replies can reach only the client that asked.
pub type ConnectionId = Id<Subscriber>;

pub type EventSender = Sender<TargetedEvent>;
pub type EventReceiver = Receiver<TargetedEvent>;

/// Events emitted by the rooms
#[derive(Debug, Clone)]
pub enum CollabEvent {
    /// The upcoming songs or their votes changed
    QueueChanged {
        room_id: RoomId,
        upcoming: Vec<QueuedSong>,
        votes: Vec<SongVote>,
    },
    /// What is audible in a room changed
    PlaybackChanged {
        room_id: RoomId,
        change: PlaybackChange,
    },
    /// A command could not be carried out
    CommandFailed {
        room_id: RoomId,
        /// A stable, machine readable reason
        reason: &'static str,
        message: String,
    },
    /// The full state of a room, sent in reply to a state request
    QueueState { state: QueueState },
}

/// Who should receive an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    /// Everyone subscribed to the room
    Room(RoomId),
    /// A single connection
    Connection(ConnectionId),
}

#[derive(Debug, Clone)]
pub struct TargetedEvent {
    pub target: EventTarget,
    pub event: CollabEvent,
}

/// Delivers events to connected clients.
pub trait Dispatcher
where
    Self: Send + Sync + 'static,
{
    fn dispatch(&self, target: EventTarget, event: CollabEvent);
}

/// A [Dispatcher] that hands events over to whoever holds the receiving end of a channel.
pub struct ChannelDispatcher {
    sender: EventSender,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, EventReceiver) {
        let (sender, receiver) = unbounded();

        (Self { sender }, receiver)
    }
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch(&self, target: EventTarget, event: CollabEvent) {
        // Nobody is listening, which is fine
        let _ = self.sender.send(TargetedEvent { target, event });
    }
}

impl CollabEvent {
    pub fn room_id(&self) -> RoomId {
        match self {
            Self::QueueChanged { room_id, .. }
            | Self::PlaybackChanged { room_id, .. }
            | Self::CommandFailed { room_id, .. } => *room_id,
            Self::QueueState { state } => state.room.id,
        }
    }
}
