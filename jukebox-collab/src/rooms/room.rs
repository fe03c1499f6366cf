use jukebox_core::{RoomId, RoomQueue};
use parking_lot::Mutex;

use crate::RoomData;

/// A room whose queue is resident in memory.
pub struct ActiveRoom {
    data: RoomData,
    queue: Mutex<RoomQueue>,
    /// Held for the whole of a flush, so two flushes of one room never interleave
    pub(crate) flush_lock: tokio::sync::Mutex<()>,
}

impl ActiveRoom {
    pub fn new(data: RoomData, queue: RoomQueue) -> Self {
        Self {
            data,
            queue: Mutex::new(queue),
            flush_lock: Default::default(),
        }
    }

    pub fn id(&self) -> RoomId {
        self.data.id
    }

    pub fn data(&self) -> &RoomData {
        &self.data
    }

    /// Returns a copy of the queue as it is right now.
    pub fn snapshot(&self) -> RoomQueue {
        self.queue.lock().clone()
    }

    /// Applies a change to the queue.
    ///
    /// If the change fails, the queue is put back exactly as it was before.
    pub fn mutate<T, E, F>(&self, change: F) -> Result<T, E>
    where
        F: FnOnce(&mut RoomQueue) -> Result<T, E>,
    {
        let mut queue = self.queue.lock();
        let before = queue.clone();

        let result = change(&mut queue);

        if result.is_err() {
            *queue = before;
        }

        result
    }

    /// Runs `f` with the live queue, for attaching information that doesn't change its meaning.
    pub(crate) fn with_queue<T>(&self, f: impl FnOnce(&mut RoomQueue) -> T) -> T {
        f(&mut self.queue.lock())
    }
}
