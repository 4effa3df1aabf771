//! In-process fanout of chat messages to room subscribers.

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::db::Message;

/// Messages buffered per room before slow subscribers start lagging
const ROOM_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
pub struct RoomHub {
    rooms: DashMap<String, broadcast::Sender<Message>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, room_id: &str) -> broadcast::Receiver<Message> {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Deliver to current subscribers; returns how many received it
    pub fn publish(&self, message: &Message) -> usize {
        let Some(sender) = self.rooms.get(&message.chat_room_id) else {
            return 0;
        };
        let delivered = sender.send(message.clone()).unwrap_or(0);
        debug!(room_id = %message.chat_room_id, delivered, "Published chat message");
        delivered
    }

    /// Drop the channel of a room nobody listens to anymore
    pub fn release(&self, room_id: &str) {
        self.rooms
            .remove_if(room_id, |_, sender| sender.receiver_count() == 0);
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
