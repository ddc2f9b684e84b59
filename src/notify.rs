use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::BookingUpdate;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for booking status changes, one channel per booking.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<BookingUpdate>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a booking's updates. Creates the channel if needed.
    pub fn subscribe(&self, booking_id: Ulid) -> broadcast::Receiver<BookingUpdate> {
        let sender = self
            .channels
            .entry(booking_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. A channel whose receivers are all gone is dropped.
    pub fn send(&self, update: BookingUpdate) {
        let booking_id = update.booking_id;
        let orphaned = match self.channels.get(&booking_id) {
            Some(sender) => sender.send(update).is_err(),
            None => false,
        };
        if orphaned {
            self.channels
                .remove_if(&booking_id, |_, sender| sender.receiver_count() == 0);
        }
    }

    /// Drop every channel nobody listens to anymore. Returns how many went.
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        before.saturating_sub(self.channels.len())
    }

    /// Drop the channel once nobody can care anymore (terminal status).
    pub fn remove(&self, booking_id: &Ulid) {
        self.channels.remove(booking_id);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
