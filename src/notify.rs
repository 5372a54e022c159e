use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 1024;

/// Fan-out of committed store events to in-process listeners (the mailer,
/// tests). Events are sent after they are durable in the WAL.
pub struct NotifyHub {
    sender: broadcast::Sender<Event>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        let _ = self.sender.send(event.clone());
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}
