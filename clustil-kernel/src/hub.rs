/**
 * BROADCAST HUB - Fan-out of push messages to connected viewers
 *
 * ROLE:
 * Owns the set of open viewer channels. Each channel is the sending half of
 * an unbounded mpsc queue; the HTTP layer drains the other half into an
 * event stream. A message is serialized once and the same `Arc<str>` is
 * handed to every channel.
 *
 * FAILURES:
 * A send fails only when the receiving side is gone. That channel is
 * dropped on the spot and delivery to the others continues.
 *
 * ORDERING:
 * Per channel FIFO (mpsc queue); nothing across channels.
 */

use clustil_protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use uuid::Uuid;

pub type ChannelId = Uuid;
pub type ChannelSender = UnboundedSender<Arc<str>>;
pub type ChannelReceiver = UnboundedReceiver<Arc<str>>;

#[derive(Default)]
pub struct BroadcastHub {
    channels: HashMap<ChannelId, ChannelSender>,
}

fn serialize(message: &ServerMessage) -> Result<Arc<str>, serde_json::Error> {
    Ok(Arc::from(message.encode()?))
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the queue for a new viewer and sends `initial` on it before
    /// any broadcast can, so a fresh viewer never waits for the next tick.
    pub fn register(&mut self, initial: &ServerMessage) -> Result<(ChannelId, ChannelReceiver), serde_json::Error> {
        let payload = serialize(initial)?;
        let (tx, rx) = mpsc::unbounded_channel();
        // rx is alive, the send cannot fail
        let _ = tx.send(payload);
        let id = Uuid::new_v4();
        self.channels.insert(id, tx);
        debug!("channel {id} registered ({} open)", self.channels.len());
        Ok((id, rx))
    }

    pub fn unregister(&mut self, id: &ChannelId) -> bool {
        let removed = self.channels.remove(id).is_some();
        if removed {
            debug!("channel {id} unregistered ({} open)", self.channels.len());
        }
        removed
    }

    /// Returns how many channels the message reached.
    pub fn broadcast(&mut self, message: &ServerMessage) -> Result<usize, serde_json::Error> {
        let payload = serialize(message)?;
        self.channels.retain(|id, sender| {
            let alive = sender.send(Arc::clone(&payload)).is_ok();
            if !alive {
                debug!("dropping dead channel {id}");
            }
            alive
        });
        Ok(self.channels.len())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
