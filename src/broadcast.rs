//! Outbound peer messaging seam
//!
//! The engine only ever fire-and-forgets `gettradestatus` re-queries and
//! `swapstatus` echoes; the p2p transport behind this trait owns delivery.

use tokio::sync::mpsc;

pub trait Broadcaster: Send + Sync {
    /// Non-blocking send with no acknowledgment.
    fn send(&self, payload: serde_json::Value);
}

/// Channel-backed broadcaster; the transport layer drains the receiver.
pub struct ChannelBroadcaster {
    tx: mpsc::UnboundedSender<serde_json::Value>,
}

impl ChannelBroadcaster {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<serde_json::Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn send(&self, payload: serde_json::Value) {
        if self.tx.send(payload).is_err() {
            log::warn!("outbound transport gone, dropping broadcast");
        }
    }
}

/// Discards every payload; for offline replay and tests.
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn send(&self, _payload: serde_json::Value) {}
}
