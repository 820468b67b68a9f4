//! Client handles: the outbound sink a session's messages are delivered to.

use std::sync::atomic::{AtomicU64, Ordering};

use lumen_core::ForwardMsg;
use tokio::sync::mpsc;

/// The client endpoint is gone; its session should be closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("session client disconnected")]
pub struct ClientDisconnected;

/// Outbound sink for one connected client.
///
/// The runtime treats this as opaque. Writes happen from the dispatch loop
/// only, one session at a time.
#[cfg_attr(test, mockall::automock)]
pub trait SessionClient: Send + Sync {
    /// Deliver one message. Fails once the endpoint has gone away.
    fn write_forward_msg(&self, msg: ForwardMsg) -> Result<(), ClientDisconnected>;
}

/// Client backed by an unbounded tokio channel.
///
/// A transport task owns the receiver and encodes messages onto the wire.
/// Dropping the receiver is how the transport signals a disconnect.
pub struct ChannelSessionClient {
    tx: mpsc::UnboundedSender<ForwardMsg>,
    sent: AtomicU64,
}

impl ChannelSessionClient {
    /// Create a client and the receiver its messages arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ForwardMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self {
            tx,
            sent: AtomicU64::new(0),
        };
        (client, rx)
    }

    /// Messages delivered so far.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Whether the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl SessionClient for ChannelSessionClient {
    fn write_forward_msg(&self, msg: ForwardMsg) -> Result<(), ClientDisconnected> {
        self.tx.send(msg).map_err(|_| ClientDisconnected)?;
        let _ = self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
