//! Ordered outbound message buffer for one session.

use std::collections::VecDeque;

use lumen_core::ForwardMsg;
use parking_lot::Mutex;

#[derive(Default)]
struct QueueInner {
    msgs: VecDeque<ForwardMsg>,
    closed: bool,
}

/// FIFO of messages waiting for the next dispatch pass.
///
/// Many producers may [`enqueue`](Self::enqueue) while one consumer
/// [`flush`](Self::flush)es. Each message is returned by exactly one flush.
/// Once closed, the queue drops whatever it holds and rejects new messages.
#[derive(Default)]
pub struct ForwardMsgQueue {
    inner: Mutex<QueueInner>,
}

impl ForwardMsgQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Returns `false` if the queue is closed.
    pub fn enqueue(&self, msg: ForwardMsg) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        inner.msgs.push_back(msg);
        true
    }

    /// Take every buffered message in enqueue order.
    pub fn flush(&self) -> Vec<ForwardMsg> {
        let mut inner = self.inner.lock();
        inner.msgs.drain(..).collect()
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.inner.lock().msgs.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().msgs.is_empty()
    }

    /// Close the queue and discard its contents.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.msgs.clear();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
