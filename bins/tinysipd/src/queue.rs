// tinysip - minimal SIP B2BUA signaling server
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bounded inbound message queue shared by the worker pool.
//!
//! Enqueue fails fast when the queue is full; dequeue blocks until a message
//! arrives. The receiver is shared behind an async lock so each message is
//! consumed by exactly one worker.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::transport::InboundMessage;

/// Shared consuming end of the queue. Cloning yields another handle onto the
/// same queue, not a copy of the messages.
#[derive(Clone)]
pub struct MessageQueue {
    rx: Arc<Mutex<mpsc::Receiver<InboundMessage>>>,
}

impl MessageQueue {
    /// Blocks until a message is available. [`None`] once all senders are
    /// dropped and the queue has drained.
    pub async fn recv(&self) -> Option<InboundMessage> {
        self.rx.lock().await.recv().await
    }
}

/// Creates the bounded queue. The sender side is handed to the transport
/// listener; the [`MessageQueue`] is cloned across workers.
pub fn bounded(capacity: usize) -> (mpsc::Sender<InboundMessage>, MessageQueue) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        tx,
        MessageQueue {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}
