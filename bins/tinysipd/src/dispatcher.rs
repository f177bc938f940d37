// tinysip - minimal SIP B2BUA signaling server
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Worker-side routing of inbound datagrams.
//!
//! Each worker drains the shared queue, scans the datagram and routes it:
//! REGISTER to the registrar, other requests to the state machine, and
//! responses only when their `CSeq` names INVITE, CANCEL or BYE. A fuller
//! stack would hand the remaining responses to their client transactions.

use std::sync::Arc;

use sip_scan::{Kind, Method};
use tracing::{debug, info};

use crate::queue::MessageQueue;
use crate::registrar;
use crate::state_machine::Engine;
use crate::transport::InboundMessage;

/// Worker loop: runs until the queue is closed and drained.
pub async fn run_worker(engine: Arc<Engine>, queue: MessageQueue) {
    while let Some(message) = queue.recv().await {
        process_message(&engine, message).await;
    }
}

/// Scans and routes one datagram. Unscannable payloads are dropped.
pub async fn process_message(engine: &Engine, message: InboundMessage) {
    let Some(msg) = sip_scan::scan(&message.payload) else {
        debug!(peer = %message.peer, "discarding unscannable datagram");
        return;
    };
    let Ok(text) = std::str::from_utf8(&message.payload) else {
        return;
    };
    info!(peer = %message.peer, "rx sip message\n{}", text);

    match &msg.kind {
        Kind::Request(Method::Register) => {
            registrar::handle_register(engine, &msg, message.peer).await;
        }
        Kind::Request(_) => engine.on_event(&msg, text, message.peer).await,
        Kind::Status(code) => {
            let Some(cseq) = msg.lines.cseq.as_deref() else {
                info!(code = %code, "response without CSeq, discarded");
                return;
            };
            if cseq.contains("INVITE") || cseq.contains("CANCEL") || cseq.contains("BYE") {
                engine.on_event(&msg, text, message.peer).await;
            } else {
                info!(code = %code, cseq, "response not for INVITE/CANCEL/BYE, discarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{seed_users, ServerConfig};
    use crate::transport::SipSender;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::net::SocketAddr;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, SocketAddr)>>,
    }

    impl RecordingSender {
        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SipSender for RecordingSender {
        async fn send(&self, payload: &str, peer: SocketAddr) {
            self.sent.lock().unwrap().push((payload.to_owned(), peer));
        }
    }

    fn engine() -> (Arc<RecordingSender>, Engine) {
        let sender = Arc::new(RecordingSender::default());
        let config = ServerConfig {
            advertised: "10.0.0.254:5060".parse().unwrap(),
        };
        (
            sender.clone(),
            Engine::new(config, seed_users("10.0.0.254"), sender),
        )
    }

    fn inbound(payload: &str, peer: &str) -> InboundMessage {
        InboundMessage {
            payload: Bytes::copy_from_slice(payload.as_bytes()),
            peer: peer.parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn garbage_datagrams_are_dropped() {
        let (sender, engine) = engine();
        process_message(&engine, inbound("not sip at all", "10.0.0.1:5060")).await;
        process_message(&engine, inbound("", "10.0.0.1:5060")).await;
        assert_eq!(sender.count(), 0);
    }

    #[tokio::test]
    async fn responses_for_other_methods_are_discarded() {
        let (sender, engine) = engine();
        let payload = "SIP/2.0 200 OK\r\n\
Via: SIP/2.0/UDP 10.0.0.2:5070;branch=z9hG4bK9\r\n\
Call-ID: opts@example.com\r\n\
CSeq: 4 OPTIONS\r\n\r\n";
        process_message(&engine, inbound(payload, "10.0.0.2:5070")).await;
        assert_eq!(sender.count(), 0);
    }

    #[tokio::test]
    async fn register_requests_reach_the_registrar() {
        let (sender, engine) = engine();
        let payload = "REGISTER sip:example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP 10.0.0.5:5062;branch=z9hG4bKreg\r\n\
From: <sip:1001@example.com>;tag=r1\r\n\
To: <sip:1001@example.com>\r\n\
Call-ID: reg-1@example.com\r\n\
CSeq: 1 REGISTER\r\n\
Contact: <sip:1001@10.0.0.5:5062>\r\n\
Content-Length: 0\r\n\r\n";
        process_message(&engine, inbound(payload, "10.0.0.5:5062")).await;
        assert_eq!(sender.count(), 1);
        assert!(engine.locations().lookup("1001").unwrap().registered);
    }
}
