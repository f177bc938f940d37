// tinysip - minimal SIP B2BUA signaling server
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! UDP transport: the receive loop feeding the message queue and the
//! outbound send seam.
//!
//! Sends go through the [`SipSender`] trait so the engine can be driven by a
//! capturing implementation in tests. The production sender opens a fresh
//! ephemeral socket per message.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::MAX_DATAGRAM;

/// One received datagram with its source transport address.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub payload: Bytes,
    pub peer: SocketAddr,
}

/// Outbound message sink. Send failures are logged, never retried and never
/// surfaced to the state machine.
#[async_trait]
pub trait SipSender: Send + Sync {
    async fn send(&self, payload: &str, peer: SocketAddr);
}

/// Production sender: one ephemeral UDP socket per message.
pub struct UdpSender;

#[async_trait]
impl SipSender for UdpSender {
    async fn send(&self, payload: &str, peer: SocketAddr) {
        let bind = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        match UdpSocket::bind(bind).await {
            Ok(socket) => {
                if let Err(err) = socket.send_to(payload.as_bytes(), peer).await {
                    warn!(%err, %peer, "udp send failed");
                }
            }
            Err(err) => warn!(%err, %peer, "could not open send socket"),
        }
    }
}

/// Receive loop: reads datagrams into fixed-size buffers and enqueues them.
/// Malformed or empty datagrams are dropped; a full queue drops the datagram
/// with a warning. Returns only when the queue is closed.
pub async fn run_udp(socket: Arc<UdpSocket>, tx: mpsc::Sender<InboundMessage>) -> Result<()> {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((0, peer)) => debug!(%peer, "dropping empty datagram"),
            Ok((len, peer)) => {
                let message = InboundMessage {
                    payload: Bytes::copy_from_slice(&buf[..len]),
                    peer,
                };
                match tx.try_send(message) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(%peer, "inbound queue full, dropping datagram");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        return Err(anyhow!("inbound queue closed"));
                    }
                }
            }
            Err(err) => warn!(%err, "udp receive error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listener_enqueues_datagrams_with_source_address() {
        let server = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let server_addr = server.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(run_udp(server, tx));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"OPTIONS sip:x SIP/2.0\r\n\r\n", server_addr).await.unwrap();

        let message = rx.recv().await.expect("datagram");
        assert_eq!(message.peer, client.local_addr().unwrap());
        assert!(message.payload.starts_with(b"OPTIONS"));
    }

    #[tokio::test]
    async fn udp_sender_delivers_to_peer() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = receiver.local_addr().unwrap();

        UdpSender.send("SIP/2.0 100 Trying\r\n\r\n", peer).await;

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert!(buf[..len].starts_with(b"SIP/2.0 100 Trying"));
    }
}
