// tinysip - minimal SIP B2BUA signaling server
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! REGISTER handling.
//!
//! Resolves the username from the `From:` URI, overwrites the location
//! record's transport address with the observed source address and answers
//! `200 OK` with the registration lifetime appended to the echoed `Contact`.
//! Unknown usernames get `404 Not Found`. Credentials are not checked; the
//! digest authentication scaffolding in the location records is future work.

use std::net::SocketAddr;

use sip_scan::Scan;
use tracing::{info, warn};

use crate::builder::{self, EchoHeaders};
use crate::state_machine::Engine;

pub async fn handle_register(engine: &Engine, msg: &Scan, peer: SocketAddr) {
    let Some(echo) = EchoHeaders::from_lines(&msg.lines) else {
        warn!(%peer, "REGISTER missing required headers, discarded");
        return;
    };
    let Some(username) = msg.lines.from.as_deref().and_then(sip_scan::user_from_uri) else {
        warn!(%peer, "REGISTER without a sip user in From, discarded");
        return;
    };

    match engine.locations().register(username, peer) {
        Some(entry) => {
            info!(username = %entry.username, addr = %entry.addr(), "user registered");
            let reply = builder::register_ok(&echo, msg.lines.contact.as_deref());
            engine.send(reply, peer).await;
        }
        None => {
            info!(username, "user not found, sending 404");
            engine.send(builder::plain_response("404 Not Found", &echo), peer)
                .await;
        }
    }
}
