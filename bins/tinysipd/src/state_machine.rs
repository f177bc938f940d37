// tinysip - minimal SIP B2BUA signaling server
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The per-dialog call state machine and B2BUA signaling engine.
//!
//! Every event is `(leg, kind)` where the leg is derived from which dialog id
//! matched the inbound Call-ID. A lookup miss means no call exists: only an
//! INVITE starts a new dialog, everything else is logged and dropped. The
//! engine synthesizes outbound requests and responses for the opposite leg
//! from the stored per-leg headers, and reclaims the call slot once both
//! sides have quiesced.
//!
//! State diagram (events not listed leave the state unchanged):
//!
//! ```text
//! Idle --INVITE/A--> Routing --180/B--> Ringing
//! Routing|Ringing --2xx/B--> Answered --ACK/A--> Connected
//! Routing|Ringing --4xx..6xx/B--> Idle (released)
//! Routing|Ringing --CANCEL/A--> Disconnecting
//! Connected --BYE/either--> Disconnecting --200 of BYE|CANCEL--> Idle
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use sip_scan::{forwarded_max_forwards, Kind, Method, Scan, DEFAULT_MAX_FORWARDS};
use smol_str::SmolStr;
use tracing::{info, warn};

use crate::builder::{self, EchoHeaders};
use crate::call::{derive_b_leg_uuid, Call, CallMap, CallState, Leg, LegHeaders};
use crate::config::{ServerConfig, MAX_CALLS};
use crate::location::{LocationEntry, LocationTable};
use crate::transport::SipSender;

/// The B2BUA engine: call map, location service, outbound transport and the
/// process-wide CSeq counter for self-originated requests.
pub struct Engine {
    calls: CallMap,
    locations: LocationTable,
    sender: Arc<dyn SipSender>,
    config: ServerConfig,
    cseq: AtomicU32,
}

impl Engine {
    pub fn new(
        config: ServerConfig,
        users: Vec<LocationEntry>,
        sender: Arc<dyn SipSender>,
    ) -> Self {
        Self::with_call_capacity(config, users, sender, MAX_CALLS)
    }

    pub fn with_call_capacity(
        config: ServerConfig,
        users: Vec<LocationEntry>,
        sender: Arc<dyn SipSender>,
        capacity: usize,
    ) -> Self {
        Self {
            calls: CallMap::new(capacity),
            locations: LocationTable::new(users),
            sender,
            config,
            cseq: AtomicU32::new(1),
        }
    }

    pub fn calls(&self) -> &CallMap {
        &self.calls
    }

    pub fn locations(&self) -> &LocationTable {
        &self.locations
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn next_cseq(&self) -> u32 {
        self.cseq.fetch_add(1, Ordering::Relaxed)
    }

    /// Logs and transmits one outbound message.
    pub async fn send(&self, payload: String, peer: SocketAddr) {
        info!(%peer, "tx sip message\n{}", payload);
        self.sender.send(&payload, peer).await;
    }

    /// Entry point for every non-REGISTER message.
    pub async fn on_event(&self, msg: &Scan, text: &str, peer: SocketAddr) {
        let call_id = msg.call_id.as_deref().unwrap_or("");
        match self.calls.find_by_callid(call_id) {
            None => {
                if matches!(msg.kind, Kind::Request(Method::Invite)) {
                    self.initial_invite(msg, text, peer).await;
                } else {
                    warn!(
                        call_id,
                        kind = ?msg.kind,
                        "unexpected message, the call may have already been released"
                    );
                }
            }
            Some((handle, leg)) => {
                let mut call = handle.lock().await;
                // Keep the callee's To (and its tag) current for later
                // requests towards the B leg.
                if leg == Leg::B {
                    if let Some(to) = msg.lines.to.as_ref() {
                        call.b_leg_headers.to = to.clone();
                    }
                }
                info!(call = call.index, state = ?call.state, ?leg, kind = ?msg.kind, "processing event");
                match call.state {
                    CallState::Routing | CallState::Ringing => {
                        self.routing_or_ringing(&mut call, msg, text, peer, leg).await
                    }
                    CallState::Answered => self.answered(&mut call, msg, leg).await,
                    CallState::Connected => self.connected(&mut call, msg, peer, leg).await,
                    CallState::Disconnecting => self.disconnecting(&mut call, msg).await,
                    CallState::Idle => {
                        warn!(call = call.index, "event for an idle slot, dropped")
                    }
                }
            }
        }
    }

    /// Initial INVITE: allocate a slot, derive the two dialog ids, answer
    /// `100 Trying` and synthesize the INVITE towards the callee.
    async fn initial_invite(&self, msg: &Scan, text: &str, peer: SocketAddr) {
        let (Some(via), Some(from), Some(to), Some(cseq), Some(call_id_line), Some(call_id)) = (
            msg.lines.via.as_deref(),
            msg.lines.from.as_deref(),
            msg.lines.to.as_deref(),
            msg.lines.cseq.as_deref(),
            msg.lines.call_id.as_deref(),
            msg.call_id.as_deref(),
        ) else {
            warn!(%peer, "INVITE missing dialog headers, discarded");
            return;
        };

        let via = builder::rewrite_via(via, peer);
        let echo = EchoHeaders {
            via: &via,
            from,
            to,
            call_id: call_id_line,
            cseq,
        };

        let Some(handle) = self.calls.allocate() else {
            warn!("call map exhausted, rejecting INVITE");
            self.send(builder::server_response("500 Server Internal Error", &echo), peer)
                .await;
            return;
        };
        let mut call = handle.lock().await;

        call.a_leg_uuid = SmolStr::new(call_id);
        call.b_leg_uuid = derive_b_leg_uuid(call_id);
        call.a_leg_addr = Some(peer);
        call.a_leg_headers = LegHeaders {
            from: SmolStr::new(from),
            via: SmolStr::new(&via),
            cseq: SmolStr::new(cseq),
            to: SmolStr::new(to),
        };
        call.a_leg_contact = msg
            .lines
            .contact
            .as_deref()
            .and_then(sip_scan::angle_uri)
            .map(SmolStr::new)
            .unwrap_or_default();
        call.caller = sip_scan::user_from_uri(from)
            .map(SmolStr::new)
            .unwrap_or_default();

        let callee = sip_scan::callee_from_to_line(to);
        let location = callee.and_then(|user| self.locations.lookup(user));
        let Some(location) = location else {
            warn!(callee = callee.unwrap_or(""), "location not found, rejecting INVITE");
            self.send(builder::server_response("404 Not Found", &echo), peer)
                .await;
            self.release_call(&mut call);
            return;
        };
        info!(username = %location.username, addr = %location.addr(), "resolved callee location");

        call.callee = location.username.clone();
        call.b_leg_addr = Some(location.addr());
        call.a_leg_media.remote_media = true;
        call.b_leg_media.local_media = true;

        self.calls
            .bind(call.index, call.a_leg_uuid.clone(), call.b_leg_uuid.clone());

        self.send(builder::server_response("100 Trying", &echo), peer)
            .await;

        call.b_leg_headers = LegHeaders {
            via: SmolStr::new(builder::fresh_via(self.config.advertised)),
            from: SmolStr::new(from),
            cseq: SmolStr::new(format!("CSeq: {} INVITE", self.next_cseq())),
            to: SmolStr::new(format!("To: <sip:{}@{};ob>", call.callee, location.addr())),
        };

        match msg.body_offset {
            Some(offset) => {
                let invite = builder::invite_to_b(
                    &call,
                    location.addr(),
                    forwarded_max_forwards(msg.max_forwards),
                    self.config.advertised,
                    &text[offset..],
                );
                self.send(invite, location.addr()).await;
            }
            None => warn!(
                call = call.index,
                "INVITE carried no SDP body, nothing forwarded to callee"
            ),
        }

        call.state = CallState::Routing;
        info!(call = call.index, "state transitioned to Routing");
    }

    async fn routing_or_ringing(
        &self,
        call: &mut Call,
        msg: &Scan,
        text: &str,
        peer: SocketAddr,
        leg: Leg,
    ) {
        match (&msg.kind, leg) {
            (Kind::Request(Method::Cancel), Leg::A) => {
                if let Some(echo) = EchoHeaders::from_lines(&msg.lines) {
                    self.send(builder::server_response("200 OK", &echo), peer).await;
                }
                if let Some(a_addr) = call.a_leg_addr {
                    self.send(builder::terminal_to_a("487 Request Terminated", call), a_addr)
                        .await;
                }
                if let Some(b_addr) = call.b_leg_addr {
                    let cseq = sip_scan::cseq_number(&call.b_leg_headers.cseq).unwrap_or(1);
                    let cancel = builder::cancel_to_b(
                        call,
                        b_addr,
                        cseq,
                        forwarded_max_forwards(msg.max_forwards),
                    );
                    self.send(cancel, b_addr).await;
                }
                call.state = CallState::Disconnecting;
                info!(call = call.index, "state transitioned to Disconnecting");
            }
            (Kind::Status(183), Leg::B) => {
                self.forward_progress(call, "183 Session Progress", msg, text).await;
            }
            (Kind::Status(180), Leg::B) => {
                self.forward_progress(call, "180 Ringing", msg, text).await;
                call.state = CallState::Ringing;
                info!(call = call.index, "state transitioned to Ringing");
            }
            (Kind::Status(200..=299), Leg::B) => {
                if let Some(contact) = msg.lines.contact.as_deref().and_then(sip_scan::angle_uri) {
                    call.b_leg_contact = SmolStr::new(contact);
                }
                self.forward_progress(call, "200 OK", msg, text).await;
                call.state = CallState::Answered;
                info!(call = call.index, "state transitioned to Answered");
            }
            (Kind::Status(code @ 100..=199), Leg::B) => {
                info!(call = call.index, code = %code, "provisional response, nothing to do");
            }
            (Kind::Status(code @ 400..=699), Leg::B) => {
                if let Some(b_addr) = call.b_leg_addr {
                    let ack = builder::ack_to_b(
                        call,
                        b_addr,
                        msg.cseq_number.unwrap_or(1),
                        self.config.advertised,
                        DEFAULT_MAX_FORWARDS,
                    );
                    self.send(ack, b_addr).await;
                }
                if let Some(a_addr) = call.a_leg_addr {
                    self.send(builder::terminal_to_a(&code.to_string(), call), a_addr)
                        .await;
                }
                self.release_call(call);
            }
            _ => warn!(
                call = call.index,
                state = ?call.state,
                ?leg,
                kind = ?msg.kind,
                "unexpected event, dropped"
            ),
        }
    }

    async fn answered(&self, call: &mut Call, msg: &Scan, leg: Leg) {
        match (&msg.kind, leg) {
            (Kind::Request(Method::Ack), Leg::A) => {
                if let Some(b_addr) = call.b_leg_addr {
                    let cseq = sip_scan::cseq_number(&call.b_leg_headers.cseq).unwrap_or(1);
                    let ack = builder::ack_to_b(
                        call,
                        b_addr,
                        cseq,
                        self.config.advertised,
                        forwarded_max_forwards(msg.max_forwards),
                    );
                    self.send(ack, b_addr).await;
                }
                call.state = CallState::Connected;
                info!(call = call.index, "state transitioned to Connected");
            }
            // TODO: release both legs when CANCEL races the 200 OK.
            (Kind::Request(Method::Cancel), Leg::A) => {
                warn!(call = call.index, "CANCEL while Answered is not handled, both legs stay up");
            }
            // TODO: release both legs when the callee hangs up before the
            // caller's ACK arrives.
            (Kind::Request(Method::Bye), Leg::B) => {
                warn!(call = call.index, "BYE from callee while Answered is not handled");
            }
            _ => warn!(
                call = call.index,
                ?leg,
                kind = ?msg.kind,
                "unexpected event while Answered, dropped"
            ),
        }
    }

    async fn connected(&self, call: &mut Call, msg: &Scan, peer: SocketAddr, leg: Leg) {
        if !matches!(msg.kind, Kind::Request(Method::Bye)) {
            warn!(
                call = call.index,
                ?leg,
                kind = ?msg.kind,
                "unexpected event while Connected, dropped"
            );
            return;
        }

        if let Some(echo) = EchoHeaders::from_lines(&msg.lines) {
            self.send(builder::plain_response("200 OK", &echo), peer).await;
        }

        match leg {
            Leg::A => {
                if let Some(b_addr) = call.b_leg_addr {
                    call.b_leg_headers.via = SmolStr::new(builder::fresh_via(self.config.advertised));
                    let bye = builder::bye_to_b(call, b_addr, self.next_cseq());
                    self.send(bye, b_addr).await;
                }
            }
            Leg::B => {
                if let Some(a_addr) = call.a_leg_addr {
                    call.a_leg_headers.via = SmolStr::new(builder::fresh_via(self.config.advertised));
                    let bye = builder::bye_to_a(call, self.next_cseq());
                    self.send(bye, a_addr).await;
                }
            }
        }

        call.state = CallState::Disconnecting;
        info!(call = call.index, "state transitioned to Disconnecting");
    }

    async fn disconnecting(&self, call: &mut Call, msg: &Scan) {
        match msg.kind {
            Kind::Status(200) => {
                let cseq = msg.lines.cseq.as_deref().unwrap_or("");
                if cseq.contains("BYE") || cseq.contains("CANCEL") {
                    info!(call = call.index, "teardown acknowledged, releasing call");
                    self.release_call(call);
                } else {
                    warn!(call = call.index, cseq, "200 without BYE/CANCEL while Disconnecting");
                }
            }
            _ => warn!(
                call = call.index,
                kind = ?msg.kind,
                "unexpected event while Disconnecting, dropped"
            ),
        }
    }

    /// Forwards a B-leg call-progress response to the A-leg and records any
    /// observed media.
    async fn forward_progress(&self, call: &mut Call, reason: &str, msg: &Scan, text: &str) {
        if let Some(a_addr) = call.a_leg_addr {
            let body = msg.body_offset.map(|offset| &text[offset..]);
            let reply = builder::progress_to_a(reason, call, self.config.advertised, body);
            self.send(reply, a_addr).await;
        }
        if msg.has_sdp {
            call.a_leg_media.local_media = true;
            call.b_leg_media.remote_media = true;
        }
    }

    /// Terminal transition: reinitialize the slot and drop it from the map.
    fn release_call(&self, call: &mut Call) {
        let index = call.index;
        call.reset();
        self.calls.release(index);
        info!(call = index, "state transitioned to Idle, slot released");
    }
}
