// tinysip - minimal SIP B2BUA signaling server
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Outbound SIP message formatting.
//!
//! Messages are assembled purely from stored header strings: a start line,
//! each header line followed by CRLF, then either `Content-Length: 0` and a
//! blank line or an echoed body copied verbatim from the original datagram
//! (starting at its `Content-Type:` header, which carries its own
//! `Content-Length` and terminating blank line).

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use sip_scan::HeaderLines;

use crate::call::Call;
use crate::config::{CONTACT_USER, REGISTER_EXPIRES, USER_AGENT};

/// The five header lines echoed into responses built from an inbound request.
pub struct EchoHeaders<'a> {
    pub via: &'a str,
    pub from: &'a str,
    pub to: &'a str,
    pub call_id: &'a str,
    pub cseq: &'a str,
}

impl<'a> EchoHeaders<'a> {
    /// All five captures must be present to answer a request in kind.
    pub fn from_lines(lines: &'a HeaderLines) -> Option<EchoHeaders<'a>> {
        Some(EchoHeaders {
            via: lines.via.as_deref()?,
            from: lines.from.as_deref()?,
            to: lines.to.as_deref()?,
            call_id: lines.call_id.as_deref()?,
            cseq: lines.cseq.as_deref()?,
        })
    }
}

fn push_line(buf: &mut String, line: &str) {
    buf.push_str(line);
    buf.push_str("\r\n");
}

fn finish_empty(buf: &mut String) {
    buf.push_str("Content-Length: 0\r\n\r\n");
}

/// `Via` header for a self-originated request, with a fresh branch.
pub fn fresh_via(advertised: SocketAddr) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    format!("Via: SIP/2.0/UDP {advertised};branch=z9hG4bK{now:x}")
}

/// The server's own `Contact` header line.
pub fn server_contact(advertised: SocketAddr) -> String {
    format!("Contact: <sip:{CONTACT_USER}@{advertised}>")
}

/// Response echoing the inbound request's headers, without a `User-Agent`
/// (REGISTER replies and the 200 OK answering a BYE).
pub fn plain_response(reason: &str, echo: &EchoHeaders<'_>) -> String {
    let mut buf = String::new();
    push_line(&mut buf, &format!("SIP/2.0 {reason}"));
    push_line(&mut buf, echo.via);
    push_line(&mut buf, echo.from);
    push_line(&mut buf, echo.to);
    push_line(&mut buf, echo.call_id);
    push_line(&mut buf, echo.cseq);
    finish_empty(&mut buf);
    buf
}

/// Response echoing the inbound request's headers, stamped with the server
/// `User-Agent` (100 Trying, 500, the 404 answering an INVITE, the 200
/// answering a CANCEL).
pub fn server_response(reason: &str, echo: &EchoHeaders<'_>) -> String {
    let mut buf = String::new();
    push_line(&mut buf, &format!("SIP/2.0 {reason}"));
    push_line(&mut buf, echo.via);
    push_line(&mut buf, echo.from);
    push_line(&mut buf, echo.to);
    push_line(&mut buf, echo.call_id);
    push_line(&mut buf, echo.cseq);
    push_line(&mut buf, &format!("User-Agent: {USER_AGENT}"));
    finish_empty(&mut buf);
    buf
}

/// Successful REGISTER response: every capture echoed, with the registration
/// lifetime appended to the echoed `Contact`.
pub fn register_ok(echo: &EchoHeaders<'_>, contact: Option<&str>) -> String {
    let mut buf = String::new();
    push_line(&mut buf, "SIP/2.0 200 OK");
    push_line(&mut buf, echo.via);
    push_line(&mut buf, echo.from);
    push_line(&mut buf, echo.to);
    push_line(&mut buf, echo.call_id);
    push_line(&mut buf, echo.cseq);
    if let Some(contact) = contact {
        push_line(&mut buf, &format!("{contact};expires={REGISTER_EXPIRES}"));
    }
    finish_empty(&mut buf);
    buf
}

/// Call-progress response forwarded to the A-leg (183/180/200): stored A-leg
/// headers, the A-leg dialog id, the server `Contact`, and the B-leg body
/// verbatim when one was present.
pub fn progress_to_a(
    reason: &str,
    call: &Call,
    advertised: SocketAddr,
    body: Option<&str>,
) -> String {
    let mut buf = String::new();
    push_line(&mut buf, &format!("SIP/2.0 {reason}"));
    push_line(&mut buf, &call.a_leg_headers.via);
    push_line(&mut buf, &call.a_leg_headers.from);
    push_line(&mut buf, &call.a_leg_headers.to);
    push_line(&mut buf, &format!("Call-ID: {}", call.a_leg_uuid));
    push_line(&mut buf, &call.a_leg_headers.cseq);
    push_line(&mut buf, &format!("User-Agent: {USER_AGENT}"));
    push_line(&mut buf, &server_contact(advertised));
    match body {
        Some(body) => buf.push_str(body),
        None => finish_empty(&mut buf),
    }
    buf
}

/// Terminal response to the A-leg (487 after CANCEL, or a forwarded
/// 4xx/5xx/6xx): stored A-leg headers, no body.
pub fn terminal_to_a(reason: &str, call: &Call) -> String {
    let mut buf = String::new();
    push_line(&mut buf, &format!("SIP/2.0 {reason}"));
    push_line(&mut buf, &call.a_leg_headers.via);
    push_line(&mut buf, &call.a_leg_headers.from);
    push_line(&mut buf, &call.a_leg_headers.to);
    push_line(&mut buf, &format!("Call-ID: {}", call.a_leg_uuid));
    push_line(&mut buf, &call.a_leg_headers.cseq);
    push_line(&mut buf, &format!("User-Agent: {USER_AGENT}"));
    finish_empty(&mut buf);
    buf
}

/// The synthesized INVITE to the callee, with the caller's body copied
/// verbatim from its `Content-Type:` position.
pub fn invite_to_b(
    call: &Call,
    b_addr: SocketAddr,
    max_forwards: u32,
    advertised: SocketAddr,
    body: &str,
) -> String {
    let mut buf = String::new();
    push_line(
        &mut buf,
        &format!("INVITE sip:{}@{b_addr} SIP/2.0", call.callee),
    );
    push_line(&mut buf, &call.b_leg_headers.via);
    push_line(&mut buf, &call.b_leg_headers.from);
    push_line(&mut buf, &call.b_leg_headers.to);
    push_line(&mut buf, &format!("Call-ID: {}", call.b_leg_uuid));
    push_line(&mut buf, &format!("User-Agent: {USER_AGENT}"));
    push_line(&mut buf, &call.b_leg_headers.cseq);
    push_line(&mut buf, &format!("Max-Forwards: {max_forwards}"));
    push_line(&mut buf, &server_contact(advertised));
    buf.push_str(body);
    buf
}

/// ACK to the B-leg, with a fresh `Via` branch.
pub fn ack_to_b(
    call: &Call,
    b_addr: SocketAddr,
    cseq_number: u32,
    advertised: SocketAddr,
    max_forwards: u32,
) -> String {
    let mut buf = String::new();
    push_line(&mut buf, &format!("ACK sip:{}@{b_addr} SIP/2.0", call.callee));
    push_line(&mut buf, &fresh_via(advertised));
    push_line(&mut buf, &call.b_leg_headers.from);
    push_line(&mut buf, &call.b_leg_headers.to);
    push_line(&mut buf, &format!("Call-ID: {}", call.b_leg_uuid));
    push_line(&mut buf, &format!("CSeq: {cseq_number} ACK"));
    push_line(&mut buf, &format!("User-Agent: {USER_AGENT}"));
    push_line(&mut buf, &format!("Max-Forwards: {max_forwards}"));
    finish_empty(&mut buf);
    buf
}

/// CANCEL to the B-leg, reusing the stored B-leg `Via` of the pending INVITE.
pub fn cancel_to_b(call: &Call, b_addr: SocketAddr, cseq_number: u32, max_forwards: u32) -> String {
    let mut buf = String::new();
    push_line(
        &mut buf,
        &format!("CANCEL sip:{}@{b_addr} SIP/2.0", call.callee),
    );
    push_line(&mut buf, &call.b_leg_headers.via);
    push_line(&mut buf, &call.b_leg_headers.from);
    push_line(&mut buf, &call.b_leg_headers.to);
    push_line(&mut buf, &format!("Call-ID: {}", call.b_leg_uuid));
    push_line(&mut buf, &format!("User-Agent: {USER_AGENT}"));
    push_line(&mut buf, &format!("CSeq: {cseq_number} CANCEL"));
    push_line(&mut buf, &format!("Max-Forwards: {max_forwards}"));
    finish_empty(&mut buf);
    buf
}

/// BYE to the B-leg. The caller regenerates the stored B-leg `Via` first.
pub fn bye_to_b(call: &Call, b_addr: SocketAddr, cseq_number: u32) -> String {
    let mut buf = String::new();
    push_line(&mut buf, &format!("BYE sip:{}@{b_addr} SIP/2.0", call.callee));
    push_line(&mut buf, &call.b_leg_headers.via);
    push_line(&mut buf, &call.b_leg_headers.from);
    push_line(&mut buf, &call.b_leg_headers.to);
    push_line(&mut buf, &format!("Call-ID: {}", call.b_leg_uuid));
    push_line(&mut buf, &format!("CSeq: {cseq_number} BYE"));
    push_line(&mut buf, &format!("User-Agent: {USER_AGENT}"));
    finish_empty(&mut buf);
    buf
}

/// BYE to the A-leg: Request-URI is the caller's Contact URI, and the stored
/// A-leg `From`/`To` swap roles in their full `;tag=` forms.
pub fn bye_to_a(call: &Call, cseq_number: u32) -> String {
    let from_value = call
        .a_leg_headers
        .from
        .strip_prefix("From: ")
        .unwrap_or(&call.a_leg_headers.from);
    let to_value = call
        .a_leg_headers
        .to
        .strip_prefix("To: ")
        .unwrap_or(&call.a_leg_headers.to);

    let mut buf = String::new();
    push_line(&mut buf, &format!("BYE {} SIP/2.0", call.a_leg_contact));
    push_line(&mut buf, &call.a_leg_headers.via);
    push_line(&mut buf, &format!("From: {to_value}"));
    push_line(&mut buf, &format!("To: {from_value}"));
    push_line(&mut buf, &format!("Call-ID: {}", call.a_leg_uuid));
    push_line(&mut buf, &format!("CSeq: {cseq_number} BYE"));
    push_line(&mut buf, &format!("User-Agent: {USER_AGENT}"));
    finish_empty(&mut buf);
    buf
}

/// Rewrites an inbound `Via` for storage: appends `;received=<source-ip>`,
/// and when the header carries an `rport` parameter, substitutes
/// `;rport=<source-port>` in place, preserving everything after the replaced
/// token.
pub fn rewrite_via(via_line: &str, source: SocketAddr) -> String {
    let mut segments = via_line.split(';');
    let mut rebuilt = String::new();
    if let Some(first) = segments.next() {
        rebuilt.push_str(first.trim_end());
    }
    let mut saw_rport = false;
    for segment in segments {
        let trimmed = segment.trim();
        if trimmed.is_empty() {
            continue;
        }
        rebuilt.push(';');
        if trimmed == "rport" || trimmed.starts_with("rport=") {
            rebuilt.push_str(&format!("rport={};received={}", source.port(), source.ip()));
            saw_rport = true;
        } else {
            rebuilt.push_str(trimmed);
        }
    }
    if !saw_rport {
        rebuilt.push_str(&format!(";received={}", source.ip()));
    }
    rebuilt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{derive_b_leg_uuid, Call, LegHeaders};
    use smol_str::SmolStr;

    fn echo() -> EchoHeaders<'static> {
        EchoHeaders {
            via: "Via: SIP/2.0/UDP 10.0.0.5:5062;branch=z9hG4bKreg",
            from: "From: <sip:1001@example.com>;tag=reg",
            to: "To: <sip:1001@example.com>",
            call_id: "Call-ID: reg-1@example.com",
            cseq: "CSeq: 1 REGISTER",
        }
    }

    fn connected_call() -> Call {
        let mut call = Call::default();
        call.a_leg_uuid = SmolStr::new("flow-001@example.com");
        call.b_leg_uuid = derive_b_leg_uuid("flow-001@example.com");
        call.callee = SmolStr::new("1002");
        call.a_leg_contact = SmolStr::new("sip:1001@10.0.0.1:5060");
        call.a_leg_headers = LegHeaders {
            from: SmolStr::new("From: <sip:1001@example.com>;tag=aaa"),
            via: SmolStr::new("Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK1;received=10.0.0.1"),
            cseq: SmolStr::new("CSeq: 1 INVITE"),
            to: SmolStr::new("To: <sip:1002@example.com>;tag=bbb"),
        };
        call.b_leg_headers = LegHeaders {
            from: SmolStr::new("From: <sip:1001@example.com>;tag=aaa"),
            via: SmolStr::new("Via: SIP/2.0/UDP 10.0.0.254:5060;branch=z9hG4bKabc"),
            cseq: SmolStr::new("CSeq: 9 INVITE"),
            to: SmolStr::new("To: <sip:1002@10.0.0.2:5070;ob>;tag=ccc"),
        };
        call
    }

    fn advertised() -> std::net::SocketAddr {
        "10.0.0.254:5060".parse().unwrap()
    }

    #[test]
    fn plain_response_echoes_all_five_headers() {
        let reply = plain_response("404 Not Found", &echo());
        assert_eq!(
            reply,
            "SIP/2.0 404 Not Found\r\n\
Via: SIP/2.0/UDP 10.0.0.5:5062;branch=z9hG4bKreg\r\n\
From: <sip:1001@example.com>;tag=reg\r\n\
To: <sip:1001@example.com>\r\n\
Call-ID: reg-1@example.com\r\n\
CSeq: 1 REGISTER\r\n\
Content-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn server_response_adds_user_agent() {
        let reply = server_response("100 Trying", &echo());
        assert!(reply.contains("User-Agent: TinySIP\r\n"));
        assert!(reply.ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn register_ok_appends_expiry_to_contact() {
        let reply = register_ok(&echo(), Some("Contact: <sip:1001@10.0.0.5:5062>"));
        assert!(reply.contains("Contact: <sip:1001@10.0.0.5:5062>;expires=7200\r\n"));
        let without = register_ok(&echo(), None);
        assert!(!without.contains("Contact"));
    }

    #[test]
    fn progress_forwards_body_verbatim() {
        let body = "Content-Type: application/sdp\r\nContent-Length: 4\r\n\r\nsdp!";
        let reply = progress_to_a("180 Ringing", &connected_call(), advertised(), Some(body));
        assert!(reply.starts_with("SIP/2.0 180 Ringing\r\n"));
        assert!(reply.contains("Call-ID: flow-001@example.com\r\n"));
        assert!(reply.contains("Contact: <sip:TinySIP@10.0.0.254:5060>\r\n"));
        assert!(reply.ends_with(body));
        assert!(!reply.contains("Content-Length: 0"));
    }

    #[test]
    fn progress_without_body_closes_with_zero_length() {
        let reply = progress_to_a("183 Session Progress", &connected_call(), advertised(), None);
        assert!(reply.ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn invite_to_b_uses_b_leg_dialog() {
        let call = connected_call();
        let body = "Content-Type: application/sdp\r\nContent-Length: 3\r\n\r\nv=0";
        let invite = invite_to_b(&call, "10.0.0.2:5070".parse().unwrap(), 69, advertised(), body);
        assert!(invite.starts_with("INVITE sip:1002@10.0.0.2:5070 SIP/2.0\r\n"));
        assert!(invite.contains("Call-ID: b-leg001@example.com\r\n"));
        assert!(invite.contains("CSeq: 9 INVITE\r\n"));
        assert!(invite.contains("Max-Forwards: 69\r\n"));
        assert!(invite.ends_with(body));
    }

    #[test]
    fn ack_to_b_mints_fresh_branch() {
        let ack = ack_to_b(&connected_call(), "10.0.0.2:5070".parse().unwrap(), 9, advertised(), 70);
        assert!(ack.starts_with("ACK sip:1002@10.0.0.2:5070 SIP/2.0\r\n"));
        assert!(ack.contains("Via: SIP/2.0/UDP 10.0.0.254:5060;branch=z9hG4bK"));
        assert!(ack.contains("CSeq: 9 ACK\r\n"));
        assert!(ack.ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn bye_to_a_swaps_from_and_to_with_tags() {
        let bye = bye_to_a(&connected_call(), 12);
        assert!(bye.starts_with("BYE sip:1001@10.0.0.1:5060 SIP/2.0\r\n"));
        assert!(bye.contains("From: <sip:1002@example.com>;tag=bbb\r\n"));
        assert!(bye.contains("To: <sip:1001@example.com>;tag=aaa\r\n"));
        assert!(bye.contains("CSeq: 12 BYE\r\n"));
    }

    #[test]
    fn rewrite_via_appends_received_without_rport() {
        let via = "Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK776";
        let rewritten = rewrite_via(via, "10.0.0.1:5060".parse().unwrap());
        assert_eq!(
            rewritten,
            "Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK776;received=10.0.0.1"
        );
    }

    #[test]
    fn rewrite_via_substitutes_rport_in_place() {
        let via = "Via: SIP/2.0/UDP 10.0.0.1:5060;rport;branch=z9hG4bK776";
        let rewritten = rewrite_via(via, "10.0.0.1:49152".parse().unwrap());
        assert_eq!(
            rewritten,
            "Via: SIP/2.0/UDP 10.0.0.1:5060;rport=49152;received=10.0.0.1;branch=z9hG4bK776"
        );
    }

    #[test]
    fn fresh_via_carries_magic_cookie_branch() {
        let via = fresh_via(advertised());
        assert!(via.starts_with("Via: SIP/2.0/UDP 10.0.0.254:5060;branch=z9hG4bK"));
    }
}
