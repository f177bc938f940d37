// tinysip - minimal SIP B2BUA signaling server
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tolerant textual SIP scanner.
//!
//! Extracts, by substring search over CRLF-delimited header lines, exactly the
//! fields the call engine consumes: the request method or status code, the
//! `Call-ID`, verbatim header-line captures for `Via`/`From`/`To`/`CSeq`/
//! `Contact`, the `CSeq` sequence number, `Max-Forwards`, and the position of
//! an `application/sdp` body. It is not an RFC 3261 parser: unknown headers
//! are skipped, missing optional headers are tolerated, and anything that does
//! not yield a usable start line is reported as unscannable so the caller can
//! drop the datagram.
//!
//! # Example
//! ```
//! use sip_scan::{scan, Kind, Method};
//! let raw = b"INVITE sip:1002@example.com SIP/2.0\r\n\
//! Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK1\r\n\
//! From: <sip:1001@example.com>;tag=a\r\n\
//! To: <sip:1002@example.com>\r\n\
//! Call-ID: abc@example.com\r\n\
//! CSeq: 1 INVITE\r\n\
//! Content-Length: 0\r\n\r\n";
//! let msg = scan(raw).unwrap();
//! assert!(matches!(msg.kind, Kind::Request(Method::Invite)));
//! assert_eq!(msg.call_id.as_deref(), Some("abc@example.com"));
//! ```

use smol_str::SmolStr;

/// The exact token whose position marks the start of a forwarded body.
pub const SDP_CONTENT_TYPE: &str = "Content-Type: application/sdp";

/// Assumed hop budget when a request carries no `Max-Forwards` header.
pub const DEFAULT_MAX_FORWARDS: u32 = 70;

/// Request methods the engine distinguishes. Everything else is carried as
/// [`Method::Other`] so it can be logged before being dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Register,
    Invite,
    Ack,
    Cancel,
    Bye,
    Options,
    Other(SmolStr),
}

impl Method {
    pub fn from_token(token: &str) -> Method {
        match token {
            "REGISTER" => Method::Register,
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "CANCEL" => Method::Cancel,
            "BYE" => Method::Bye,
            "OPTIONS" => Method::Options,
            other => Method::Other(SmolStr::new(other)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Register => "REGISTER",
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Cancel => "CANCEL",
            Method::Bye => "BYE",
            Method::Options => "OPTIONS",
            Method::Other(token) => token.as_str(),
        }
    }
}

/// Start-line classification: a request with its method, or a response with
/// its numeric status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    Request(Method),
    Status(u16),
}

/// Verbatim header-line captures, including the `Header-Name: ` prefix and
/// excluding the trailing CRLF. These are concatenated directly into outbound
/// messages, so their shape must be preserved.
#[derive(Debug, Clone, Default)]
pub struct HeaderLines {
    pub via: Option<SmolStr>,
    pub from: Option<SmolStr>,
    pub to: Option<SmolStr>,
    pub cseq: Option<SmolStr>,
    pub call_id: Option<SmolStr>,
    pub contact: Option<SmolStr>,
}

/// Everything the engine needs from one datagram.
#[derive(Debug, Clone)]
pub struct Scan {
    pub kind: Kind,
    /// `Call-ID` value with the header name and leading spaces stripped.
    pub call_id: Option<SmolStr>,
    /// True iff the buffer contains `Content-Type: application/sdp`.
    pub has_sdp: bool,
    pub lines: HeaderLines,
    /// First run of digits after `CSeq:`, when present.
    pub cseq_number: Option<u32>,
    /// Parsed `Max-Forwards`, or [`DEFAULT_MAX_FORWARDS`] when absent.
    pub max_forwards: u32,
    /// Byte offset of [`SDP_CONTENT_TYPE`] in the buffer. Forwarded bodies are
    /// copied verbatim from this position to the end of the datagram.
    pub body_offset: Option<usize>,
}

/// Scans a datagram. Returns [`None`] for anything that should be discarded:
/// non-UTF-8 payloads, a missing CRLF, an empty start line, or a start line
/// with no method token or status code.
pub fn scan(datagram: &[u8]) -> Option<Scan> {
    let text = std::str::from_utf8(datagram).ok()?;
    let first_end = text.find("\r\n")?;
    if first_end == 0 {
        return None;
    }
    let kind = scan_start_line(&text[..first_end])?;

    let head = match text.find("\r\n\r\n") {
        Some(end) => &text[..end],
        None => text,
    };

    let mut lines = HeaderLines::default();
    for line in head.split("\r\n").skip(1) {
        if line.starts_with("Via: ") {
            lines.via.get_or_insert_with(|| SmolStr::new(line));
        } else if line.starts_with("From: ") {
            lines.from.get_or_insert_with(|| SmolStr::new(line));
        } else if line.starts_with("To: ") {
            lines.to.get_or_insert_with(|| SmolStr::new(line));
        } else if line.starts_with("CSeq: ") {
            lines.cseq.get_or_insert_with(|| SmolStr::new(line));
        } else if line.starts_with("Call-ID:") {
            lines.call_id.get_or_insert_with(|| SmolStr::new(line));
        } else if line.starts_with("Contact: ") {
            lines.contact.get_or_insert_with(|| SmolStr::new(line));
        }
    }

    let call_id = lines
        .call_id
        .as_ref()
        .map(|line| SmolStr::new(line["Call-ID:".len()..].trim_start()));
    let cseq_number = lines.cseq.as_deref().and_then(cseq_number);
    let max_forwards = head
        .split("\r\n")
        .find_map(|line| line.strip_prefix("Max-Forwards: "))
        .map(|value| leading_digits(value.trim()).parse().unwrap_or(0))
        .unwrap_or(DEFAULT_MAX_FORWARDS);
    let body_offset = text.find(SDP_CONTENT_TYPE);

    Some(Scan {
        kind,
        call_id,
        has_sdp: body_offset.is_some(),
        lines,
        cseq_number,
        max_forwards,
        body_offset,
    })
}

fn scan_start_line(first: &str) -> Option<Kind> {
    if let Some(rest) = first.strip_prefix("SIP/2.0") {
        let digits = leading_digits(rest.trim_start());
        if digits.is_empty() {
            return None;
        }
        return Some(Kind::Status(digits.parse().ok()?));
    }
    let space = first.find(' ')?;
    if space == 0 {
        return None;
    }
    Some(Kind::Request(Method::from_token(&first[..space])))
}

/// The hop budget to place in a forwarded request: decremented once,
/// never below zero.
pub fn forwarded_max_forwards(inbound: u32) -> u32 {
    inbound.saturating_sub(1)
}

/// First run of digits after the `CSeq:` header name.
pub fn cseq_number(cseq_line: &str) -> Option<u32> {
    let start = cseq_line.find(|c: char| c.is_ascii_digit())?;
    leading_digits(&cseq_line[start..]).parse().ok()
}

/// The URI between `<` and `>` of an addr-spec header line, when present.
pub fn angle_uri(line: &str) -> Option<&str> {
    let start = line.find('<')? + 1;
    let end = line[start..].find('>')?;
    Some(&line[start..start + end])
}

/// Username between `sip:` and `@` of a `From`/`To` header line.
pub fn user_from_uri(line: &str) -> Option<&str> {
    let start = line.find("sip:")? + "sip:".len();
    let end = line[start..].find('@')?;
    Some(&line[start..start + end])
}

/// Callee username from a `To:` header line: the bracketed URI with any
/// `sip:`/`tel:` prefix stripped, cut at the first `@` or whitespace.
pub fn callee_from_to_line(line: &str) -> Option<&str> {
    let uri = angle_uri(line)?;
    let user = uri
        .strip_prefix("sip:")
        .or_else(|| uri.strip_prefix("tel:"))
        .unwrap_or(uri);
    let end = user
        .find(|c: char| c == '@' || c.is_whitespace())
        .unwrap_or(user.len());
    if end == 0 {
        return None;
    }
    Some(&user[..end])
}

fn leading_digits(value: &str) -> &str {
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    &value[..end]
}
