// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wire codec for SIP messages.
//!
//! Parsing is deliberately tolerant of unknown methods and header names so the
//! balancer can relay anything it does not need to understand. Serialization
//! recomputes `Content-Length` from the body.

use bytes::{Bytes, BytesMut};
use sip_core::{
    Headers, Method, Request, RequestLine, Response, SipMessage, SipVersion, StatusLine, Uri,
};
use smol_str::SmolStr;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Parses a request or a response, deciding by the start line.
pub fn parse_message(datagram: &Bytes) -> Option<SipMessage> {
    if datagram.len() >= 4 && datagram[..4].eq_ignore_ascii_case(b"SIP/") {
        parse_response(datagram).map(SipMessage::Response)
    } else {
        parse_request(datagram).map(SipMessage::Request)
    }
}

/// Parses a SIP request from raw network bytes.
pub fn parse_request(datagram: &Bytes) -> Option<Request> {
    parse_request_with_limit(datagram, DEFAULT_MAX_MESSAGE_SIZE)
}

/// Parses a SIP request with an explicit max size check.
pub fn parse_request_with_limit(datagram: &Bytes, max_size: usize) -> Option<Request> {
    if datagram.len() > max_size {
        return None;
    }
    let (head, body_bytes) = split_head_body(datagram)?;
    let mut lines = head.split("\r\n");
    let first = lines.next()?.trim();
    if first.is_empty() {
        return None;
    }

    let (method, uri) = parse_request_line(first)?;
    let headers = parse_headers(lines)?;
    let body = extract_body(body_bytes, &headers)?;
    if !cseq_matches(&headers, &method) {
        return None;
    }

    Request::new(RequestLine::new(method, uri), headers, body).ok()
}

/// Parses a SIP response from raw network bytes.
pub fn parse_response(datagram: &Bytes) -> Option<Response> {
    if datagram.len() > DEFAULT_MAX_MESSAGE_SIZE {
        return None;
    }
    let (head, body_bytes) = split_head_body(datagram)?;
    let mut lines = head.split("\r\n");
    let first = lines.next()?.trim();
    if first.is_empty() {
        return None;
    }

    let status = parse_status_line(first)?;
    let headers = parse_headers(lines)?;
    let body = extract_body(body_bytes, &headers)?;

    Response::new(status, headers, body).ok()
}

/// Serializes a SIP request while normalising the `Content-Length` header.
pub fn serialize_request(req: &Request) -> Bytes {
    let start = req.start_line();
    let line = format!(
        "{} {} {}\r\n",
        start.method().as_str(),
        start.uri().as_str(),
        start.version().as_str()
    );
    serialize(line, req.headers(), req.body())
}

/// Serializes a SIP response while normalising the `Content-Length` header.
pub fn serialize_response(res: &Response) -> Bytes {
    let start = res.start_line();
    let line = format!(
        "{} {} {}\r\n",
        start.version().as_str(),
        start.code(),
        start.reason()
    );
    serialize(line, res.headers(), res.body())
}

fn serialize(mut buf: String, headers: &Headers, body: &Bytes) -> Bytes {
    use std::fmt::Write;

    for header in headers.iter() {
        if header.name.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        let name = canonical_header_name(&header.name);
        let _ = write!(buf, "{}: {}\r\n", name, header.value.trim());
    }
    let _ = write!(buf, "Content-Length: {}\r\n\r\n", body.len());

    let mut out = BytesMut::with_capacity(buf.len() + body.len());
    out.extend_from_slice(buf.as_bytes());
    out.extend_from_slice(body.as_ref());
    out.freeze()
}

/// Parses the request-line into a method and request URI.
fn parse_request_line(line: &str) -> Option<(Method, Uri)> {
    use nom::{
        bytes::complete::take_while1, character::complete::space1, combinator::rest,
        sequence::tuple,
    };

    let mut parser = tuple((
        take_while1::<_, _, nom::error::Error<_>>(is_token_char),
        space1::<_, nom::error::Error<_>>,
        take_while1::<_, _, nom::error::Error<_>>(is_uri_char),
        space1::<_, nom::error::Error<_>>,
        rest::<_, nom::error::Error<_>>,
    ));
    let (_, (method_token, _, uri_token, _, version_token)) = parser(line.trim()).ok()?;

    SipVersion::parse(version_token)?;
    let uri = Uri::parse(uri_token)?;
    Some((Method::from_token(method_token), uri))
}

/// Parses the status-line of a SIP response.
fn parse_status_line(line: &str) -> Option<StatusLine> {
    use nom::{
        bytes::complete::tag_no_case,
        character::complete::{space0, u16 as nom_u16},
        combinator::rest,
        sequence::tuple,
    };

    let mut parser = tuple((
        tag_no_case::<_, _, nom::error::Error<_>>("SIP/2.0 "),
        nom_u16::<_, nom::error::Error<_>>,
        space0::<_, nom::error::Error<_>>,
        rest::<_, nom::error::Error<_>>,
    ));
    let (_, (_, code, _, reason)) = parser(line.trim()).ok()?;

    StatusLine::new(code, reason.trim()).ok()
}

/// Returns the first header value matching `name`, also trying its compact form.
pub fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a SmolStr> {
    headers
        .get(name)
        .or_else(|| headers.get(canonical_header_name(name).as_str()))
}

/// Splits raw bytes into header text and body slice using the `\r\n\r\n` separator.
fn split_head_body(datagram: &Bytes) -> Option<(&str, &[u8])> {
    let data = datagram.as_ref();
    let delim = b"\r\n\r\n";

    if let Some(pos) = data.windows(delim.len()).position(|window| window == delim) {
        let head = std::str::from_utf8(&data[..pos]).ok()?;
        Some((head, &data[pos + delim.len()..]))
    } else {
        let head = std::str::from_utf8(data).ok()?;
        Some((head, &[]))
    }
}

/// Parses SIP headers, handling folded continuation lines (RFC 3261 §7.3.1).
fn parse_headers<'a, I>(lines: I) -> Option<Headers>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut headers = Headers::new();
    let mut current: Option<(SmolStr, String)> = None;

    for line in lines {
        if line.is_empty() {
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            let value = line.trim();
            let (_, current_value) = current.as_mut()?;
            if !value.is_empty() {
                if !current_value.is_empty() {
                    current_value.push(' ');
                }
                current_value.push_str(value);
            }
            continue;
        }

        let (name, value) = line.split_once(':')?;
        if let Some((prev_name, prev_value)) = current.take() {
            headers.push(prev_name, prev_value.trim());
        }
        current = Some((canonical_header_name(name.trim()), value.trim().to_owned()));
    }

    if let Some((name, value)) = current.take() {
        headers.push(name, value.trim());
    }

    Some(headers)
}

/// Expands compact header forms and normalises the casing of routing headers.
fn canonical_header_name(name: &str) -> SmolStr {
    let canonical = match name.to_ascii_lowercase().as_str() {
        "i" | "call-id" => "Call-ID",
        "f" | "from" => "From",
        "t" | "to" => "To",
        "m" | "contact" => "Contact",
        "l" | "content-length" => "Content-Length",
        "c" | "content-type" => "Content-Type",
        "v" | "via" => "Via",
        "s" => "Subject",
        "k" => "Supported",
        "o" => "Event",
        "e" => "Content-Encoding",
        "u" => "Allow-Events",
        "route" => "Route",
        "record-route" => "Record-Route",
        "max-forwards" => "Max-Forwards",
        "cseq" => "CSeq",
        _ => name,
    };
    SmolStr::new(canonical)
}

/// Returns the body truncated to the declared `Content-Length`, or [`None`] if shorter.
fn extract_body(body_bytes: &[u8], headers: &Headers) -> Option<Bytes> {
    let declared = headers
        .get("Content-Length")
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(body_bytes.len());
    if declared > body_bytes.len() {
        return None;
    }
    Some(Bytes::copy_from_slice(&body_bytes[..declared]))
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '.' | '^' | '_' | '`' | '|' | '~'
        )
}

fn is_uri_char(c: char) -> bool {
    !c.is_whitespace()
}

/// A CSeq whose method disagrees with the request line is malformed.
fn cseq_matches(headers: &Headers, method: &Method) -> bool {
    let Some(cseq) = headers.get("CSeq") else {
        return true;
    };
    let mut parts = cseq.split_whitespace();
    let _number = parts.next();
    match parts.next() {
        Some(token) => Method::from_token(token) == *method,
        None => false,
    }
}
