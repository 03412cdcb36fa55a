// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Test harness for the balancer.
//!
//! Provides builders for the requests and responses a balancer sees on its
//! legs, and a [`RecordingDispatcher`] that captures what the gateway sends
//! instead of putting it on the wire.
//!
//! # Example
//! ```
//! use sip_testkit::RequestBuilder;
//! use sip_core::Method;
//! let req = RequestBuilder::new(Method::Invite, "sip:bob@example.com")
//!     .call_id("abc@client")
//!     .max_forwards(None)
//!     .build();
//! assert_eq!(req.method().as_str(), "INVITE");
//! assert!(req.headers().get("Max-Forwards").is_none());
//! ```

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sip_balancer::{Leg, LegDispatcher};
use sip_core::{Headers, Method, Request, RequestLine, Response, StatusLine, Uri};
use sip_parse::{serialize_request, serialize_response};
use smol_str::SmolStr;

/// Via used by builders unless overridden.
pub const CLIENT_VIA: &str = "SIP/2.0/UDP client.example.com:5060;branch=z9hG4bKclient1";

/// Fluent builder for requests with sensible dialog headers.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    uri: String,
    vias: Vec<String>,
    routes: Vec<String>,
    call_id: Option<String>,
    cseq: u32,
    max_forwards: Option<u32>,
    extra: Vec<(String, String)>,
}

impl RequestBuilder {
    pub fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_owned(),
            vias: vec![CLIENT_VIA.to_owned()],
            routes: Vec::new(),
            call_id: Some("test-callid@client.example.com".to_owned()),
            cseq: 1,
            max_forwards: Some(70),
            extra: Vec::new(),
        }
    }

    /// Replaces all Via headers with a single one.
    pub fn via(mut self, value: &str) -> Self {
        self.vias = vec![value.to_owned()];
        self
    }

    /// Adds a Via below the existing ones.
    pub fn add_via(mut self, value: &str) -> Self {
        self.vias.push(value.to_owned());
        self
    }

    pub fn without_via(mut self) -> Self {
        self.vias.clear();
        self
    }

    /// Appends a Route header, in top-to-bottom order.
    pub fn route(mut self, value: &str) -> Self {
        self.routes.push(value.to_owned());
        self
    }

    pub fn call_id(mut self, call_id: &str) -> Self {
        self.call_id = Some(call_id.to_owned());
        self
    }

    pub fn without_call_id(mut self) -> Self {
        self.call_id = None;
        self
    }

    pub fn cseq(mut self, cseq: u32) -> Self {
        self.cseq = cseq;
        self
    }

    /// `None` leaves the header out.
    pub fn max_forwards(mut self, value: Option<u32>) -> Self {
        self.max_forwards = value;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.extra.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn build(self) -> Request {
        let mut headers = Headers::new();
        for via in &self.vias {
            headers.push("Via", via.as_str());
        }
        for route in &self.routes {
            headers.push("Route", route.as_str());
        }
        if let Some(max_forwards) = self.max_forwards {
            headers.push("Max-Forwards", SmolStr::new(max_forwards.to_string()));
        }
        headers.push("From", "<sip:alice@example.com>;tag=1234");
        headers.push("To", "<sip:bob@example.com>");
        if let Some(call_id) = &self.call_id {
            headers.push("Call-ID", call_id.as_str());
        }
        headers.push(
            "CSeq",
            SmolStr::new(format!("{} {}", self.cseq, self.method.as_str())),
        );
        for (name, value) in &self.extra {
            headers.push(name.as_str(), value.as_str());
        }
        headers.push("Content-Length", "0");

        let uri = Uri::parse(&self.uri).expect("test URI should parse");
        Request::new(RequestLine::new(self.method, uri), headers, Bytes::new())
            .expect("test request should be valid")
    }
}

pub fn build_invite(uri: &str, call_id: &str) -> Request {
    RequestBuilder::new(Method::Invite, uri).call_id(call_id).build()
}

pub fn build_ack(uri: &str, call_id: &str) -> Request {
    RequestBuilder::new(Method::Ack, uri).call_id(call_id).build()
}

pub fn build_bye(uri: &str, call_id: &str) -> Request {
    RequestBuilder::new(Method::Bye, uri)
        .call_id(call_id)
        .cseq(2)
        .build()
}

pub fn build_cancel(uri: &str, call_id: &str) -> Request {
    RequestBuilder::new(Method::Cancel, uri).call_id(call_id).build()
}

pub fn build_options(uri: &str) -> Request {
    RequestBuilder::new(Method::Options, uri).build()
}

/// Constructs a response carrying `vias` top to bottom.
pub fn build_response(code: u16, reason: &str, vias: &[&str], call_id: &str) -> Response {
    let mut headers = Headers::new();
    for via in vias {
        headers.push("Via", *via);
    }
    headers.push("From", "<sip:alice@example.com>;tag=1234");
    headers.push("To", "<sip:bob@example.com>;tag=5678");
    headers.push("Call-ID", call_id);
    headers.push("CSeq", "1 INVITE");
    headers.push("Content-Length", "0");

    let status = StatusLine::new(code, reason).expect("test status should be valid");
    Response::new(status, headers, Bytes::new()).expect("test response should be valid")
}

/// Serializes a request to bytes for transport-layer testing.
pub fn as_bytes(request: &Request) -> Bytes {
    serialize_request(request)
}

/// Serializes a response to bytes for transport-layer testing.
pub fn response_as_bytes(response: &Response) -> Bytes {
    serialize_response(response)
}

/// Captures everything a gateway hands to its transport.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    requests: Mutex<Vec<(Leg, Request)>>,
    responses: Mutex<Vec<(Leg, Response)>>,
    failing: Mutex<bool>,
}

impl RecordingDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every later send fail after recording it.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn requests(&self) -> Vec<(Leg, Request)> {
        self.requests.lock().clone()
    }

    pub fn responses(&self) -> Vec<(Leg, Response)> {
        self.responses.lock().clone()
    }

    pub fn last_request(&self) -> Option<(Leg, Request)> {
        self.requests.lock().last().cloned()
    }

    pub fn last_response(&self) -> Option<(Leg, Response)> {
        self.responses.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.requests.lock().clear();
        self.responses.lock().clear();
    }

    fn outcome(&self) -> anyhow::Result<()> {
        if *self.failing.lock() {
            Err(anyhow!("recording dispatcher set to fail"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LegDispatcher for RecordingDispatcher {
    async fn send_request(&self, leg: Leg, request: Request) -> anyhow::Result<()> {
        self.requests.lock().push((leg, request));
        self.outcome()
    }

    async fn send_response(&self, leg: Leg, response: Response) -> anyhow::Result<()> {
        self.responses.lock().push((leg, response));
        self.outcome()
    }
}
