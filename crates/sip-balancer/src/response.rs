// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytes::Bytes;
use sip_core::{Headers, Request, Response, StatusLine};

use crate::error::{BalancerError, Result};

/// Headers a locally generated response copies from its request.
const COPIED: [&str; 5] = ["Via", "From", "To", "Call-ID", "CSeq"];

/// The parts of a request needed to answer it later, captured before the
/// request is rewritten.
#[derive(Debug, Clone)]
pub struct ReplyTemplate {
    headers: Headers,
}

impl ReplyTemplate {
    pub fn capture(request: &Request) -> Self {
        let mut headers = Headers::new();
        for name in COPIED {
            for value in request.headers().get_all(name) {
                headers.push(name, value.clone());
            }
        }
        Self { headers }
    }

    /// Builds a body-less response with the given status.
    pub fn respond(&self, code: u16, reason: &str) -> Result<Response> {
        let status =
            StatusLine::new(code, reason).map_err(|e| BalancerError::Dispatch(e.into()))?;
        let mut headers = self.headers.clone();
        headers.push("Content-Length", "0");
        Response::new(status, headers, Bytes::new()).map_err(|e| BalancerError::Dispatch(e.into()))
    }
}

/// Response to `request` copying its Via, From, To, Call-ID and CSeq.
pub fn create_response(request: &Request, code: u16, reason: &str) -> Result<Response> {
    ReplyTemplate::capture(request).respond(code, reason)
}
