// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeMap;
use std::fmt;

use smol_str::SmolStr;

use crate::{uri::split_host_port, Headers};

/// Parsed representation of a Via header.
///
/// Parameters keep insertion order irrelevant; names are lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViaHeader {
    pub transport: SmolStr,
    pub sent_by: SmolStr,
    pub params: BTreeMap<SmolStr, Option<SmolStr>>,
}

impl ViaHeader {
    /// Builds a Via for `host:port` over `transport` with the given branch.
    pub fn new(transport: &str, host: &str, port: u16, branch: &str) -> Self {
        let mut params = BTreeMap::new();
        params.insert(SmolStr::new("branch"), Some(SmolStr::new(branch)));
        Self {
            transport: SmolStr::new(transport.to_ascii_uppercase()),
            sent_by: SmolStr::new(format_host_port(host, port)),
            params,
        }
    }

    /// Parses a single Via value (`SIP/2.0/UDP host:port;branch=...`).
    ///
    /// A comma-separated Via line yields only its first value.
    pub fn parse(value: &str) -> Option<Self> {
        let first = value.split(',').next()?.trim();
        let (protocol, rest) = first.split_once(|c: char| c.is_ascii_whitespace())?;
        let mut proto_parts = protocol.split('/');
        let name = proto_parts.next()?.trim();
        let version = proto_parts.next()?.trim();
        let transport = proto_parts.next()?.trim();
        if !name.eq_ignore_ascii_case("SIP") || version != "2.0" || transport.is_empty() {
            return None;
        }

        let mut parts = rest.trim().split(';');
        let sent_by = parts.next()?.trim();
        if sent_by.is_empty() {
            return None;
        }
        split_host_port(sent_by)?;

        let mut params = BTreeMap::new();
        for part in parts {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((k, v)) => params.insert(
                    SmolStr::new(k.trim().to_ascii_lowercase()),
                    Some(SmolStr::new(v.trim())),
                ),
                None => params.insert(SmolStr::new(part.to_ascii_lowercase()), None),
            };
        }

        Some(Self {
            transport: SmolStr::new(transport.to_ascii_uppercase()),
            sent_by: SmolStr::new(sent_by),
            params,
        })
    }

    /// Parses the topmost Via of a header list.
    pub fn top(headers: &Headers) -> Option<Self> {
        headers.get("Via").and_then(|v| Self::parse(v))
    }

    /// Returns the transport token (e.g. UDP/TCP/TLS) associated with this Via.
    pub fn transport(&self) -> &str {
        self.transport.as_str()
    }

    /// Host portion of sent-by.
    pub fn host(&self) -> &str {
        split_host_port(&self.sent_by)
            .map(|(host, _)| host)
            .unwrap_or(self.sent_by.as_str())
    }

    /// Port portion of sent-by, if explicit.
    pub fn port(&self) -> Option<u16> {
        split_host_port(&self.sent_by).and_then(|(_, port)| port)
    }

    /// Looks up the provided parameter ignoring ASCII case.
    pub fn param(&self, name: &str) -> Option<&Option<SmolStr>> {
        self.params.get(name.to_ascii_lowercase().as_str())
    }

    pub fn branch(&self) -> Option<&str> {
        self.param("branch").and_then(|v| v.as_deref())
    }
}

impl fmt::Display for ViaHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport, self.sent_by)?;
        // branch first, the rest in name order
        if let Some(branch) = self.branch() {
            write!(f, ";branch={}", branch)?;
        }
        for (name, value) in self.params.iter().filter(|(k, _)| k.as_str() != "branch") {
            match value {
                Some(value) => write!(f, ";{}={}", name, value)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}

fn format_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
