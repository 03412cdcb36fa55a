// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::percent_decode_str;
use smol_str::SmolStr;

/// Default port for sip: URIs without an explicit port.
pub const DEFAULT_SIP_PORT: u16 = 5060;
/// Default port for sips: URIs without an explicit port.
pub const DEFAULT_SIPS_PORT: u16 = 5061;

/// Parsed representation of a SIP URI (RFC 3261 §19).
///
/// Parameter names are stored lowercased; values keep their case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipUri {
    pub raw: SmolStr,
    pub sips: bool,
    pub user: Option<SmolStr>,
    pub host: SmolStr,
    pub port: Option<u16>,
    pub params: BTreeMap<SmolStr, Option<SmolStr>>,
    pub headers: BTreeMap<SmolStr, SmolStr>,
}

impl SipUri {
    /// Attempts to parse a SIP or SIPS URI from the provided string.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let raw = SmolStr::new(input);
        let (scheme, rest) = input.split_once(':')?;
        let sips = scheme.eq_ignore_ascii_case("sips");
        if !sips && !scheme.eq_ignore_ascii_case("sip") {
            return None;
        }

        let (addr_part, headers_part) = match rest.split_once('?') {
            Some((addr, headers)) => (addr, Some(headers)),
            None => (rest, None),
        };

        let mut params = BTreeMap::new();
        let mut addr_iter = addr_part.split(';');
        let base = addr_iter.next()?.trim();
        for param in addr_iter {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            if let Some((k, v)) = param.split_once('=') {
                params.insert(
                    SmolStr::new(k.trim().to_ascii_lowercase()),
                    Some(SmolStr::new(v.trim())),
                );
            } else {
                params.insert(SmolStr::new(param.to_ascii_lowercase()), None);
            }
        }

        let (user, host_port) = match base.rsplit_once('@') {
            Some((user, host)) => (
                percent_decode_str(user.trim())
                    .decode_utf8()
                    .ok()
                    .map(|s| SmolStr::new(s.as_ref())),
                host.trim(),
            ),
            None => (None, base),
        };

        if host_port.is_empty() {
            return None;
        }

        let (host, port) = split_host_port(host_port)?;
        if host.is_empty() {
            return None;
        }
        let host = percent_decode_str(host)
            .decode_utf8()
            .ok()?
            .to_ascii_lowercase();

        let mut headers = BTreeMap::new();
        if let Some(headers_part) = headers_part {
            for pair in headers_part.split('&') {
                if let Some((k, v)) = pair.split_once('=') {
                    headers.insert(SmolStr::new(k.trim()), SmolStr::new(v.trim()));
                }
            }
        }

        Some(Self {
            raw,
            sips,
            user,
            host: SmolStr::new(host),
            port,
            params,
            headers,
        })
    }

    /// Returns the original textual representation of the URI.
    pub fn as_str(&self) -> &str {
        self.raw.as_str()
    }

    pub fn host(&self) -> &str {
        self.host.as_str()
    }

    /// Explicit port, or the scheme default.
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(if self.sips {
            DEFAULT_SIPS_PORT
        } else {
            DEFAULT_SIP_PORT
        })
    }

    /// Looks up a URI parameter value (name is matched case-insensitively).
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name.to_ascii_lowercase().as_str())
            .and_then(|v| v.as_deref())
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains_key(name.to_ascii_lowercase().as_str())
    }

    /// The `transport` URI parameter, if present.
    pub fn transport(&self) -> Option<&str> {
        self.param("transport")
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request-URI: either a SIP/SIPS URI or any other absolute URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Uri {
    Sip(SipUri),
    Absolute(SmolStr),
}

impl Uri {
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let prefix = input.get(..5).unwrap_or(input).to_ascii_lowercase();
        if prefix.starts_with("sip:") || prefix.starts_with("sips:") {
            SipUri::parse(input).map(Uri::Sip)
        } else {
            parse_absolute_uri(input).map(Uri::Absolute)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Uri::Sip(uri) => uri.as_str(),
            Uri::Absolute(uri) => uri.as_str(),
        }
    }

    pub fn as_sip(&self) -> Option<&SipUri> {
        match self {
            Uri::Sip(uri) => Some(uri),
            Uri::Absolute(_) => None,
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SipUri> for Uri {
    fn from(uri: SipUri) -> Self {
        Uri::Sip(uri)
    }
}

fn parse_absolute_uri(input: &str) -> Option<SmolStr> {
    let (scheme, remainder) = input.split_once(':')?;
    let mut chars = scheme.chars();
    if !chars.next()?.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.')) {
        return None;
    }
    if remainder.is_empty() {
        return None;
    }
    Some(SmolStr::new(input))
}

/// Splits a host[:port] or IPv6 literal "[host]:port" string.
pub fn split_host_port(input: &str) -> Option<(&str, Option<u16>)> {
    if input.starts_with('[') {
        let end = input.find(']')?;
        let host = &input[1..end];
        let remainder = &input[end + 1..];
        if let Some(port) = remainder.strip_prefix(':') {
            Some((host, Some(port.parse().ok()?)))
        } else {
            Some((host, None))
        }
    } else if let Some(idx) = input.rfind(':') {
        if input.matches(':').count() > 1 {
            return None;
        }
        let (host, port_str) = input.split_at(idx);
        let port = port_str[1..].parse().ok()?;
        Some((host, Some(port)))
    } else {
        Some((input, None))
    }
}
