// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

/// Protocol version carried on request and status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SipVersion {
    V2,
}

impl SipVersion {
    pub const fn as_str(self) -> &'static str {
        match self {
            SipVersion::V2 => "SIP/2.0",
        }
    }

    /// Accepts `SIP/2.0` with a case-insensitive protocol name.
    pub fn parse(token: &str) -> Option<Self> {
        let (name, version) = token.trim().split_once('/')?;
        (name.eq_ignore_ascii_case("SIP") && version == "2.0").then_some(SipVersion::V2)
    }
}

impl fmt::Display for SipVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_only_sip_2_0() {
        assert_eq!(SipVersion::parse("sip/2.0"), Some(SipVersion::V2));
        assert_eq!(SipVersion::parse("SIP/3.0"), None);
        assert_eq!(SipVersion::parse("HTTP/1.1"), None);
    }
}
