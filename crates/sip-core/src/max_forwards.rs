// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::Headers;

/// Value inserted when a request arrives without Max-Forwards (RFC 3261 §8.1.1.6).
pub const DEFAULT_MAX_FORWARDS: u32 = 70;

/// Errors returned when attempting to adjust Max-Forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaxForwardsError {
    /// Decrementing would leave no hops; the request must not be forwarded
    Exhausted,
    /// Max-Forwards value is not a number in 0-255
    Invalid,
}

impl std::fmt::Display for MaxForwardsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted => write!(f, "Max-Forwards exhausted"),
            Self::Invalid => write!(f, "Invalid Max-Forwards value"),
        }
    }
}

impl std::error::Error for MaxForwardsError {}

/// Decrements Max-Forwards ahead of forwarding.
///
/// - absent: a header carrying `ceiling` is appended and `ceiling` returned
///   (nothing is decremented);
/// - present with `value - 1 > 0`: rewritten to `value - 1`;
/// - present with `value <= 1`: [`MaxForwardsError::Exhausted`], headers untouched.
///
/// # Examples
///
/// ```
/// use sip_core::{Headers, decrement_max_forwards};
///
/// let mut headers = Headers::new();
/// headers.push("Max-Forwards", "70");
///
/// let remaining = decrement_max_forwards(&mut headers, 70).unwrap();
/// assert_eq!(remaining, 69);
/// ```
pub fn decrement_max_forwards(headers: &mut Headers, ceiling: u32) -> Result<u32, MaxForwardsError> {
    let Some(index) = headers.position("Max-Forwards") else {
        headers.push("Max-Forwards", ceiling.to_string());
        return Ok(ceiling);
    };

    let current = headers
        .get("Max-Forwards")
        .map(|v| v.trim())
        .and_then(|v| v.parse::<u8>().ok())
        .ok_or(MaxForwardsError::Invalid)?;

    if current <= 1 {
        return Err(MaxForwardsError::Exhausted);
    }

    let decremented = u32::from(current) - 1;
    headers.set_at(index, decremented.to_string());
    Ok(decremented)
}
