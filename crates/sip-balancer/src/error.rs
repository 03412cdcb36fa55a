// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use thiserror::Error;

/// Failures raised while balancing a message.
///
/// The gateway turns these into locally generated responses; none of them
/// escape past it.
#[derive(Debug, Error)]
pub enum BalancerError {
    /// The registry holds no live node to pick from.
    #[error("no node available")]
    NoNodeAvailable,

    /// Max-Forwards would drop to zero.
    #[error("too many hops")]
    TooManyHops,

    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("invalid {name} header: {value}")]
    InvalidHeader { name: &'static str, value: String },

    /// Building or handing off an outbound message failed.
    #[error("dispatch failed: {0}")]
    Dispatch(anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BalancerError {
    /// Status code of the response generated for this failure.
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            BalancerError::TooManyHops => (483, "Too Many Hops"),
            _ => (500, "Server Internal Error"),
        }
    }
}

pub type Result<T, E = BalancerError> = std::result::Result<T, E>;
