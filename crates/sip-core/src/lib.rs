// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core SIP types used by the balancer: messages, headers, and URIs.
//!
//! - **Messages**: [`Request`], [`Response`], [`SipMessage`]
//! - **URIs**: [`SipUri`] (sip/sips), [`Uri`] (request target)
//! - **Headers**: [`Headers`] container plus [`ViaHeader`] and [`RouteEntry`]
//! - **Methods**: [`Method`] enum (INVITE, BYE, SUBSCRIBE, etc.)
//! - **Hop limit**: [`decrement_max_forwards`]
//!
//! String data is held in [`SmolStr`](smol_str::SmolStr) and bodies in
//! [`Bytes`](bytes::Bytes).
//!
//! # Examples
//!
//! ```
//! # use sip_core::*;
//! let uri = SipUri::parse("sip:alice@example.com").unwrap();
//! assert_eq!(uri.host(), "example.com");
//!
//! let via = ViaHeader::parse("SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKabc").unwrap();
//! assert_eq!(via.branch(), Some("z9hG4bKabc"));
//! ```

pub mod headers;
pub mod max_forwards;
pub mod method;
pub mod msg;
pub mod route;
pub mod uri;
pub mod version;
pub mod via;

pub use headers::{Header, Headers};
pub use max_forwards::{decrement_max_forwards, MaxForwardsError, DEFAULT_MAX_FORWARDS};
pub use method::Method;
pub use msg::{MessageError, Request, RequestLine, Response, SipMessage, StatusLine};
pub use route::RouteEntry;
pub use uri::{SipUri, Uri, DEFAULT_SIPS_PORT, DEFAULT_SIP_PORT};
pub use version::SipVersion;
pub use via::ViaHeader;
