// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Header rewriting applied to every message crossing the balancer.
//!
//! Requests go through, in order: Max-Forwards enforcement (skipped for
//! CANCEL), Record-Route insertion for dialog-creating methods, removal of
//! Route entries naming the balancer, and Via insertion. Responses only lose
//! the Via the balancer added.

use smol_str::SmolStr;
use sip_core::{
    decrement_max_forwards, route, Headers, MaxForwardsError, Request, RouteEntry, ViaHeader,
    DEFAULT_SIP_PORT,
};
use sip_transport::TransportKind;
use tracing::debug;

use crate::context::{BalancerContext, Leg};
use crate::error::{BalancerError, Result};
use crate::node::Node;

/// Number of leading Route entries inspected for balancer addresses.
pub const MAX_STRIPPED_ROUTES: usize = 2;

/// Characters of the Call-ID appended to the upstream branch.
pub const BRANCH_CALL_ID_CHARS: usize = 5;

const MAGIC_COOKIE: &str = "z9hG4bK";

/// Decrements Max-Forwards, inserting the ceiling when the header is absent.
pub fn enforce_max_forwards(request: &mut Request, ceiling: u32) -> Result<u32> {
    let outcome = decrement_max_forwards(request.headers_mut(), ceiling);
    outcome.map_err(|err| match err {
        MaxForwardsError::Exhausted => BalancerError::TooManyHops,
        MaxForwardsError::Invalid => BalancerError::InvalidHeader {
            name: "Max-Forwards",
            value: request
                .headers()
                .get("Max-Forwards")
                .map(|v| v.to_string())
                .unwrap_or_default(),
        },
    })
}

/// Inserts the balancer's Record-Route values on top of the existing ones.
///
/// With two legs both values are inserted. The value of the leg the request
/// leaves on ends up topmost, above the value of the leg it arrived on, which
/// is the order the receiving side walks them back through.
pub fn add_record_routes(request: &mut Request, ctx: &BalancerContext, origin: Leg) {
    let headers = request.headers_mut();
    if ctx.is_dual_leg() {
        headers.prepend("Record-Route", ctx.record_route(origin));
        headers.prepend("Record-Route", ctx.record_route(origin.opposite()));
    } else {
        headers.prepend("Record-Route", ctx.record_route(Leg::External));
    }
}

/// Node identity carried in `node_host`/`node_port` Route parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHint {
    pub host: SmolStr,
    pub port: u16,
    pub transport: TransportKind,
}

/// Outcome of [`strip_own_routes`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrippedRoutes {
    pub removed: usize,
    /// Hint of the first removed entry that carried one.
    pub hint: Option<NodeHint>,
}

/// Removes up to [`MAX_STRIPPED_ROUTES`] topmost Route entries that address
/// the balancer itself.
///
/// Inspection stops at the first entry that names someone else.
pub fn strip_own_routes(request: &mut Request, ctx: &BalancerContext) -> StrippedRoutes {
    let mut stripped = StrippedRoutes::default();
    let headers = request.headers_mut();
    for _ in 0..MAX_STRIPPED_ROUTES {
        let Some(entry) = route::top_value(headers, "Route").and_then(RouteEntry::parse) else {
            break;
        };
        let uri = entry.uri();
        if !ctx.is_own_address(uri.host(), uri.port_or_default()) {
            break;
        }
        route::remove_top_value(headers, "Route");
        stripped.removed += 1;
        if stripped.hint.is_none() {
            stripped.hint = node_hint(&entry);
        }
        debug!(route = %entry, "removed balancer route");
    }
    stripped
}

fn node_hint(entry: &RouteEntry) -> Option<NodeHint> {
    let uri = entry.uri();
    let host = uri.param("node_host")?;
    let port = uri.param("node_port")?.trim().parse().ok()?;
    let transport = uri
        .transport()
        .and_then(TransportKind::parse)
        .unwrap_or(TransportKind::Udp);
    Some(NodeHint {
        host: SmolStr::new(host),
        port,
        transport,
    })
}

/// Branch for the Via the balancer adds: the upstream branch followed by the
/// first characters of the Call-ID.
///
/// Retransmissions carry the same upstream branch and Call-ID, so they get
/// the same branch again.
pub fn derive_branch(request: &Request) -> Result<String> {
    let via = request.top_via().ok_or(BalancerError::MissingHeader("Via"))?;
    let call_id = request
        .call_id()
        .ok_or(BalancerError::MissingHeader("Call-ID"))?;
    let upstream = via.branch().unwrap_or(MAGIC_COOKIE);
    let mut branch = String::with_capacity(upstream.len() + BRANCH_CALL_ID_CHARS);
    branch.push_str(upstream);
    branch.extend(call_id.chars().take(BRANCH_CALL_ID_CHARS));
    Ok(branch)
}

/// Adds the balancer's Via for `leg` above the existing ones.
pub fn add_via(request: &mut Request, ctx: &BalancerContext, leg: Leg, branch: &str) {
    let endpoint = ctx.endpoint(leg);
    let (host, port) = endpoint.advertised();
    let via = ViaHeader::new(endpoint.transport.via_transport(), host, port, branch);
    request.headers_mut().prepend("Via", via.to_string());
}

/// Puts a loose Route to `node` on top of the Route set.
pub fn push_node_route(request: &mut Request, node: &Node) {
    let value = node.route_value(node.preferred_transport());
    request.headers_mut().prepend("Route", value);
}

/// Host and port a Via was sent from, defaulting the port.
pub fn via_address(via: &ViaHeader) -> (&str, u16) {
    (via.host(), via.port().unwrap_or(DEFAULT_SIP_PORT))
}

/// Removes the topmost Via of a response if it names the balancer.
pub fn pop_own_via(headers: &mut Headers, ctx: &BalancerContext) -> bool {
    let own = route::top_value(headers, "Via")
        .and_then(ViaHeader::parse)
        .is_some_and(|via| {
            let (host, port) = via_address(&via);
            ctx.is_own_address(host, port)
        });
    if own {
        route::remove_top_value(headers, "Via");
    }
    own
}
