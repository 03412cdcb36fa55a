// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Observability hooks for the balancer.
//!
//! Two sinks live here:
//! - [`TransportMetrics`], a process-wide sink the socket loops report to;
//! - [`BalancerObserver`], handed explicitly to the gateway and told about
//!   every forwarding decision.
//!
//! Both come with a `tracing`-backed implementation.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use sip_observe::{set_transport_metrics, TracingTransportMetrics};
//! set_transport_metrics(Arc::new(TracingTransportMetrics));
//! ```

use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::Level;

/// Sink for socket-level events.
///
/// `transport` and `stage` are low-cardinality labels such as "udp" or "read".
pub trait TransportMetrics: Send + Sync + 'static {
    fn on_packet_received(&self, transport: &str);
    fn on_packet_sent(&self, transport: &str);
    fn on_error(&self, transport: &str, stage: &str);
    fn on_accept(&self, transport: &str);
}

struct NoopTransportMetrics;

impl TransportMetrics for NoopTransportMetrics {
    fn on_packet_received(&self, _transport: &str) {}
    fn on_packet_sent(&self, _transport: &str) {}
    fn on_error(&self, _transport: &str, _stage: &str) {}
    fn on_accept(&self, _transport: &str) {}
}

static TRANSPORT_METRICS: OnceCell<Arc<dyn TransportMetrics>> = OnceCell::new();
static NOOP_TRANSPORT_METRICS: NoopTransportMetrics = NoopTransportMetrics;

/// Installs the global transport metrics sink.
///
/// Returns `false` if one was already installed.
pub fn set_transport_metrics(metrics: Arc<dyn TransportMetrics>) -> bool {
    TRANSPORT_METRICS.set(metrics).is_ok()
}

/// Returns the configured transport metrics sink, or a no-op one.
pub fn transport_metrics() -> &'static dyn TransportMetrics {
    TRANSPORT_METRICS
        .get()
        .map(|arc| arc.as_ref())
        .unwrap_or(&NOOP_TRANSPORT_METRICS)
}

/// Span wrapping a listener loop.
pub fn span_with_transport(name: &'static str, transport: &str) -> tracing::Span {
    tracing::span!(Level::INFO, "transport", op = name, transport = transport)
}

/// Logs transport events through `tracing`.
#[derive(Debug, Default)]
pub struct TracingTransportMetrics;

impl TransportMetrics for TracingTransportMetrics {
    fn on_packet_received(&self, transport: &str) {
        tracing::trace!(transport, "packet received");
    }

    fn on_packet_sent(&self, transport: &str) {
        tracing::trace!(transport, "packet sent");
    }

    fn on_error(&self, transport: &str, stage: &str) {
        tracing::warn!(transport, stage, "transport error");
    }

    fn on_accept(&self, transport: &str) {
        tracing::debug!(transport, "accept");
    }
}

/// Receives one callback per balancing decision. Every hook defaults to a no-op.
///
/// Legs are reported as "external" or "internal".
pub trait BalancerObserver: Send + Sync + 'static {
    /// A request left the balancer towards `to_leg`.
    fn on_request_forwarded(&self, _method: &str, _from_leg: &str, _to_leg: &str) {}
    /// A response left the balancer towards `to_leg`.
    fn on_response_forwarded(&self, _code: u16, _to_leg: &str) {}
    /// The balancer answered a request itself instead of forwarding it.
    fn on_local_response(&self, _code: u16, _method: &str) {}
    /// A call was assigned to a node.
    fn on_node_assigned(&self, _algorithm: &str, _node: &str) {}
    /// A sticky assignment was dropped.
    fn on_unstick(&self, _call_id: &str) {}
}

/// Logs balancing decisions through `tracing`.
#[derive(Debug, Default)]
pub struct TracingBalancerObserver;

impl BalancerObserver for TracingBalancerObserver {
    fn on_request_forwarded(&self, method: &str, from_leg: &str, to_leg: &str) {
        tracing::debug!(method, from_leg, to_leg, "request forwarded");
    }

    fn on_response_forwarded(&self, code: u16, to_leg: &str) {
        tracing::debug!(code, to_leg, "response forwarded");
    }

    fn on_local_response(&self, code: u16, method: &str) {
        tracing::info!(code, method, "answered locally");
    }

    fn on_node_assigned(&self, algorithm: &str, node: &str) {
        tracing::debug!(algorithm, node, "call assigned");
    }

    fn on_unstick(&self, call_id: &str) {
        tracing::debug!(call_id, "call unstuck");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sink_is_noop() {
        // must not panic without an installed sink
        transport_metrics().on_packet_received("udp");
        transport_metrics().on_error("tcp", "read");
    }

    #[test]
    fn second_install_is_rejected() {
        set_transport_metrics(Arc::new(TracingTransportMetrics));
        assert!(!set_transport_metrics(Arc::new(TracingTransportMetrics)));
    }
}
