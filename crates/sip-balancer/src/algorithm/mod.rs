// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Node selection strategies.
//!
//! Each strategy implements [`BalancerAlgorithm::select_node`]; stickiness,
//! pinning and the response hooks are shared default methods so a strategy
//! only overrides what it needs. [`build_algorithm`] picks one from
//! configuration.

mod call_id;
mod header_affinity;
mod round_robin;

use std::sync::Arc;

use sha2::{Digest, Sha256};
use sip_core::{Request, Response};
use tracing::debug;

use crate::config::AlgorithmConfig;
use crate::error::{BalancerError, Result};
use crate::node::Node;
use crate::registry::NodeRegistry;

pub use call_id::CallIdHash;
pub use header_affinity::{affinity_key, HeaderAffinity};
pub use round_robin::RoundRobin;

pub trait BalancerAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    fn registry(&self) -> &Arc<NodeRegistry>;

    /// Picks a live node for a call that has none yet.
    fn select_node(&self, request: &Request, call_id: &str) -> Option<Arc<Node>>;

    /// Resolves the node for a request coming from outside the cluster.
    ///
    /// An existing pin wins, even when its node has since gone away.
    /// Otherwise a node is selected and pinned.
    fn process_external_request(&self, request: &Request) -> Result<Arc<Node>> {
        let call_id = request
            .call_id()
            .ok_or(BalancerError::MissingHeader("Call-ID"))?;
        if let Some(node) = self.registry().get_assigned_node(call_id) {
            return Ok(node);
        }
        let node = self
            .select_node(request, call_id)
            .ok_or(BalancerError::NoNodeAvailable)?;
        self.assign_to_node(call_id, node.clone());
        Ok(node)
    }

    /// Bookkeeping for a request leaving the cluster.
    ///
    /// When the top Via names a registered node and the call has no pin yet,
    /// the call is pinned to that node.
    fn process_internal_request(&self, request: &Request) {
        let Some(call_id) = request.call_id() else {
            return;
        };
        if self.registry().get_assigned_node(call_id).is_some() {
            return;
        }
        let Some(via) = request.top_via() else {
            return;
        };
        let port = via.port().unwrap_or(sip_core::DEFAULT_SIP_PORT);
        if let Some(node) = self.registry().find_by_address(via.host(), port) {
            debug!(call_id, node = %node.id(), "pinning call to originating node");
            self.assign_to_node(call_id, node);
        }
    }

    fn process_external_response(&self, _response: &Response) {}

    fn process_internal_response(&self, _response: &Response) {}

    /// Pins `call_id` to `node`, overriding any earlier decision.
    fn assign_to_node(&self, call_id: &str, node: Arc<Node>) {
        self.registry().assign_to_node(call_id, node);
    }
}

/// Builds the configured strategy over `registry`.
pub fn build_algorithm(
    config: &AlgorithmConfig,
    registry: Arc<NodeRegistry>,
) -> Arc<dyn BalancerAlgorithm> {
    match config {
        AlgorithmConfig::RoundRobin => Arc::new(RoundRobin::new(registry)),
        AlgorithmConfig::CallIdHash => Arc::new(CallIdHash::new(registry)),
        AlgorithmConfig::HeaderAffinity { header } => {
            Arc::new(HeaderAffinity::new(registry, header.clone()))
        }
    }
}

/// Maps `key` onto `0..len` through SHA-256, stable across processes.
pub(crate) fn hash_index(key: &str, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    Some((u64::from_be_bytes(prefix) % len as u64) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sip_core::{Headers, Method, RequestLine, SipUri};
    use sip_transport::TransportKind;

    fn request(call_id: &str, via: &str) -> Request {
        let mut headers = Headers::new();
        headers.push("Via", via);
        headers.push("Call-ID", call_id);
        headers.push("CSeq", "1 INVITE");
        Request::new(
            RequestLine::new(Method::Invite, SipUri::parse("sip:bob@example.com").unwrap()),
            headers,
            Bytes::new(),
        )
        .unwrap()
    }

    fn registry() -> Arc<NodeRegistry> {
        Arc::new(NodeRegistry::with_nodes([
            Node::new("as1", "10.0.0.1", 5060, vec![TransportKind::Udp]),
            Node::new("as2", "10.0.0.2", 5060, vec![TransportKind::Udp]),
        ]))
    }

    #[test]
    fn hash_index_is_stable_and_bounded() {
        assert_eq!(hash_index("abc", 0), None);
        let first = hash_index("abc", 7).unwrap();
        assert!(first < 7);
        assert_eq!(hash_index("abc", 7), Some(first));
    }

    #[test]
    fn external_request_reuses_pin() {
        let registry = registry();
        let algorithm = build_algorithm(&AlgorithmConfig::RoundRobin, registry.clone());
        let req = request("call-1", "SIP/2.0/UDP 198.51.100.1:5060;branch=z9hG4bK1");

        let first = algorithm.process_external_request(&req).unwrap();
        for _ in 0..5 {
            let again = algorithm.process_external_request(&req).unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }
    }

    #[test]
    fn empty_registry_has_no_node() {
        let algorithm = build_algorithm(&AlgorithmConfig::CallIdHash, Arc::new(NodeRegistry::new()));
        let req = request("call-1", "SIP/2.0/UDP 198.51.100.1:5060;branch=z9hG4bK1");
        assert!(matches!(
            algorithm.process_external_request(&req),
            Err(BalancerError::NoNodeAvailable)
        ));
    }

    #[test]
    fn all_nodes_down_has_no_node() {
        let registry = registry();
        for node in registry.nodes() {
            node.set_alive(false);
        }
        let algorithm = build_algorithm(&AlgorithmConfig::RoundRobin, registry);
        let req = request("call-1", "SIP/2.0/UDP 198.51.100.1:5060;branch=z9hG4bK1");
        assert!(algorithm.process_external_request(&req).is_err());
    }

    #[test]
    fn missing_call_id_is_reported() {
        let algorithm = build_algorithm(&AlgorithmConfig::RoundRobin, registry());
        let mut req = request("x", "SIP/2.0/UDP 198.51.100.1:5060;branch=z9hG4bK1");
        req.headers_mut().remove("Call-ID");
        assert!(matches!(
            algorithm.process_external_request(&req),
            Err(BalancerError::MissingHeader("Call-ID"))
        ));
    }

    #[test]
    fn internal_request_pins_originating_node() {
        let registry = registry();
        let algorithm = build_algorithm(&AlgorithmConfig::RoundRobin, registry.clone());
        let req = request("call-9", "SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bK9");
        algorithm.process_internal_request(&req);
        assert_eq!(registry.get_assigned_node("call-9").unwrap().ip(), "10.0.0.2");

        // an existing pin is left alone
        let other = request("call-9", "SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKa");
        algorithm.process_internal_request(&other);
        assert_eq!(registry.get_assigned_node("call-9").unwrap().ip(), "10.0.0.2");
    }

    #[test]
    fn explicit_assignment_overrides_selection() {
        let registry = registry();
        let algorithm = build_algorithm(&AlgorithmConfig::CallIdHash, registry.clone());
        let req = request("call-2", "SIP/2.0/UDP 198.51.100.1:5060;branch=z9hG4bK2");
        let chosen = algorithm.process_external_request(&req).unwrap();
        let other = registry
            .nodes()
            .into_iter()
            .find(|n| !Arc::ptr_eq(n, &chosen))
            .unwrap();

        algorithm.assign_to_node("call-2", other.clone());
        assert!(Arc::ptr_eq(&algorithm.process_external_request(&req).unwrap(), &other));
    }
}
