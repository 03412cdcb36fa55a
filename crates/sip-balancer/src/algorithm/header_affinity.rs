// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::Arc;

use sip_core::Request;
use smol_str::SmolStr;

use super::{hash_index, BalancerAlgorithm};
use crate::node::Node;
use crate::registry::NodeRegistry;

/// Hashes the value of a configured header onto the live node set.
///
/// Calls carrying the same key (for instance the same `From` address) land on
/// the same node while the live set is unchanged. Requests without the header
/// fall back to their Call-ID.
#[derive(Debug)]
pub struct HeaderAffinity {
    registry: Arc<NodeRegistry>,
    header: SmolStr,
}

impl HeaderAffinity {
    pub fn new(registry: Arc<NodeRegistry>, header: impl Into<SmolStr>) -> Self {
        Self {
            registry,
            header: header.into(),
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }
}

/// Affinity key of a header value.
///
/// For name-addr values the URI inside `<...>` is used without its
/// parameters; otherwise the value up to the first `;`. Tags and other header
/// parameters therefore never change the key.
pub fn affinity_key(value: &str) -> Option<&str> {
    let value = value.trim();
    let key = match (value.find('<'), value.find('>')) {
        (Some(open), Some(close)) if open < close => &value[open + 1..close],
        _ => value,
    };
    let key = key.split(';').next().unwrap_or(key).trim();
    (!key.is_empty()).then_some(key)
}

impl BalancerAlgorithm for HeaderAffinity {
    fn name(&self) -> &'static str {
        "header_affinity"
    }

    fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    fn select_node(&self, request: &Request, call_id: &str) -> Option<Arc<Node>> {
        let key = request
            .headers()
            .get(&self.header)
            .and_then(|value| affinity_key(value))
            .unwrap_or(call_id);
        let live = self.registry.live_nodes();
        let index = hash_index(key, live.len())?;
        live.get(index).cloned()
    }
}
