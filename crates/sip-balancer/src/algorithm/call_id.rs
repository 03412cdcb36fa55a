// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::Arc;

use sip_core::Request;

use super::{hash_index, BalancerAlgorithm};
use crate::node::Node;
use crate::registry::NodeRegistry;

/// Hashes the Call-ID onto the live node set.
#[derive(Debug)]
pub struct CallIdHash {
    registry: Arc<NodeRegistry>,
}

impl CallIdHash {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }
}

impl BalancerAlgorithm for CallIdHash {
    fn name(&self) -> &'static str {
        "call_id_hash"
    }

    fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    fn select_node(&self, _request: &Request, call_id: &str) -> Option<Arc<Node>> {
        let live = self.registry.live_nodes();
        let index = hash_index(call_id, live.len())?;
        live.get(index).cloned()
    }
}
