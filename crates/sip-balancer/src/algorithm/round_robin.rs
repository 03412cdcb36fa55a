// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sip_core::Request;

use super::BalancerAlgorithm;
use crate::node::Node;
use crate::registry::NodeRegistry;

/// Hands new calls to live nodes in turn.
#[derive(Debug)]
pub struct RoundRobin {
    registry: Arc<NodeRegistry>,
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            next: AtomicUsize::new(0),
        }
    }
}

impl BalancerAlgorithm for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    fn select_node(&self, _request: &Request, _call_id: &str) -> Option<Arc<Node>> {
        let live = self.registry.live_nodes();
        if live.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % live.len();
        live.get(index).cloned()
    }
}
