// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Backend node set and per-call affinity table.
//!
//! The node list sits behind a reader/writer lock: membership changes are
//! rare and routing only takes snapshots. Sticky assignments live in a
//! sharded map so upserts for one call never block lookups for another.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use smol_str::SmolStr;
use sip_transport::TransportKind;
use tracing::{debug, info};

use crate::node::{Node, NodeEvent, NodeId};

#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<Vec<Arc<Node>>>,
    sticky: DashMap<SmolStr, Arc<Node>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry seeded with `nodes`.
    pub fn with_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let registry = Self::new();
        for node in nodes {
            registry.add_node(node);
        }
        registry
    }

    /// Adds a node, or refreshes the existing entry with the same id.
    ///
    /// Returns the registered instance.
    pub fn add_node(&self, node: Node) -> Arc<Node> {
        let mut nodes = self.nodes.write();
        if let Some(existing) = nodes.iter().find(|n| n.id() == node.id()) {
            existing.touch();
            return existing.clone();
        }
        info!(node = %node.id(), hostname = node.hostname(), "node joined");
        let node = Arc::new(node);
        nodes.push(node.clone());
        node
    }

    /// Removes a node. Calls already pinned to it stay pinned.
    pub fn remove_node(&self, id: &NodeId) -> Option<Arc<Node>> {
        let mut nodes = self.nodes.write();
        let index = nodes.iter().position(|n| n.id() == id)?;
        let node = nodes.remove(index);
        node.set_alive(false);
        info!(node = %id, "node left");
        Some(node)
    }

    pub fn apply(&self, event: NodeEvent) {
        match event {
            NodeEvent::Joined(node) => {
                self.add_node(node);
            }
            NodeEvent::Left(id) => {
                self.remove_node(&id);
            }
        }
    }

    /// Snapshot of every registered node in insertion order.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    /// Snapshot of the nodes currently marked alive, in insertion order.
    pub fn live_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes
            .read()
            .iter()
            .filter(|n| n.is_alive())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.nodes.read().iter().filter(|n| n.is_alive()).count()
    }

    pub fn get(&self, id: &NodeId) -> Option<Arc<Node>> {
        self.nodes.read().iter().find(|n| n.id() == id).cloned()
    }

    /// Looks a node up by address and transport. `host` may be the node's
    /// hostname or its IP.
    pub fn find_node(&self, host: &str, port: u16, transport: TransportKind) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .iter()
            .find(|n| n.matches_address(host, port) && n.supports(transport))
            .cloned()
    }

    /// Looks a node up by address regardless of transport.
    pub fn find_by_address(&self, host: &str, port: u16) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .iter()
            .find(|n| n.matches_address(host, port))
            .cloned()
    }

    /// Pins `call_id` to `node`, replacing any earlier pin.
    pub fn assign_to_node(&self, call_id: &str, node: Arc<Node>) -> Option<Arc<Node>> {
        debug!(call_id, node = %node.id(), "call assigned");
        self.sticky.insert(SmolStr::new(call_id), node)
    }

    pub fn get_assigned_node(&self, call_id: &str) -> Option<Arc<Node>> {
        self.sticky.get(call_id).map(|entry| entry.value().clone())
    }

    /// Drops the pin for `call_id`. Returns whether one existed.
    pub fn unstick_session(&self, call_id: &str) -> bool {
        self.sticky.remove(call_id).is_some()
    }

    pub fn sticky_count(&self) -> usize {
        self.sticky.len()
    }

    /// Records a heartbeat from a registered node.
    pub fn heartbeat(&self, id: &NodeId) -> bool {
        match self.get(id) {
            Some(node) => {
                node.touch();
                true
            }
            None => false,
        }
    }

    /// Flips the health flag of a registered node without removing it.
    pub fn set_alive(&self, id: &NodeId, alive: bool) -> bool {
        match self.get(id) {
            Some(node) => {
                node.set_alive(alive);
                true
            }
            None => false,
        }
    }

    /// Removes nodes that have not sent a heartbeat within `max_age`.
    pub fn expire_stale(&self, max_age: Duration) -> Vec<NodeId> {
        let mut nodes = self.nodes.write();
        let mut expired = Vec::new();
        nodes.retain(|node| {
            if node.since_last_seen() > max_age {
                node.set_alive(false);
                expired.push(node.id().clone());
                false
            } else {
                true
            }
        });
        for id in &expired {
            info!(node = %id, "node expired");
        }
        expired
    }

    /// Makes the registered set equal `desired`, returning (joined, left).
    ///
    /// Nodes present in both are refreshed with a heartbeat.
    pub fn reconcile(&self, desired: Vec<Node>) -> (Vec<NodeId>, Vec<NodeId>) {
        let current: Vec<NodeId> = self.nodes().iter().map(|n| n.id().clone()).collect();
        let left: Vec<NodeId> = current
            .iter()
            .filter(|id| !desired.iter().any(|n| n.id() == *id))
            .cloned()
            .collect();
        let mut joined = Vec::new();
        for node in desired {
            if !current.contains(node.id()) {
                joined.push(node.id().clone());
            }
            self.add_node(node);
        }
        for id in &left {
            self.remove_node(id);
        }
        (joined, left)
    }
}
