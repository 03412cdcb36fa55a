// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Nodes file polling.
//!
//! The file is re-read when its modification time changes. Every node it
//! lists is heartbeated on every poll, so `--node-expiry-secs` only drops
//! nodes the file stopped listing.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use sip_balancer::{NodeId, NodeRegistry};
use tokio::fs;

use crate::config;

/// Membership changes applied by one poll.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NodesChange {
    pub joined: usize,
    pub left: usize,
}

pub struct NodesFile {
    path: PathBuf,
    modified: Option<SystemTime>,
    listed: Vec<NodeId>,
}

impl NodesFile {
    /// Starts out heartbeating the nodes already in `registry` (those seeded
    /// from configuration) until the file is first read.
    pub fn new(path: PathBuf, registry: &NodeRegistry) -> Self {
        Self {
            path,
            modified: None,
            listed: registry.nodes().iter().map(|n| n.id().clone()).collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reconciles `registry` when the file changed and heartbeats the listed
    /// nodes. Returns the change when the file was re-read.
    ///
    /// On error the previously listed nodes are still heartbeated.
    pub async fn poll(&mut self, registry: &NodeRegistry) -> Result<Option<NodesChange>> {
        let outcome = self.reload(registry).await;
        for id in &self.listed {
            registry.heartbeat(id);
        }
        outcome
    }

    async fn reload(&mut self, registry: &NodeRegistry) -> Result<Option<NodesChange>> {
        let metadata = fs::metadata(&self.path)
            .await
            .with_context(|| format!("reading metadata of {}", self.path.display()))?;
        let modified = metadata.modified().ok();
        if modified.is_some() && self.modified == modified {
            return Ok(None);
        }
        self.modified = modified;

        let contents = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let nodes = config::parse_nodes(&contents)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        self.listed = nodes.iter().map(|n| n.id().clone()).collect();
        let (joined, left) = registry.reconcile(nodes);
        Ok(Some(NodesChange {
            joined: joined.len(),
            left: left.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sip_balancer::Node;
    use sip_transport::TransportKind;
    use std::io::Write;
    use std::time::Duration;

    const TWO_NODES: &str = r#"[
        { "ip": "10.0.0.5", "port": 4060 },
        { "ip": "10.0.0.6", "port": 4060 }
    ]"#;

    fn nodes_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn first_poll_applies_the_file() {
        let file = nodes_file(TWO_NODES);
        let registry = NodeRegistry::new();
        registry.add_node(Node::new("seed", "10.0.0.9", 5060, vec![TransportKind::Udp]));
        let mut watcher = NodesFile::new(file.path().to_path_buf(), &registry);

        let change = watcher.poll(&registry).await.unwrap();
        assert_eq!(change, Some(NodesChange { joined: 2, left: 1 }));
        assert_eq!(registry.len(), 2);
        assert_eq!(watcher.poll(&registry).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unchanged_file_keeps_nodes_alive() {
        let file = nodes_file(TWO_NODES);
        let registry = NodeRegistry::new();
        let mut watcher = NodesFile::new(file.path().to_path_buf(), &registry);
        watcher.poll(&registry).await.unwrap();

        let max_age = Duration::from_millis(50);
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert_eq!(watcher.poll(&registry).await.unwrap(), None);
            assert!(registry.expire_stale(max_age).is_empty());
        }
        assert_eq!(registry.live_count(), 2);
    }

    #[tokio::test]
    async fn seeded_nodes_are_heartbeated_while_the_file_is_unreadable() {
        let registry = NodeRegistry::new();
        registry.add_node(Node::new("seed", "10.0.0.9", 5060, vec![TransportKind::Udp]));
        let mut watcher = NodesFile::new(PathBuf::from("/nonexistent/nodes.json"), &registry);

        let max_age = Duration::from_millis(50);
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert!(watcher.poll(&registry).await.is_err());
            assert!(registry.expire_stale(max_age).is_empty());
        }
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn dropped_nodes_expire() {
        let file = nodes_file(TWO_NODES);
        let registry = NodeRegistry::new();
        let mut watcher = NodesFile::new(file.path().to_path_buf(), &registry);
        watcher.poll(&registry).await.unwrap();

        // a node added behind the file's back is never heartbeated
        registry.add_node(Node::new("extra", "10.0.0.7", 4060, vec![TransportKind::Udp]));
        tokio::time::sleep(Duration::from_millis(80)).await;
        watcher.poll(&registry).await.unwrap();

        let expired = registry.expire_stale(Duration::from_millis(50));
        assert_eq!(expired, vec![NodeId::new("10.0.0.7", 4060)]);
        assert_eq!(registry.len(), 2);
    }
}
