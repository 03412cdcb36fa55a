// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use smol_str::SmolStr;
use sip_transport::TransportKind;

/// Registry key of a backend node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub ip: SmolStr,
    pub port: u16,
}

impl NodeId {
    pub fn new(ip: impl Into<SmolStr>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ip.contains(':') {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

/// A backend application server.
///
/// Identity fields are fixed at construction. Liveness is updated in place by
/// whoever feeds the registry heartbeats.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    hostname: SmolStr,
    transports: Vec<TransportKind>,
    alive: AtomicBool,
    last_seen: Mutex<Instant>,
}

impl Node {
    /// Creates a live node. An empty transport list means UDP only.
    pub fn new(
        hostname: impl Into<SmolStr>,
        ip: impl Into<SmolStr>,
        port: u16,
        transports: Vec<TransportKind>,
    ) -> Self {
        let transports = if transports.is_empty() {
            vec![TransportKind::Udp]
        } else {
            transports
        };
        Self {
            id: NodeId::new(ip, port),
            hostname: hostname.into(),
            transports,
            alive: AtomicBool::new(true),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn ip(&self) -> &str {
        &self.id.ip
    }

    pub fn port(&self) -> u16 {
        self.id.port
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn transports(&self) -> &[TransportKind] {
        &self.transports
    }

    pub fn supports(&self, transport: TransportKind) -> bool {
        self.transports.contains(&transport)
    }

    /// First advertised transport.
    pub fn preferred_transport(&self) -> TransportKind {
        self.transports
            .first()
            .copied()
            .unwrap_or(TransportKind::Udp)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    /// Records a heartbeat and marks the node alive.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
        self.set_alive(true);
    }

    pub fn since_last_seen(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// True when `host` names this node (hostname or IP) and the port matches.
    pub fn matches_address(&self, host: &str, port: u16) -> bool {
        self.id.port == port
            && (self.id.ip.eq_ignore_ascii_case(host) || self.hostname.eq_ignore_ascii_case(host))
    }

    /// Loose-routing Route value that steers a request to this node.
    pub fn route_value(&self, transport: TransportKind) -> String {
        format!("<sip:{};transport={};lr>", self.id, transport.as_str())
    }
}

/// Membership change reported by the liveness prober.
#[derive(Debug)]
pub enum NodeEvent {
    Joined(Node),
    Left(NodeId),
}
