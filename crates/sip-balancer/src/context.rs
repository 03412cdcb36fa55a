// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use smol_str::SmolStr;
use sip_core::Method;
use sip_transport::TransportKind;

use crate::config::{BalancerConfig, LegConfig};
use crate::error::Result;
use crate::registry::NodeRegistry;

/// One of the two network sides of the balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    /// Faces callers outside the cluster.
    External,
    /// Faces the application-server nodes.
    Internal,
}

impl Leg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Leg::External => "external",
            Leg::Internal => "internal",
        }
    }

    pub fn opposite(self) -> Leg {
        match self {
            Leg::External => Leg::Internal,
            Leg::Internal => Leg::External,
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bound and advertised address of one leg.
#[derive(Debug, Clone)]
pub struct LegEndpoint {
    pub port: u16,
    pub transport: TransportKind,
    pub public_address: Option<SmolStr>,
    pub public_port: Option<u16>,
    record_route: SmolStr,
    advertised_host: SmolStr,
    advertised_port: u16,
}

impl LegEndpoint {
    fn new(host: &str, leg: &LegConfig) -> Self {
        let public_address = leg.public_address.as_deref().map(SmolStr::new);
        let advertised_host = public_address.clone().unwrap_or_else(|| SmolStr::new(host));
        let advertised_port = match (&public_address, leg.public_port) {
            (Some(_), Some(port)) => port,
            _ => leg.port,
        };
        let record_route = SmolStr::new(format!(
            "<sip:{}:{};transport={};lr>",
            bracket(&advertised_host),
            advertised_port,
            leg.transport.as_str()
        ));
        Self {
            port: leg.port,
            transport: leg.transport,
            public_address,
            public_port: leg.public_port,
            record_route,
            advertised_host,
            advertised_port,
        }
    }

    /// The Record-Route value this leg inserts.
    pub fn record_route(&self) -> &str {
        &self.record_route
    }

    /// Host and port peers on this leg should address the balancer by.
    pub fn advertised(&self) -> (&str, u16) {
        (&self.advertised_host, self.advertised_port)
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancerStats {
    pub requests_processed: u64,
    pub responses_processed: u64,
    pub live_nodes: usize,
    pub sticky_sessions: usize,
}

impl fmt::Display for BalancerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requests={} responses={} live_nodes={} sticky_sessions={}",
            self.requests_processed, self.responses_processed, self.live_nodes, self.sticky_sessions
        )
    }
}

/// Shared, read-mostly state built once from the configuration.
#[derive(Debug)]
pub struct BalancerContext {
    host: SmolStr,
    external: LegEndpoint,
    internal: Option<LegEndpoint>,
    extra_servers: Vec<(SmolStr, u16)>,
    dialog_methods: Vec<Method>,
    max_forwards_ceiling: u32,
    requests_processed: AtomicU64,
    responses_processed: AtomicU64,
}

impl BalancerContext {
    /// Validates `config` and derives the per-leg headers.
    pub fn from_config(config: &BalancerConfig) -> Result<Self> {
        config.validate()?;
        let host = config.host.trim();
        Ok(Self {
            host: SmolStr::new(host),
            external: LegEndpoint::new(host, &config.external),
            internal: config.internal.as_ref().map(|leg| LegEndpoint::new(host, leg)),
            extra_servers: config
                .extra_servers()?
                .into_iter()
                .map(|(host, port)| (SmolStr::new(host), port))
                .collect(),
            dialog_methods: config.dialog_methods(),
            max_forwards_ceiling: config.max_forwards_ceiling,
            requests_processed: AtomicU64::new(0),
            responses_processed: AtomicU64::new(0),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_dual_leg(&self) -> bool {
        self.internal.is_some()
    }

    /// Endpoint of `leg`; single-leg deployments answer with the external one.
    pub fn endpoint(&self, leg: Leg) -> &LegEndpoint {
        match (leg, &self.internal) {
            (Leg::Internal, Some(internal)) => internal,
            _ => &self.external,
        }
    }

    pub fn record_route(&self, leg: Leg) -> &str {
        self.endpoint(leg).record_route()
    }

    pub fn max_forwards_ceiling(&self) -> u32 {
        self.max_forwards_ceiling
    }

    pub fn is_dialog_creating(&self, method: &Method) -> bool {
        self.dialog_methods.contains(method)
    }

    /// True when `host:port` addresses the balancer on either leg.
    pub fn is_own_address(&self, host: &str, port: u16) -> bool {
        std::iter::once(&self.external)
            .chain(self.internal.as_ref())
            .any(|leg| {
                (self.host.eq_ignore_ascii_case(host) && leg.port == port)
                    || leg.public_address.as_deref().is_some_and(|public| {
                        public.eq_ignore_ascii_case(host)
                            && leg.public_port.unwrap_or(leg.port) == port
                    })
            })
    }

    pub fn is_extra_server(&self, host: &str, port: u16) -> bool {
        self.extra_servers
            .iter()
            .any(|(h, p)| *p == port && h.eq_ignore_ascii_case(host))
    }

    pub(crate) fn count_request(&self) -> u64 {
        self.requests_processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn count_response(&self) -> u64 {
        self.responses_processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn requests_processed(&self) -> u64 {
        self.requests_processed.load(Ordering::Relaxed)
    }

    pub fn responses_processed(&self) -> u64 {
        self.responses_processed.load(Ordering::Relaxed)
    }

    pub fn stats(&self, registry: &NodeRegistry) -> BalancerStats {
        BalancerStats {
            requests_processed: self.requests_processed(),
            responses_processed: self.responses_processed(),
            live_nodes: registry.live_count(),
            sticky_sessions: registry.sticky_count(),
        }
    }
}

fn bracket(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}
