// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sip_core::{uri::split_host_port, Method, DEFAULT_MAX_FORWARDS, DEFAULT_SIP_PORT};
use sip_transport::TransportKind;

use crate::activity::CallTimeouts;
use crate::error::{BalancerError, Result};
use crate::node::Node;

/// Balancer configuration, usually loaded from JSON.
///
/// Every field has a default so a partial file is enough:
///
/// ```
/// # use sip_balancer::BalancerConfig;
/// let config: BalancerConfig = serde_json::from_str(r#"{
///     "host": "10.0.0.1",
///     "internal": { "port": 5065 },
///     "algorithm": { "type": "header_affinity", "header": "From" }
/// }"#).unwrap();
/// assert!(config.validate().is_ok());
/// assert_eq!(config.external.port, 5060);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Address both legs are bound on.
    pub host: String,
    pub external: LegConfig,
    /// Present in dual-leg deployments.
    pub internal: Option<LegConfig>,
    pub algorithm: AlgorithmConfig,
    /// Methods that get record-routed.
    pub dialog_creating_methods: Vec<String>,
    /// Max-Forwards written into requests that arrive without one.
    pub max_forwards_ceiling: u32,
    /// `host[:port]` peers treated as cluster members when classifying Via.
    pub extra_server_nodes: Vec<String>,
    /// Nodes registered at startup.
    pub nodes: Vec<NodeConfig>,
    /// Seconds a pinned call may wait for its first response.
    pub unanswered_call_secs: u64,
    /// Seconds an answered call may stay silent before its pin is dropped.
    pub idle_call_secs: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            external: LegConfig::default(),
            internal: None,
            algorithm: AlgorithmConfig::default(),
            dialog_creating_methods: vec!["INVITE".to_string(), "SUBSCRIBE".to_string()],
            max_forwards_ceiling: DEFAULT_MAX_FORWARDS,
            extra_server_nodes: Vec::new(),
            nodes: Vec::new(),
            unanswered_call_secs: 32,
            idle_call_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LegConfig {
    pub port: u16,
    pub transport: TransportKind,
    /// Address advertised in Record-Route and Via instead of the bound host.
    pub public_address: Option<String>,
    pub public_port: Option<u16>,
}

impl Default for LegConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SIP_PORT,
            transport: TransportKind::Udp,
            public_address: None,
            public_port: None,
        }
    }
}

/// Node selection policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlgorithmConfig {
    #[default]
    RoundRobin,
    CallIdHash,
    /// Hashes the value of `header` (falls back to Call-ID when absent).
    HeaderAffinity { header: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub transports: Vec<TransportKind>,
}

impl NodeConfig {
    pub fn to_node(&self) -> Node {
        let hostname = self.hostname.as_deref().unwrap_or(&self.ip);
        Node::new(hostname, self.ip.as_str(), self.port, self.transports.clone())
    }
}

impl BalancerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(BalancerError::Config("host must not be empty".into()));
        }
        if self.external.port == 0 {
            return Err(BalancerError::Config("external port must not be 0".into()));
        }
        if let Some(internal) = &self.internal {
            if internal.port == 0 {
                return Err(BalancerError::Config("internal port must not be 0".into()));
            }
            if internal.port == self.external.port && internal.transport == self.external.transport
            {
                return Err(BalancerError::Config(format!(
                    "external and internal legs both use {}/{}",
                    self.external.port,
                    self.external.transport.as_str()
                )));
            }
        }
        for leg in std::iter::once(&self.external).chain(self.internal.as_ref()) {
            if leg.public_port == Some(0) {
                return Err(BalancerError::Config("public port must not be 0".into()));
            }
        }
        if let AlgorithmConfig::HeaderAffinity { header } = &self.algorithm {
            if header.trim().is_empty() {
                return Err(BalancerError::Config("affinity header must not be empty".into()));
            }
        }
        if self.max_forwards_ceiling == 0 || self.max_forwards_ceiling > 255 {
            return Err(BalancerError::Config(format!(
                "max_forwards_ceiling {} outside 1-255",
                self.max_forwards_ceiling
            )));
        }
        for method in &self.dialog_creating_methods {
            if !Method::is_valid_token(method) {
                return Err(BalancerError::Config(format!("invalid method token {method:?}")));
            }
        }
        if self.unanswered_call_secs == 0 || self.idle_call_secs == 0 {
            return Err(BalancerError::Config("call timeouts must not be 0".into()));
        }
        self.extra_servers()?;
        for node in &self.nodes {
            if node.port == 0 || node.ip.trim().is_empty() {
                return Err(BalancerError::Config(format!(
                    "invalid node {}:{}",
                    node.ip, node.port
                )));
            }
        }
        Ok(())
    }

    /// Parses `extra_server_nodes`, applying the default SIP port.
    pub fn extra_servers(&self) -> Result<Vec<(String, u16)>> {
        self.extra_server_nodes
            .iter()
            .map(|entry| {
                let (host, port) = split_host_port(entry.trim())
                    .filter(|(host, _)| !host.is_empty())
                    .ok_or_else(|| {
                        BalancerError::Config(format!("invalid extra server node {entry:?}"))
                    })?;
                Ok((host.to_ascii_lowercase(), port.unwrap_or(DEFAULT_SIP_PORT)))
            })
            .collect()
    }

    pub fn dialog_methods(&self) -> Vec<Method> {
        self.dialog_creating_methods
            .iter()
            .map(|m| Method::from_token(m))
            .collect()
    }

    pub fn is_dual_leg(&self) -> bool {
        self.internal.is_some()
    }

    pub fn call_timeouts(&self) -> CallTimeouts {
        CallTimeouts {
            unanswered: Duration::from_secs(self.unanswered_call_secs),
            idle: Duration::from_secs(self.idle_call_secs),
        }
    }
}
