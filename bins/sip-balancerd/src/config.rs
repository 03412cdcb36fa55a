// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Configuration file loading and command-line overrides.

use std::path::Path;

use anyhow::{Context, Result};
use sip_balancer::{BalancerConfig, LegConfig, Node, NodeConfig};

/// Values given on the command line take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub external_port: Option<u16>,
    pub internal_port: Option<u16>,
}

/// Reads `path` (or starts from defaults) and applies `overrides`.
pub async fn load(path: Option<&Path>, overrides: &Overrides) -> Result<BalancerConfig> {
    let mut config = match path {
        Some(path) => {
            let contents = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            parse_config(&contents).with_context(|| format!("parsing {}", path.display()))?
        }
        None => BalancerConfig::default(),
    };
    apply_overrides(&mut config, overrides);
    config.validate()?;
    Ok(config)
}

pub fn parse_config(contents: &str) -> Result<BalancerConfig> {
    Ok(serde_json::from_str(contents)?)
}

pub fn apply_overrides(config: &mut BalancerConfig, overrides: &Overrides) {
    if let Some(host) = &overrides.host {
        config.host = host.clone();
    }
    if let Some(port) = overrides.external_port {
        config.external.port = port;
    }
    if let Some(port) = overrides.internal_port {
        // an internal port on its own turns on the second leg
        config
            .internal
            .get_or_insert_with(|| LegConfig {
                transport: config.external.transport,
                ..LegConfig::default()
            })
            .port = port;
    }
}

/// Parses a nodes file: a JSON array of node entries.
pub fn parse_nodes(contents: &str) -> Result<Vec<Node>> {
    let entries: Vec<NodeConfig> = serde_json::from_str(contents)?;
    Ok(entries.iter().map(NodeConfig::to_node).collect())
}
