// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

mod config;
mod nodes;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sip_balancer::{BalancerGateway, Leg, NodeRegistry};
use sip_core::SipMessage;
use sip_observe::{set_transport_metrics, TracingBalancerObserver, TracingTransportMetrics};
use sip_parse::parse_message;
use sip_transport::InboundPacket;
use tokio::{
    sync::mpsc,
    time::{self, Duration},
};
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Overrides;
use crate::nodes::NodesFile;
use crate::transport::{stamp_received, LegTransports};

const NODES_POLL_INTERVAL: Duration = Duration::from_secs(3);
const CALL_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Stateless SIP load balancer in front of a cluster of application servers
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address both legs bind on (overrides the file)
    #[arg(long)]
    host: Option<String>,
    /// External leg port (overrides the file)
    #[arg(long)]
    external_port: Option<u16>,
    /// Internal leg port; enables the second leg when the file has none
    #[arg(long)]
    internal_port: Option<u16>,
    /// JSON array of nodes, re-read whenever it changes
    #[arg(long)]
    nodes_file: Option<PathBuf>,
    /// Nodes the nodes file stopped listing are dropped after this many seconds
    #[arg(long, requires = "nodes_file")]
    node_expiry_secs: Option<u64>,
    /// Seconds between statistics log lines
    #[arg(long, default_value_t = 60)]
    stats_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
    set_transport_metrics(Arc::new(TracingTransportMetrics));

    let args = Args::parse();
    let overrides = Overrides {
        host: args.host.clone(),
        external_port: args.external_port,
        internal_port: args.internal_port,
    };
    let config = config::load(args.config.as_deref(), &overrides).await?;

    let (tx, mut rx) = mpsc::channel::<InboundPacket>(1024);
    let legs = LegTransports::start(&config, tx).await?;

    let registry = Arc::new(NodeRegistry::new());
    let gateway = Arc::new(
        BalancerGateway::from_config(&config, registry.clone(), legs.clone())?
            .with_observer(Arc::new(TracingBalancerObserver)),
    );

    if let Some(path) = args.nodes_file.clone() {
        spawn_nodes_watcher(NodesFile::new(path, &registry), registry.clone());
    }
    if let Some(secs) = args.node_expiry_secs {
        // listed nodes are heartbeated once per poll
        let max_age = Duration::from_secs(secs).max(NODES_POLL_INTERVAL * 2);
        spawn_node_expiry(registry.clone(), max_age);
    }
    spawn_call_sweeper(gateway.clone());
    spawn_stats_reporter(
        gateway.clone(),
        legs.clone(),
        Duration::from_secs(args.stats_interval_secs.max(1)),
    );

    info!(
        external = %legs.local_addr(Leg::External),
        internal = ?config.internal.as_ref().map(|_| legs.local_addr(Leg::Internal)),
        nodes = registry.len(),
        "sip-balancerd started"
    );

    while let Some(packet) = rx.recv().await {
        let Some(leg) = legs.leg_of(packet.local) else {
            warn!(local = %packet.local, "packet on unknown listener");
            continue;
        };
        let gateway = gateway.clone();
        tokio::spawn(async move {
            handle_packet(&gateway, leg, packet).await;
        });
    }
    Ok(())
}

#[instrument(name = "handle_packet", skip(gateway, packet), fields(%leg, transport = %packet.transport, peer = %packet.peer))]
async fn handle_packet(gateway: &BalancerGateway, leg: Leg, packet: InboundPacket) {
    match parse_message(&packet.payload) {
        Some(SipMessage::Request(mut request)) => {
            stamp_received(&mut request, packet.peer);
            gateway.handle_request(leg, request).await;
        }
        Some(SipMessage::Response(response)) => gateway.handle_response(leg, response).await,
        None => debug!(len = packet.payload.len(), "dropping unparseable message"),
    }
}

/// Polls the nodes file, reconciling on change and heartbeating its nodes.
fn spawn_nodes_watcher(mut nodes: NodesFile, registry: Arc<NodeRegistry>) {
    tokio::spawn(async move {
        loop {
            match nodes.poll(&registry).await {
                Ok(Some(change)) => info!(
                    joined = change.joined,
                    left = change.left,
                    live = registry.live_count(),
                    "nodes file applied"
                ),
                Ok(None) => {}
                Err(err) => warn!(
                    error = %format!("{err:#}"),
                    path = %nodes.path().display(),
                    "nodes file not applied"
                ),
            }
            time::sleep(NODES_POLL_INTERVAL).await;
        }
    });
}

/// Stands in for transaction timeouts: releases pins of calls gone quiet.
fn spawn_call_sweeper(gateway: Arc<BalancerGateway>) {
    tokio::spawn(async move {
        let mut ticker = time::interval(CALL_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let released = gateway.expire_idle_calls();
            if released > 0 {
                debug!(released, active = gateway.active_calls(), "released idle calls");
            }
        }
    });
}

fn spawn_node_expiry(registry: Arc<NodeRegistry>, max_age: Duration) {
    tokio::spawn(async move {
        let mut ticker = time::interval(max_age.max(NODES_POLL_INTERVAL));
        loop {
            ticker.tick().await;
            let expired = registry.expire_stale(max_age);
            if !expired.is_empty() {
                warn!(count = expired.len(), "expired silent nodes");
            }
        }
    });
}

fn spawn_stats_reporter(gateway: Arc<BalancerGateway>, legs: Arc<LegTransports>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        // the first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let closed = legs.cleanup_idle();
            info!(stats = %gateway.stats(), idle_connections_closed = closed, "balancer stats");
        }
    });
}
