// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Listener wiring per leg and the dispatcher that puts rewritten messages
//! back on the wire.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use sip_balancer::{BalancerConfig, Leg, LegConfig, LegDispatcher};
use sip_core::{route, Request, Response, RouteEntry, SipUri, DEFAULT_SIP_PORT};
use sip_parse::{serialize_request, serialize_response};
use sip_transport::{run_tcp, run_udp, send_udp, InboundPacket, StreamPool, TransportKind};
use smol_str::SmolStr;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Where a message goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextHop {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
}

/// Bound sockets of one leg.
struct LegSocket {
    local: SocketAddr,
    udp: Arc<UdpSocket>,
    transport: TransportKind,
}

/// UDP and TCP listeners for both legs plus the outbound side.
pub struct LegTransports {
    external: LegSocket,
    internal: Option<LegSocket>,
    pool: Arc<StreamPool>,
    inbound: mpsc::Sender<InboundPacket>,
}

impl LegTransports {
    /// Binds UDP and TCP on every configured leg and starts their listeners.
    pub async fn start(
        config: &BalancerConfig,
        inbound: mpsc::Sender<InboundPacket>,
    ) -> Result<Arc<Self>> {
        if let Some(internal) = &config.internal {
            if internal.port == config.external.port {
                bail!("external and internal legs need distinct ports");
            }
        }
        let pool = Arc::new(StreamPool::new());
        let external = bind_leg(&config.host, &config.external, &pool, &inbound).await?;
        let internal = match &config.internal {
            Some(leg) => Some(bind_leg(&config.host, leg, &pool, &inbound).await?),
            None => None,
        };
        Ok(Arc::new(Self {
            external,
            internal,
            pool,
            inbound,
        }))
    }

    /// Leg whose listener received a packet.
    pub fn leg_of(&self, local: SocketAddr) -> Option<Leg> {
        if local.port() == self.external.local.port() {
            return Some(Leg::External);
        }
        self.internal
            .as_ref()
            .filter(|internal| internal.local.port() == local.port())
            .map(|_| Leg::Internal)
    }

    pub fn local_addr(&self, leg: Leg) -> SocketAddr {
        self.socket(leg).local
    }

    /// Drops pooled TCP connections that have been idle too long.
    pub fn cleanup_idle(&self) -> usize {
        self.pool.cleanup_idle()
    }

    fn socket(&self, leg: Leg) -> &LegSocket {
        match (leg, &self.internal) {
            (Leg::Internal, Some(internal)) => internal,
            _ => &self.external,
        }
    }

    async fn send(&self, leg: Leg, hop: NextHop, payload: Bytes) -> Result<()> {
        let socket = self.socket(leg);
        let to = resolve(&hop).await?;
        debug!(%leg, %to, transport = %hop.transport, len = payload.len(), "sending");
        match hop.transport {
            TransportKind::Udp => send_udp(&socket.udp, &to, &payload).await,
            TransportKind::Tcp => self.pool.send(to, socket.local, payload, &self.inbound).await,
            other => Err(anyhow!("{other} transport is not supported")),
        }
    }
}

#[async_trait]
impl LegDispatcher for LegTransports {
    async fn send_request(&self, leg: Leg, request: Request) -> Result<()> {
        let hop = request_next_hop(&request, self.socket(leg).transport)?;
        self.send(leg, hop, serialize_request(&request)).await
    }

    async fn send_response(&self, leg: Leg, response: Response) -> Result<()> {
        let hop = response_next_hop(&response)?;
        self.send(leg, hop, serialize_response(&response)).await
    }
}

async fn bind_leg(
    host: &str,
    leg: &LegConfig,
    pool: &Arc<StreamPool>,
    inbound: &mpsc::Sender<InboundPacket>,
) -> Result<LegSocket> {
    let bind = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{}", leg.port)
    } else {
        format!("{host}:{}", leg.port)
    };
    let udp = Arc::new(
        UdpSocket::bind(&bind)
            .await
            .with_context(|| format!("binding udp {bind}"))?,
    );
    let local = udp.local_addr()?;
    let listener = TcpListener::bind(local)
        .await
        .with_context(|| format!("binding tcp {local}"))?;

    tokio::spawn({
        let udp = udp.clone();
        let tx = inbound.clone();
        async move {
            if let Err(e) = run_udp(udp, tx).await {
                error!(%e, %local, "udp listener exited");
            }
        }
    });
    tokio::spawn({
        let pool = pool.clone();
        let tx = inbound.clone();
        async move {
            if let Err(e) = run_tcp(listener, tx, pool).await {
                error!(%e, %local, "tcp listener exited");
            }
        }
    });

    Ok(LegSocket {
        local,
        udp,
        transport: leg.transport,
    })
}

/// Next hop of a request: its top Route, else its Request-URI.
pub fn request_next_hop(request: &Request, default_transport: TransportKind) -> Result<NextHop> {
    let route = route::top_value(request.headers(), "Route").and_then(RouteEntry::parse);
    let uri: &SipUri = match &route {
        Some(entry) => entry.uri(),
        None => request
            .uri()
            .as_sip()
            .ok_or_else(|| anyhow!("cannot route to {}", request.uri().as_str()))?,
    };
    let transport = uri
        .transport()
        .and_then(TransportKind::parse)
        .unwrap_or(default_transport);
    Ok(NextHop {
        host: uri.host().to_string(),
        port: uri.port_or_default(),
        transport,
    })
}

/// Next hop of a response: the top Via, honouring `received` and `rport`.
pub fn response_next_hop(response: &Response) -> Result<NextHop> {
    let via = response
        .top_via()
        .ok_or_else(|| anyhow!("response has no Via to route by"))?;
    let host = match via.param("received") {
        Some(Some(received)) => received.to_string(),
        _ => via.host().to_string(),
    };
    let port = match via.param("rport") {
        Some(Some(rport)) => rport.parse().ok(),
        _ => None,
    }
    .or(via.port())
    .unwrap_or(DEFAULT_SIP_PORT);
    let transport = TransportKind::parse(via.transport()).unwrap_or(TransportKind::Udp);
    Ok(NextHop {
        host,
        port,
        transport,
    })
}

/// Records the packet source on the top Via (`received`, and `rport` when
/// the sender asked for it) so responses find their way back.
pub fn stamp_received(request: &mut Request, peer: SocketAddr) {
    let Some(mut via) = request.top_via() else {
        return;
    };
    let source = peer.ip().to_string();
    let mut changed = false;
    if via.host().trim_matches(['[', ']']) != source {
        via.params
            .insert(SmolStr::new("received"), Some(SmolStr::new(&source)));
        changed = true;
    }
    if matches!(via.param("rport"), Some(None)) {
        via.params.insert(
            SmolStr::new("rport"),
            Some(SmolStr::new(peer.port().to_string())),
        );
        changed = true;
    }
    if changed {
        let headers = request.headers_mut();
        route::remove_top_value(headers, "Via");
        headers.prepend("Via", via.to_string());
    }
}

async fn resolve(hop: &NextHop) -> Result<SocketAddr> {
    let host = hop.host.trim_matches(['[', ']']);
    tokio::net::lookup_host((host, hop.port))
        .await
        .with_context(|| format!("resolving {}:{}", hop.host, hop.port))?
        .next()
        .ok_or_else(|| anyhow!("{}:{} did not resolve", hop.host, hop.port))
}
