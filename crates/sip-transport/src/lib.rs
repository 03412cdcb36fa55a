// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Socket plumbing for the balancer legs.
//!
//! Every listener pushes [`InboundPacket`]s into one `mpsc` channel. The
//! packet records the local address it arrived on so the consumer can tell
//! the external leg from the internal one.

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use sip_observe::{span_with_transport, transport_metrics};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};

pub mod pool;

pub use pool::StreamPool;

/// Upper bound on buffered, not yet framed stream data per connection.
pub const MAX_BUFFER_SIZE: usize = 256 * 1024;

/// Transport a message travels over.
///
/// Only UDP and TCP have listeners; TLS and SCTP exist so nodes advertising
/// them can be registered and matched against Route hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Udp,
    Tcp,
    Tls,
    Sctp,
}

impl TransportKind {
    /// Lowercase label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Udp => "udp",
            TransportKind::Tcp => "tcp",
            TransportKind::Tls => "tls",
            TransportKind::Sctp => "sctp",
        }
    }

    /// Token used in Via headers and `transport=` URI parameters.
    ///
    /// ```
    /// use sip_transport::TransportKind;
    /// assert_eq!(TransportKind::Tcp.via_transport(), "TCP");
    /// ```
    pub fn via_transport(&self) -> &'static str {
        match self {
            TransportKind::Udp => "UDP",
            TransportKind::Tcp => "TCP",
            TransportKind::Tls => "TLS",
            TransportKind::Sctp => "SCTP",
        }
    }

    /// Parses a transport token ignoring case and surrounding whitespace.
    ///
    /// ```
    /// use sip_transport::TransportKind;
    /// assert_eq!(TransportKind::parse(" udp "), Some(TransportKind::Udp));
    /// assert_eq!(TransportKind::parse("ws"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Some(TransportKind::Udp),
            "tcp" => Some(TransportKind::Tcp),
            "tls" => Some(TransportKind::Tls),
            "sctp" => Some(TransportKind::Sctp),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.via_transport())
    }
}

/// A frame received by one of the listeners.
#[derive(Debug, Clone)]
pub struct InboundPacket {
    pub transport: TransportKind,
    /// Address of the listener that received the frame.
    pub local: SocketAddr,
    pub peer: SocketAddr,
    pub payload: Bytes,
}

/// Runs a UDP receive loop and forwards datagrams to `tx`.
pub async fn run_udp(socket: Arc<UdpSocket>, tx: mpsc::Sender<InboundPacket>) -> Result<()> {
    let local = socket.local_addr()?;
    info!(%local, "listening (udp)");
    let mut buf = vec![0u8; 65_535];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, peer)) => {
                if n == buf.len() {
                    transport_metrics().on_error(TransportKind::Udp.as_str(), "truncate");
                    warn!(%peer, max = n, "udp datagram likely truncated");
                }
                transport_metrics().on_packet_received(TransportKind::Udp.as_str());
                let packet = InboundPacket {
                    transport: TransportKind::Udp,
                    local,
                    peer,
                    payload: Bytes::copy_from_slice(&buf[..n]),
                };
                if tx.send(packet).await.is_err() {
                    error!("receiver dropped; shutting down udp loop");
                    transport_metrics().on_error(TransportKind::Udp.as_str(), "dispatch");
                    break;
                }
            }
            Err(e) => {
                error!(%e, "udp recv_from error");
                transport_metrics().on_error(TransportKind::Udp.as_str(), "recv");
            }
        }
    }
    Ok(())
}

/// Sends a UDP datagram from an already bound socket.
pub async fn send_udp(socket: &UdpSocket, to: &SocketAddr, data: &[u8]) -> Result<()> {
    socket.send_to(data, to).await?;
    transport_metrics().on_packet_sent(TransportKind::Udp.as_str());
    Ok(())
}

/// Accepts TCP connections on `listener`.
///
/// Each accepted connection registers its writer in `pool` under the peer
/// address so replies can reuse it.
pub async fn run_tcp(
    listener: TcpListener,
    tx: mpsc::Sender<InboundPacket>,
    pool: Arc<StreamPool>,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!(%local, "listening (tcp)");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(%e, "tcp accept error");
                transport_metrics().on_error(TransportKind::Tcp.as_str(), "accept");
                continue;
            }
        };
        transport_metrics().on_accept(TransportKind::Tcp.as_str());
        let tx = tx.clone();
        let pool = pool.clone();
        let span = span_with_transport("tcp_session", TransportKind::Tcp.as_str());
        tokio::spawn(
            async move {
                let (reader, writer) = stream.into_split();
                let writer_tx = spawn_writer(writer, TransportKind::Tcp);
                pool.register(peer, writer_tx);
                read_frames(reader, TransportKind::Tcp, local, peer, tx).await;
                pool.forget(&peer);
                debug!(%peer, "tcp session closed");
            }
            .instrument(span),
        );
    }
}

/// Spawns a task draining a channel into the write half of a stream.
pub(crate) fn spawn_writer<W>(mut writer: W, transport: TransportKind) -> mpsc::Sender<Bytes>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (writer_tx, mut writer_rx) = mpsc::channel::<Bytes>(64);
    tokio::spawn(async move {
        while let Some(buf) = writer_rx.recv().await {
            if let Err(e) = writer.write_all(&buf).await {
                error!(%e, "stream write error");
                transport_metrics().on_error(transport.as_str(), "write");
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
            transport_metrics().on_packet_sent(transport.as_str());
        }
    });
    writer_tx
}

/// Reads a stream until it closes, pushing every complete SIP frame to `tx`.
pub(crate) async fn read_frames<R>(
    mut reader: R,
    transport: TransportKind,
    local: SocketAddr,
    peer: SocketAddr,
    tx: mpsc::Sender<InboundPacket>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        if buf.len() >= MAX_BUFFER_SIZE {
            warn!(%peer, size = buf.len(), "stream buffer limit exceeded, closing");
            transport_metrics().on_error(transport.as_str(), "overflow");
            break;
        }
        match reader.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                for payload in drain_sip_frames(&mut buf) {
                    transport_metrics().on_packet_received(transport.as_str());
                    let packet = InboundPacket {
                        transport,
                        local,
                        peer,
                        payload,
                    };
                    if tx.send(packet).await.is_err() {
                        error!("receiver dropped; shutting down {} session", transport.as_str());
                        transport_metrics().on_error(transport.as_str(), "dispatch");
                        return;
                    }
                }
            }
            Err(e) => {
                error!(%e, %peer, "stream read error");
                transport_metrics().on_error(transport.as_str(), "read");
                break;
            }
        }
    }
}

/// Splits buffered stream data into complete SIP messages using Content-Length.
pub(crate) fn drain_sip_frames(buf: &mut BytesMut) -> Vec<Bytes> {
    let mut frames = Vec::new();
    loop {
        // CRLF keep-alives between messages
        let skip = buf.iter().take_while(|b| **b == b'\r' || **b == b'\n').count();
        if skip > 0 {
            let _ = buf.split_to(skip);
        }

        let Some(head_end) = memchr::memmem::find(buf.as_ref(), b"\r\n\r\n") else {
            break;
        };

        let content_length = parse_content_length(&buf[..head_end]).unwrap_or(0);
        let needed = head_end + 4 + content_length;
        if buf.len() < needed {
            break;
        }

        frames.push(buf.split_to(needed).freeze());
    }
    frames
}

fn parse_content_length(headers: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(headers).ok()?;
    text.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        let name = name.trim();
        (name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("l"))
            .then(|| value.trim().parse().ok())
            .flatten()
    })
}
