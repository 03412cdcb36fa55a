// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, Sender};
use tracing::debug;

use crate::{read_frames, spawn_writer, InboundPacket, TransportKind};

const MAX_POOL_SIZE: usize = 1000;
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct PoolEntry {
    sender: Sender<Bytes>,
    last_used: Instant,
}

/// Open TCP connections keyed by remote address.
///
/// Holds both accepted connections and ones the balancer dialled itself, so
/// a reply to a peer reuses whatever connection the peer already has open.
#[derive(Debug)]
pub struct StreamPool {
    streams: DashMap<SocketAddr, PoolEntry>,
    max_size: usize,
    idle_timeout: Duration,
}

impl StreamPool {
    pub fn new() -> Self {
        Self::with_limits(MAX_POOL_SIZE, IDLE_TIMEOUT)
    }

    pub fn with_limits(max_size: usize, idle_timeout: Duration) -> Self {
        Self {
            streams: DashMap::new(),
            max_size,
            idle_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Records the writer of a connection to `peer`.
    pub fn register(&self, peer: SocketAddr, sender: Sender<Bytes>) {
        self.streams.insert(
            peer,
            PoolEntry {
                sender,
                last_used: Instant::now(),
            },
        );
    }

    pub fn forget(&self, peer: &SocketAddr) {
        self.streams.remove(peer);
    }

    /// Drops connections idle for longer than the configured timeout.
    pub fn cleanup_idle(&self) -> usize {
        let before = self.streams.len();
        let timeout = self.idle_timeout;
        self.streams
            .retain(|_, entry| entry.last_used.elapsed() <= timeout && !entry.sender.is_closed());
        before - self.streams.len()
    }

    /// Sends over an existing connection to `to`, dialling one if needed.
    ///
    /// Frames read back on a dialled connection go to `inbound` tagged with
    /// `local`, so responses from nodes re-enter the normal pipeline.
    pub async fn send(
        &self,
        to: SocketAddr,
        local: SocketAddr,
        payload: Bytes,
        inbound: &Sender<InboundPacket>,
    ) -> Result<()> {
        let existing = self.streams.get_mut(&to).map(|mut entry| {
            entry.last_used = Instant::now();
            entry.sender.clone()
        });
        if let Some(sender) = existing {
            if sender.send(payload.clone()).await.is_ok() {
                return Ok(());
            }
            self.streams.remove(&to);
        }

        if self.streams.len() >= self.max_size {
            self.cleanup_idle();
        }
        if self.streams.len() >= self.max_size {
            return Err(anyhow!("stream pool full ({} connections)", self.max_size));
        }

        debug!(peer = %to, "dialling tcp connection");
        let stream = TcpStream::connect(to).await?;
        let (reader, writer) = stream.into_split();
        let sender = spawn_writer(writer, TransportKind::Tcp);
        self.register(to, sender.clone());

        let inbound = inbound.clone();
        tokio::spawn(async move {
            read_frames(reader, TransportKind::Tcp, local, to, inbound).await;
        });

        sender.send(payload).await.map_err(|_| {
            self.streams.remove(&to);
            anyhow!("connection writer closed")
        })
    }
}

impl Default for StreamPool {
    fn default() -> Self {
        Self::new()
    }
}
