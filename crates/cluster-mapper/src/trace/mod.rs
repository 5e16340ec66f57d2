// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::stream::{FuturesOrdered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::origin::OriginResolver;
use crate::retry::duration_serde;
use crate::types::TraceHop;

mod udp;

pub use udp::UdpTracer;

/// Hop limit of the underlying trace primitive. Traces go one further.
pub const DEFAULT_MAX_HOPS: u8 = 64;
pub const DEFAULT_FIRST_HOP: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceOptions {
    pub max_hops: u8,
    pub first_hop: u8,
    /// Extra probes per hop after the first one times out.
    pub retries: usize,
    pub packet_size: usize,
    pub port: u16,
    #[serde(with = "duration_serde")]
    pub hop_timeout: Duration,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_MAX_HOPS + 1,
            first_hop: DEFAULT_FIRST_HOP,
            retries: 0,
            packet_size: 52,
            port: 33434,
            hop_timeout: Duration::from_millis(500),
        }
    }
}

/// Discovers the hops towards a target by raising the TTL of successive probes.
///
/// Hops are sent on `hops` as soon as they are known, in TTL order. The trace is over when the
/// implementation returns and drops its sender.
#[async_trait]
pub trait TraceProbe: Send + Sync + 'static {
    async fn trace(
        &self,
        target: Ipv4Addr,
        options: &TraceOptions,
        hops: mpsc::Sender<TraceHop>,
    ) -> anyhow::Result<()>;
}

/// The hops collected by a trace. A trace that failed part way keeps what it found, alongside
/// the error.
#[derive(Debug)]
pub struct TraceReport {
    pub target: Ipv4Addr,
    pub hops: Vec<TraceHop>,
    pub error: Option<anyhow::Error>,
}

pub struct PathTracer {
    probe: Arc<dyn TraceProbe>,
    resolver: Arc<OriginResolver>,
}

impl PathTracer {
    pub fn new(probe: Arc<dyn TraceProbe>, resolver: Arc<OriginResolver>) -> Self {
        Self { probe, resolver }
    }

    /// Picks the IPv4 address to trace towards `host`.
    pub async fn resolve_target(host: &str) -> anyhow::Result<Ipv4Addr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return match ip {
                IpAddr::V4(ip) => Ok(ip),
                IpAddr::V6(_) => Err(anyhow!("{host} has no IPv4 address")),
            };
        }

        tokio::net::lookup_host((host, 0))
            .await
            .with_context(|| format!("resolving {host}"))?
            .find_map(|addr| match addr.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .ok_or_else(|| anyhow!("{host} has no IPv4 address"))
    }

    /// Traces the path to `target`, enriching every answered hop with its origin.
    pub async fn trace(&self, host: &str, target: Ipv4Addr, options: &TraceOptions) -> TraceReport {
        info!(
            "traceroute to {host} ({target}), {} hops max, {} byte packets",
            options.max_hops, options.packet_size
        );

        let (tx, rx) = mpsc::channel(usize::from(options.max_hops).max(1));
        let collector = tokio::spawn(collect_hops(self.resolver.clone(), rx));

        let traced = self.probe.trace(target, options, tx).await;
        let (hops, collected) = match collector.await {
            Ok(hops) => (hops, Ok(())),
            Err(e) => (vec![], Err(anyhow!("hop collector failed: {e}"))),
        };

        TraceReport {
            target,
            hops,
            error: traced.and(collected).err(),
        }
    }
}

/// Drains the hop channel, enriching hops concurrently while the trace keeps running. Hops come
/// out in the order they were received, no matter which enrichment finishes first.
async fn collect_hops(
    resolver: Arc<OriginResolver>,
    mut rx: mpsc::Receiver<TraceHop>,
) -> Vec<TraceHop> {
    let mut pending = FuturesOrdered::new();
    let mut hops = Vec::new();
    let mut open = true;

    loop {
        tokio::select! {
            hop = rx.recv(), if open => match hop {
                Some(hop) => pending.push_back(enrich(resolver.clone(), hop)),
                None => open = false,
            },

            Some(hop) = pending.next(), if !pending.is_empty() => {
                debug!("{hop}");
                hops.push(hop);
            }

            else => break,
        }
    }

    hops
}

async fn enrich(resolver: Arc<OriginResolver>, mut hop: TraceHop) -> TraceHop {
    if !hop.success {
        return hop;
    }

    match resolver.resolve(hop.address.into()).await {
        Ok(origin) => hop.origin = Some(origin),
        Err(e) => debug!(ttl = hop.ttl, address = %hop.address, "Hop left without origin: {e}"),
    }
    hop
}
