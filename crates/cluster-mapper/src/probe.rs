// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::ProbeError;
use crate::origin::OriginResolver;
use crate::ping::{PingOptions, Pinger};
use crate::store::RecordStore;
use crate::trace::{PathTracer, TraceOptions};
use crate::types::{ClusterNode, NodeRecord, StakeTable};

/// Measures a single node and persists the result.
pub struct NodeProbe {
    resolver: Arc<OriginResolver>,
    pinger: Arc<dyn Pinger>,
    tracer: PathTracer,
    store: Arc<RecordStore>,
    ping: PingOptions,
    trace: TraceOptions,
}

impl NodeProbe {
    pub fn new(
        resolver: Arc<OriginResolver>,
        pinger: Arc<dyn Pinger>,
        tracer: PathTracer,
        store: Arc<RecordStore>,
        ping: PingOptions,
        trace: TraceOptions,
    ) -> Self {
        Self {
            resolver,
            pinger,
            tracer,
            store,
            ping,
            trace,
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Resolves, pings and traces `node`, then appends its record to the store.
    ///
    /// A missing trace is not an error: the record is written with whatever hops were found.
    pub async fn probe(
        &self,
        node: &ClusterNode,
        stakes: &StakeTable,
    ) -> Result<NodeRecord, ProbeError> {
        let endpoint = node.endpoint().ok_or(ProbeError::NoEndpoint)?;
        let host = split_host(endpoint)?;

        let origin = self
            .resolver
            .resolve_host(host)
            .await
            .map_err(|source| ProbeError::OriginResolution {
                host: host.to_string(),
                source,
            })?;

        let ping = self
            .pinger
            .ping(origin.ip, &self.ping)
            .await
            .map_err(|source| ProbeError::Ping {
                host: host.to_string(),
                source,
            })?;
        debug!(
            node = %node.pubkey,
            avg = ?ping.avg_rtt,
            loss = ping.packet_loss,
            "Pinged {host}"
        );

        let stake = stakes.lookup(&node.pubkey);

        let traceroute = match PathTracer::resolve_target(host).await {
            Ok(target) => {
                let report = self.tracer.trace(host, target, &self.trace).await;
                if let Some(e) = &report.error {
                    warn!(node = %node.pubkey, "Trace to {host} incomplete: {e:#}");
                }
                report.hops
            }
            Err(e) => {
                warn!(node = %node.pubkey, "Skipping trace: {e:#}");
                vec![]
            }
        };

        let record = NodeRecord {
            node: node.clone(),
            origin,
            ping,
            stake,
            traceroute,
            probed_at: Utc::now(),
        };

        self.store.append(&record).await?;
        Ok(record)
    }
}

/// Splits the host out of a `host:port` endpoint. IPv6 hosts must be bracketed.
pub fn split_host(endpoint: &str) -> Result<&str, ProbeError> {
    let malformed = |reason: &str| ProbeError::MalformedEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| malformed("missing ']' in address"))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| malformed("missing port in address"))?;
        (host, port)
    } else {
        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| malformed("missing port in address"))?;
        if host.contains(':') {
            return Err(malformed("too many colons in address"));
        }
        (host, port)
    };

    if port.is_empty() || port.parse::<u16>().is_err() {
        return Err(malformed("invalid port"));
    }
    if host.is_empty() {
        return Err(malformed("missing host"));
    }
    Ok(host)
}
