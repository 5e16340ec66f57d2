// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A node as reported by the cluster directory. Connection endpoints are `host:port` strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNode {
    pub pubkey: String,
    #[serde(default)]
    pub gossip: Option<String>,
    #[serde(default)]
    pub tpu: Option<String>,
    #[serde(default)]
    pub rpc: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub shred_version: Option<u16>,
}

impl ClusterNode {
    pub fn new(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            gossip: None,
            tpu: None,
            rpc: None,
            version: None,
            shred_version: None,
        }
    }

    pub fn with_gossip(mut self, gossip: impl Into<String>) -> Self {
        self.gossip = Some(gossip.into());
        self
    }

    pub fn with_tpu(mut self, tpu: impl Into<String>) -> Self {
        self.tpu = Some(tpu.into());
        self
    }

    /// The endpoint used to reach this node: gossip if advertised, otherwise TPU.
    pub fn endpoint(&self) -> Option<&str> {
        self.gossip.as_deref().or(self.tpu.as_deref())
    }
}

/// Network origin of an address: who announces it and from where.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginInfo {
    pub ip: IpAddr,
    pub asn: u32,
    pub name: String,
    pub country: String,
    #[serde(default)]
    pub registry: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub allocated: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    pub addr: IpAddr,
    pub packets_sent: usize,
    pub packets_recv: usize,
    /// Percentage of sent packets that went unanswered, `0.0..=100.0`.
    pub packet_loss: f64,
    pub min_rtt: Duration,
    pub avg_rtt: Duration,
    pub max_rtt: Duration,
    pub std_dev_rtt: Duration,
}

impl PingResult {
    /// Summarise a run of `sent` echo requests given the round trip times of the answered ones.
    pub fn from_rtts(addr: IpAddr, sent: usize, rtts: &[Duration]) -> Self {
        let recv = rtts.len();
        let packet_loss = if sent == 0 {
            0.0
        } else {
            (sent - recv.min(sent)) as f64 / sent as f64 * 100.0
        };

        if rtts.is_empty() {
            return Self {
                addr,
                packets_sent: sent,
                packets_recv: 0,
                packet_loss,
                min_rtt: Duration::ZERO,
                avg_rtt: Duration::ZERO,
                max_rtt: Duration::ZERO,
                std_dev_rtt: Duration::ZERO,
            };
        }

        let total: Duration = rtts.iter().sum();
        let avg_rtt = total / recv as u32;
        let mean = avg_rtt.as_secs_f64();
        let variance = rtts
            .iter()
            .map(|rtt| (rtt.as_secs_f64() - mean).powi(2))
            .sum::<f64>()
            / recv as f64;

        Self {
            addr,
            packets_sent: sent,
            packets_recv: recv,
            packet_loss,
            min_rtt: rtts.iter().copied().min().unwrap_or_default(),
            avg_rtt,
            max_rtt: rtts.iter().copied().max().unwrap_or_default(),
            std_dev_rtt: Duration::from_secs_f64(variance.sqrt()),
        }
    }
}

/// One hop discovered while tracing the path to a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceHop {
    /// Time-to-live the probe was sent with, 1-based.
    pub ttl: u8,
    pub address: Ipv4Addr,
    pub elapsed: Duration,
    pub success: bool,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub origin: Option<OriginInfo>,
}

impl TraceHop {
    /// A hop for which no answer arrived before the timeout.
    pub fn unanswered(ttl: u8, elapsed: Duration) -> Self {
        Self {
            ttl,
            address: Ipv4Addr::UNSPECIFIED,
            elapsed,
            success: false,
            host: None,
            origin: None,
        }
    }
}

impl fmt::Display for TraceHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.success {
            return write!(f, "{:<3} *", self.ttl);
        }
        let addr = self.address.to_string();
        let host = self.host.as_deref().unwrap_or(&addr);
        write!(
            f,
            "{:<3} {host} ({addr})  {}",
            self.ttl,
            humantime::format_duration(self.elapsed)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StakeStatus {
    Current,
    Delinquent,
}

/// A vote account as listed by the cluster, linked to its node by `node_pubkey`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteAccount {
    pub vote_pubkey: String,
    pub node_pubkey: String,
    pub activated_stake: u64,
    #[serde(default)]
    pub commission: u8,
    #[serde(default)]
    pub epoch_vote_account: bool,
    #[serde(default)]
    pub last_vote: u64,
    #[serde(default)]
    pub root_slot: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeInfo {
    pub status: StakeStatus,
    #[serde(flatten)]
    pub account: VoteAccount,
}

/// Current and delinquent vote accounts, fetched once per collection run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeTable {
    pub current: Vec<VoteAccount>,
    pub delinquent: Vec<VoteAccount>,
}

impl StakeTable {
    /// Looks up the vote account of a node, checking current accounts before delinquent ones.
    pub fn lookup(&self, node_pubkey: &str) -> Option<StakeInfo> {
        let find = |accounts: &[VoteAccount], status| {
            accounts
                .iter()
                .find(|account| account.node_pubkey == node_pubkey)
                .map(|account| StakeInfo {
                    status,
                    account: account.clone(),
                })
        };

        find(&self.current, StakeStatus::Current)
            .or_else(|| find(&self.delinquent, StakeStatus::Delinquent))
    }

    pub fn len(&self) -> usize {
        self.current.len() + self.delinquent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything measured for a single node during a collection run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node: ClusterNode,
    pub origin: OriginInfo,
    pub ping: PingResult,
    pub stake: Option<StakeInfo>,
    pub traceroute: Vec<TraceHop>,
    pub probed_at: DateTime<Utc>,
}

impl NodeRecord {
    pub fn hops_answered(&self) -> usize {
        self.traceroute.iter().filter(|hop| hop.success).count()
    }

    pub fn hops_named(&self) -> usize {
        self.traceroute
            .iter()
            .filter(|hop| hop.host.as_deref().is_some_and(|h| !h.is_empty()))
            .count()
    }
}
