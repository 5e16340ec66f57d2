// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::net::IpAddr;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use cluster_mapper::types::{ClusterNode, NodeRecord, OriginInfo, PingResult, TraceHop};

pub fn origin(ip: IpAddr) -> OriginInfo {
    OriginInfo {
        ip,
        asn: 64500,
        name: "EXAMPLE-NET".to_string(),
        country: "NL".to_string(),
        registry: Some("ripencc".to_string()),
        prefix: Some("203.0.113.0/24".to_string()),
        allocated: None,
    }
}

/// A record with `sent` pings of which `lost` went unanswered, the others taking `avg_ms`.
pub fn record(pubkey: &str, avg_ms: u64, sent: usize, lost: usize) -> NodeRecord {
    let ip: IpAddr = "203.0.113.7".parse().unwrap();
    let rtts = vec![Duration::from_millis(avg_ms); sent - lost];
    NodeRecord {
        node: ClusterNode::new(pubkey).with_gossip("203.0.113.7:8001"),
        origin: origin(ip),
        ping: PingResult::from_rtts(ip, sent, &rtts),
        stake: None,
        traceroute: vec![],
        probed_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
    }
}

pub fn hop(ttl: u8, address: [u8; 4], host: Option<&str>) -> TraceHop {
    TraceHop {
        ttl,
        address: address.into(),
        elapsed: Duration::from_micros(1500 * u64::from(ttl)),
        success: true,
        host: host.map(str::to_string),
        origin: None,
    }
}
