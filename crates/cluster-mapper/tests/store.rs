// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::ops::ControlFlow;

use cluster_mapper::types::{StakeInfo, StakeStatus, VoteAccount};
use cluster_mapper::{RecordReader, RecordStore};
use pretty_assertions::assert_eq;

mod common;

#[tokio::test]
async fn records_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::open(dir.path().join("run.json")).await.unwrap();

    // Nothing optional filled in.
    let bare = common::record("bare", 17, 25, 3);

    let mut full = common::record("full", 42, 10, 0);
    full.node.tpu = Some("203.0.113.7:8003".to_string());
    full.node.version = Some("1.18.0".to_string());
    full.stake = Some(StakeInfo {
        status: StakeStatus::Current,
        account: VoteAccount {
            vote_pubkey: "vote-full".to_string(),
            node_pubkey: "full".to_string(),
            activated_stake: 1_000_000,
            commission: 7,
            epoch_vote_account: true,
            last_vote: 250_000_000,
            root_slot: 249_999_968,
        },
    });
    let mut enriched = common::hop(2, [198, 51, 100, 1], Some("edge.example"));
    enriched.origin = Some(common::origin("198.51.100.1".parse().unwrap()));
    full.traceroute = vec![
        common::hop(1, [192, 168, 0, 1], None),
        cluster_mapper::types::TraceHop::unanswered(2, std::time::Duration::from_millis(500)),
        enriched,
    ];

    store.append(&bare).await.unwrap();
    store.append(&full).await.unwrap();

    let reader = RecordReader::open(store.path()).unwrap();
    let mut read = vec![];
    reader
        .iterate(|record| {
            read.push(record);
            ControlFlow::Continue(())
        })
        .unwrap();

    assert_eq!(read, vec![bare, full]);
    assert_eq!(reader.count().unwrap(), 2);
}

#[tokio::test]
async fn loss_percentages_survive_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::open(dir.path().join("run.json")).await.unwrap();

    // 14 of 15 lost is 93.333..%, 2 of 13 lost is 15.38..%: neither has a short decimal form.
    let mut written = vec![];
    for (sent, lost) in [(15, 14), (13, 2), (7, 3), (200, 1)] {
        let record = common::record(&format!("lossy-{sent}-{lost}"), 25, sent, lost);
        store.append(&record).await.unwrap();
        written.push(record);
    }

    let read: Vec<_> = RecordReader::open(store.path())
        .unwrap()
        .records()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    for (read, written) in read.iter().zip(&written) {
        assert_eq!(
            read.ping.packet_loss.to_bits(),
            written.ping.packet_loss.to_bits()
        );
    }
    assert_eq!(read, written);
}
