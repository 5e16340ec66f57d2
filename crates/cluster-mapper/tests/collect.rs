// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use cluster_mapper::ping::{PingOptions, Pinger};
use cluster_mapper::trace::TraceOptions;
use cluster_mapper::types::{ClusterNode, OriginInfo, PingResult, StakeTable, TraceHop};
use cluster_mapper::{
    NodeProbe, Orchestrator, OriginLookup, OriginResolver, PathTracer, ProbeError, RecordReader,
    RecordStore, RunError, TraceProbe,
};
use tokio::sync::mpsc;

mod common;

struct FixedLookup;

#[async_trait]
impl OriginLookup for FixedLookup {
    async fn lookup(&self, ip: IpAddr) -> anyhow::Result<OriginInfo> {
        Ok(common::origin(ip))
    }
}

/// Answers after `delay`, except for the addresses in `unreachable`, and keeps track of how
/// many pings are running at once.
#[derive(Default)]
struct FakePinger {
    delay: Duration,
    unreachable: HashSet<IpAddr>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Pinger for FakePinger {
    async fn ping(&self, addr: IpAddr, options: &PingOptions) -> anyhow::Result<PingResult> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.unreachable.contains(&addr) {
            bail!("timeout after {:?}", options.timeout);
        }
        Ok(PingResult::from_rtts(
            addr,
            options.count,
            &vec![Duration::from_millis(20); options.count],
        ))
    }
}

/// A two hop path: a private router, then the target itself.
struct TwoHops;

#[async_trait]
impl TraceProbe for TwoHops {
    async fn trace(
        &self,
        target: Ipv4Addr,
        _options: &TraceOptions,
        hops: mpsc::Sender<TraceHop>,
    ) -> anyhow::Result<()> {
        hops.send(common::hop(1, [192, 168, 0, 1], Some("router.lan")))
            .await?;
        hops.send(common::hop(2, target.octets(), None)).await?;
        Ok(())
    }
}

async fn orchestrator(
    store_path: &Path,
    pinger: Arc<FakePinger>,
    concurrency: usize,
) -> (Orchestrator, Arc<RecordStore>) {
    let resolver = Arc::new(OriginResolver::new(
        Arc::new(FixedLookup),
        Default::default(),
    ));
    let tracer = PathTracer::new(Arc::new(TwoHops), resolver.clone());
    let store = Arc::new(RecordStore::open(store_path).await.unwrap());
    let probe = NodeProbe::new(
        resolver,
        pinger,
        tracer,
        store.clone(),
        PingOptions {
            count: 5,
            ..Default::default()
        },
        TraceOptions::default(),
    );
    (Orchestrator::new(Arc::new(probe), concurrency), store)
}

fn node(i: usize) -> ClusterNode {
    ClusterNode::new(format!("node-{i}")).with_gossip(format!("203.0.113.{i}:8001"))
}

#[tokio::test(start_paused = true)]
async fn one_record_out_of_three_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let pinger = Arc::new(FakePinger {
        delay: Duration::from_millis(10),
        unreachable: HashSet::from(["198.51.100.1".parse().unwrap()]),
        ..Default::default()
    });
    let (orchestrator, store) = orchestrator(&dir.path().join("run.json"), pinger, 2).await;

    let nodes = vec![
        ClusterNode::new("no-endpoint"),
        ClusterNode::new("unreachable").with_tpu("198.51.100.1:8003"),
        ClusterNode::new("healthy").with_gossip("203.0.113.7:8001"),
    ];
    let summary = orchestrator
        .run(nodes, Arc::new(StakeTable::default()))
        .await
        .unwrap();

    assert_eq!(summary.submitted, 3);
    assert_eq!(summary.recorded, 1);
    assert_eq!(summary.failures.len(), 2);
    for failure in &summary.failures {
        match failure.node.as_str() {
            "no-endpoint" => assert!(matches!(failure.error, ProbeError::NoEndpoint)),
            "unreachable" => assert!(matches!(failure.error, ProbeError::Ping { .. })),
            other => panic!("unexpected failure for {other}: {failure}"),
        }
    }

    assert_eq!(store.count().await.unwrap(), 1);
    let records: Vec<_> = RecordReader::open(store.path())
        .unwrap()
        .records()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let record = &records[0];
    assert_eq!(record.node.pubkey, "healthy");
    assert_eq!(record.ping.packets_sent, 5);
    assert_eq!(record.traceroute.len(), 2);
    assert_eq!(record.hops_answered(), 2);
    assert_eq!(record.hops_named(), 1);
    assert!(record.traceroute.iter().all(|hop| hop.origin.is_some()));
}

#[tokio::test(start_paused = true)]
async fn never_more_than_concurrency_probes_at_once() {
    let dir = tempfile::tempdir().unwrap();
    let pinger = Arc::new(FakePinger {
        delay: Duration::from_millis(100),
        ..Default::default()
    });
    let (orchestrator, store) =
        orchestrator(&dir.path().join("run.json"), pinger.clone(), 3).await;

    let summary = orchestrator
        .run((0..12).map(node).collect(), Arc::new(StakeTable::default()))
        .await
        .unwrap();

    assert_eq!(summary.recorded, 12);
    assert_eq!(pinger.peak.load(Ordering::SeqCst), 3);
    assert_eq!(store.count().await.unwrap(), 12);
}

#[tokio::test(start_paused = true)]
async fn failures_do_not_stop_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let unreachable = (0..10)
        .filter(|i| i % 2 == 0)
        .map(|i| format!("203.0.113.{i}").parse().unwrap())
        .collect();
    let pinger = Arc::new(FakePinger {
        delay: Duration::from_millis(10),
        unreachable,
        ..Default::default()
    });
    let (orchestrator, store) = orchestrator(&dir.path().join("run.json"), pinger, 4).await;

    let summary = orchestrator
        .run((0..10).map(node).collect(), Arc::new(StakeTable::default()))
        .await
        .unwrap();

    assert_eq!(summary.recorded, 5);
    assert_eq!(summary.failures.len(), 5);

    let mut recorded: Vec<_> = RecordReader::open(store.path())
        .unwrap()
        .records()
        .unwrap()
        .map(|record| record.unwrap().node.pubkey)
        .collect();
    recorded.sort();
    assert_eq!(recorded, ["node-1", "node-3", "node-5", "node-7", "node-9"]);
}

#[tokio::test(start_paused = true)]
async fn limit_bounds_submitted_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let (orchestrator, store) = orchestrator(
        &dir.path().join("run.json"),
        Arc::new(FakePinger::default()),
        2,
    )
    .await;

    let summary = orchestrator
        .with_limit(3)
        .run((0..8).map(node).collect(), Arc::new(StakeTable::default()))
        .await
        .unwrap();

    assert_eq!(summary.submitted, 3);
    assert_eq!(store.count().await.unwrap(), 3);
}

#[cfg(target_os = "linux")]
#[tokio::test(start_paused = true)]
async fn persistence_failure_stops_the_run() {
    // Every write to /dev/full fails with ENOSPC.
    let (orchestrator, _store) = orchestrator(
        Path::new("/dev/full"),
        Arc::new(FakePinger::default()),
        1,
    )
    .await;

    let error = orchestrator
        .run((0..5).map(node).collect(), Arc::new(StakeTable::default()))
        .await
        .unwrap_err();

    assert!(matches!(error, RunError::Store { .. }), "{error}");
}

#[cfg(target_os = "linux")]
#[tokio::test(start_paused = true)]
async fn insufficient_fd_limit_probes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let pinger = Arc::new(FakePinger::default());
    let (orchestrator, store) =
        orchestrator(&dir.path().join("run.json"), pinger.clone(), 2).await;

    let error = orchestrator
        .with_min_fd_limit(u64::MAX)
        .run((0..4).map(node).collect(), Arc::new(StakeTable::default()))
        .await
        .unwrap_err();

    assert!(matches!(error, RunError::FdLimitTooLow { .. }), "{error}");
    assert_eq!(pinger.peak.load(Ordering::SeqCst), 0);
    assert_eq!(store.count().await.unwrap(), 0);
}
