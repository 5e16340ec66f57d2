// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::error::{NodeFailure, ProbeError, RunError};
use crate::preflight;
use crate::probe::NodeProbe;
use crate::task::TrySpawnStreamExt;
use crate::types::{ClusterNode, NodeRecord, StakeTable};

/// The result of one node's probe, as seen by the orchestrator.
pub enum ProbeOutcome {
    Recorded(Box<NodeRecord>),
    Failed(NodeFailure),
}

/// What a collection run got through.
#[derive(Debug)]
pub struct RunSummary {
    /// Nodes handed to a probe, after the limit was applied.
    pub submitted: usize,
    pub recorded: usize,
    pub failures: Vec<NodeFailure>,
    pub elapsed: Duration,
}

/// Fans a node list out over a bounded number of concurrent [`NodeProbe`]s.
pub struct Orchestrator {
    probe: Arc<NodeProbe>,
    concurrency: usize,
    limit: usize,
    min_fd_limit: Option<u64>,
}

impl Orchestrator {
    pub fn new(probe: Arc<NodeProbe>, concurrency: usize) -> Self {
        Self {
            probe,
            concurrency: concurrency.max(1),
            limit: 0,
            min_fd_limit: None,
        }
    }

    /// Only probe the first `limit` nodes. `0` means all of them.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Refuse to start unless the open file limit is above `required`.
    pub fn with_min_fd_limit(mut self, required: u64) -> Self {
        self.min_fd_limit = Some(required);
        self
    }

    /// Probes every node and waits for all of them to finish.
    ///
    /// Node level failures are logged and reported in the summary. Only a failure to persist a
    /// record stops the run: nodes still queued are not started, those in flight are waited for.
    pub async fn run(
        &self,
        mut nodes: Vec<ClusterNode>,
        stakes: Arc<StakeTable>,
    ) -> Result<RunSummary, RunError> {
        if let Some(required) = self.min_fd_limit {
            preflight::check_fd_limit(required)?;
        }

        if self.limit > 0 {
            nodes.truncate(self.limit);
        }
        let submitted = nodes.len();
        let started = Instant::now();

        info!(
            nodes = submitted,
            concurrency = self.concurrency,
            "Starting collection"
        );

        let outcomes = tokio_stream::iter(nodes.into_iter().enumerate())
            .try_collect_spawned(self.concurrency, |(i, node)| {
                let probe = self.probe.clone();
                let stakes = stakes.clone();
                async move {
                    info!("Processing node {}/{submitted}", i + 1);
                    let outcome = match probe.probe(&node, &stakes).await {
                        Ok(record) => ProbeOutcome::Recorded(Box::new(record)),
                        Err(ProbeError::Persist(source)) => {
                            return Err(RunError::Store {
                                node: node.pubkey,
                                source,
                            });
                        }
                        Err(error) => {
                            let failure = NodeFailure {
                                node: node.pubkey,
                                error,
                            };
                            error!(node = %failure.node, "{failure}");
                            ProbeOutcome::Failed(failure)
                        }
                    };
                    Ok(outcome)
                }
            })
            .await?;

        let mut recorded = 0;
        let mut failures = vec![];
        for outcome in outcomes {
            match outcome {
                ProbeOutcome::Recorded(_) => recorded += 1,
                ProbeOutcome::Failed(failure) => failures.push(failure),
            }
        }

        let summary = RunSummary {
            submitted,
            recorded,
            failures,
            elapsed: Duration::from_millis(started.elapsed().as_millis() as u64),
        };
        info!(
            recorded = summary.recorded,
            failed = summary.failures.len(),
            "Collection finished in {}",
            humantime::format_duration(summary.elapsed)
        );
        Ok(summary)
    }
}
