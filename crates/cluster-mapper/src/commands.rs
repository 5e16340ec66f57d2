// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use colored::Colorize;
use inquire::Confirm;

use crate::config::{CollectConfig, ViewConfig, DEFAULT_MAX_LOSS};
use crate::enumerator::{NodeEnumerator, RpcNodeEnumerator};
use crate::error::RunError;
use crate::orchestrator::Orchestrator;
use crate::origin::{CymruWhois, OriginResolver};
use crate::ping::IcmpPinger;
use crate::preflight;
use crate::probe::NodeProbe;
use crate::store::{RecordReader, RecordStore};
use crate::trace::{PathTracer, UdpTracer};
use crate::view::QueryView;

#[derive(Parser, Debug, Clone)]
pub struct CollectArgs {
    /// RPC endpoint node to use.
    #[arg(long)]
    rpc: Option<String>,
    /// Directory where to save the result file.
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Label of the cluster, used to name the result file.
    #[arg(long)]
    cluster: Option<String>,
    /// Number of nodes probed at once.
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,
    /// Ping every node this many times.
    #[arg(long)]
    ping_count: Option<usize>,
    /// How many nodes to map, 0 for all of them.
    #[arg(long)]
    limit: Option<usize>,
    /// JSON file with the collection settings. Flags take precedence over it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Do not ask for confirmation when running without privileges.
    #[arg(short = 'y', long)]
    yes: bool,
}

impl CollectArgs {
    fn to_config(&self) -> Result<CollectConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => CollectConfig::default(),
        };

        if let Some(rpc) = &self.rpc {
            config.rpc = rpc.clone();
        }
        if let Some(dir) = &self.dir {
            config.dir = dir.clone();
        }
        if let Some(cluster) = &self.cluster {
            config.cluster_label = cluster.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(count) = self.ping_count {
            config.ping.count = count;
        }
        if let Some(limit) = self.limit {
            config.limit = limit;
        }
        Ok(config)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ViewArgs {
    /// Results file to view.
    file: Option<PathBuf>,
    /// Print top X results, 0 for all of them.
    #[arg(long, default_value_t = 0)]
    top: usize,
    /// Exclude results whose ping packet loss percentage is greater than this (0 - 100).
    #[arg(long, default_value_t = DEFAULT_MAX_LOSS)]
    max_loss: f64,
}

impl ViewArgs {
    fn to_config(&self) -> Result<ViewConfig> {
        let Some(file) = &self.file else {
            bail!("file not provided");
        };
        Ok(ViewConfig {
            file: file.clone(),
            top: self.top,
            max_loss: self.max_loss,
        })
    }
}

pub async fn collect_cmd(args: &CollectArgs) -> Result<()> {
    let config = args.to_config()?;
    let yes = args.yes;
    collect(&config, preflight::raise_fd_limit(), || {
        if yes || preflight::is_likely_root() {
            return Ok(true);
        }
        println!(
            "{}",
            "You're (most likely) not running this program as a privileged user;".yellow()
        );
        println!("To run traceroute, you need privileges.");
        Ok(
            Confirm::new("Do you want to continue? (even though it most likely won't work)")
                .with_default(false)
                .prompt()?,
        )
    })
    .await
}

/// Runs a collection once the open file limit is known to be sufficient and `confirm` agreed
/// to go on. Nothing is created on disk before both have passed.
async fn collect(
    config: &CollectConfig,
    fd_limit: Option<u64>,
    confirm: impl FnOnce() -> Result<bool>,
) -> Result<()> {
    preflight::ensure_fd_limit(fd_limit, config.min_fd_limit)?;
    if !confirm()? {
        println!("Exiting.");
        return Ok(());
    }

    let started = Instant::now();
    let store = RecordStore::open(config.result_path(&Local::now())).await?;
    let result_path = tokio::fs::canonicalize(store.path())
        .await
        .unwrap_or_else(|_| store.path().to_path_buf());
    let store = Arc::new(store);

    let enumerator = RpcNodeEnumerator::new(&config.rpc)?;
    let nodes = enumerator.nodes().await.map_err(RunError::Enumerate)?;
    let stakes = enumerator.stakes().await.map_err(RunError::Enumerate)?;

    println!("Results will be saved to {}", result_path.display());
    println!("Concurrency: {}", config.concurrency);
    println!("Got {} nodes from RPC", nodes.len());
    println!(
        "Got {} stake ({} current + {} delinquent)",
        stakes.len(),
        stakes.current.len(),
        stakes.delinquent.len()
    );

    let whois = CymruWhois::new(&config.whois_server, config.whois_timeout);
    let resolver = Arc::new(OriginResolver::new(Arc::new(whois), config.retry.clone()));
    let tracer = PathTracer::new(Arc::new(UdpTracer::default()), resolver.clone());
    let probe = NodeProbe::new(
        resolver,
        Arc::new(IcmpPinger),
        tracer,
        store,
        config.ping.clone(),
        config.trace.clone(),
    );

    let summary = Orchestrator::new(Arc::new(probe), config.concurrency)
        .with_limit(config.limit)
        .run(nodes, Arc::new(stakes))
        .await?;

    let took = Duration::from_secs(started.elapsed().as_secs());
    println!(
        "{}",
        format!(
            "Done. Processed {} nodes. Took {}",
            summary.submitted,
            humantime::format_duration(took)
        )
        .green()
    );
    if !summary.failures.is_empty() {
        println!(
            "{} of them failed, {} recorded",
            summary.failures.len(),
            summary.recorded
        );
    }
    println!("Results successfully saved to: {}", result_path.display());
    Ok(())
}

pub fn view_cmd(args: &ViewArgs) -> Result<()> {
    let started = Instant::now();
    let config = args.to_config()?;

    let reader = RecordReader::open(&config.file)?;
    let mut view = QueryView::from(&config);
    view.top = view.top.min(reader.count()?);
    view.print(&reader)?;

    println!(
        "took {}",
        humantime::format_duration(Duration::from_millis(started.elapsed().as_millis() as u64))
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MIN_FD_LIMIT;

    #[test]
    fn collect_flags_override_defaults() {
        let args = CollectArgs::parse_from(["collect", "-c", "4", "--limit", "12", "--yes"]);
        let config = args.to_config().unwrap();

        assert!(args.yes);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.limit, 12);
        assert_eq!(config.ping.count, CollectConfig::default().ping.count);
    }

    #[test]
    fn collect_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"{ "concurrency": 2, "cluster_label": "testnet" }"#)
            .unwrap();
        let path = file.path().to_str().unwrap();

        let args = CollectArgs::parse_from(["collect", "--config", path, "--ping-count", "3"]);
        let config = args.to_config().unwrap();

        assert_eq!(config.concurrency, 2);
        assert_eq!(config.cluster_label, "testnet");
        assert_eq!(config.ping.count, 3);
    }

    #[tokio::test]
    async fn low_fd_limit_stops_before_anything_else() {
        let dir = tempfile::tempdir().unwrap();
        let config = CollectConfig {
            dir: dir.path().to_path_buf(),
            // Never reached.
            rpc: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        };

        let error = collect(&config, Some(100), || panic!("asked for confirmation"))
            .await
            .unwrap_err();

        assert!(matches!(
            error.downcast_ref::<RunError>(),
            Some(RunError::FdLimitTooLow {
                limit: 100,
                required: DEFAULT_MIN_FD_LIMIT
            })
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn declining_leaves_no_result_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = CollectConfig {
            dir: dir.path().to_path_buf(),
            rpc: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        };

        collect(&config, Some(65536), || Ok(false)).await.unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn view_requires_a_file() {
        let args = ViewArgs::parse_from(["view", "--top", "3"]);
        let error = args.to_config().unwrap_err();
        assert_eq!(error.to_string(), "file not provided");

        let args = ViewArgs::parse_from(["view", "run.json", "--max-loss", "1.5"]);
        let config = args.to_config().unwrap();
        assert_eq!(config.file, PathBuf::from("run.json"));
        assert_eq!(config.max_loss, 1.5);
        assert_eq!(config.top, 0);
    }
}
