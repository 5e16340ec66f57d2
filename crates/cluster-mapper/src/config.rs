// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::origin::CymruWhois;
use crate::ping::PingOptions;
use crate::retry::{duration_serde, RetryPolicy};
use crate::trace::TraceOptions;

pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
pub const DEFAULT_CLUSTER_LABEL: &str = "mainnet-beta";
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_PING_COUNT: usize = 25;
pub const DEFAULT_MIN_FD_LIMIT: u64 = 10_000;
pub const DEFAULT_MAX_LOSS: f64 = 5.0;

const RESULT_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    /// JSON-RPC endpoint the nodes and vote accounts are fetched from.
    pub rpc: String,
    /// Directory the result file is created in.
    pub dir: PathBuf,
    /// Prefix of the result file name.
    pub cluster_label: String,
    pub concurrency: usize,
    /// Probe only the first `limit` nodes, `0` for all of them.
    pub limit: usize,
    /// Collection does not start unless the open file limit is above this.
    pub min_fd_limit: u64,
    pub whois_server: String,
    #[serde(with = "duration_serde")]
    pub whois_timeout: Duration,
    pub ping: PingOptions,
    pub trace: TraceOptions,
    pub retry: RetryPolicy,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            rpc: DEFAULT_RPC_URL.to_string(),
            dir: PathBuf::from("."),
            cluster_label: DEFAULT_CLUSTER_LABEL.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            limit: 0,
            min_fd_limit: DEFAULT_MIN_FD_LIMIT,
            whois_server: CymruWhois::DEFAULT_SERVER.to_string(),
            whois_timeout: Duration::from_secs(10),
            ping: PingOptions {
                count: DEFAULT_PING_COUNT,
                ..Default::default()
            },
            trace: TraceOptions::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl CollectConfig {
    /// `<dir>/<cluster label>_<timestamp>.json`, the timestamp taken in `now`'s time zone.
    pub fn result_path<Tz>(&self, now: &DateTime<Tz>) -> PathBuf
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        self.dir.join(format!(
            "{}_{}.json",
            self.cluster_label,
            now.format(RESULT_TIME_FORMAT)
        ))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewConfig {
    pub file: PathBuf,
    pub top: usize,
    pub max_loss: f64,
}

impl ViewConfig {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            top: 0,
            max_loss: DEFAULT_MAX_LOSS,
        }
    }
}
