// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::types::{ClusterNode, StakeTable};

/// Source of the nodes to probe, and of the stake associated with them. Queried once per run.
#[async_trait]
pub trait NodeEnumerator: Send + Sync + 'static {
    async fn nodes(&self) -> anyhow::Result<Vec<ClusterNode>>;

    async fn stakes(&self) -> anyhow::Result<StakeTable>;
}

/// Queries a cluster RPC node over JSON-RPC 2.0.
pub struct RpcNodeEnumerator {
    url: String,
    client: Client,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl RpcNodeEnumerator {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            url: url.into(),
            client: Client::builder().build()?,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str) -> anyhow::Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, url = %self.url, "RPC request");

        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "jsonrpc": "2.0", "id": id, "method": method }))
            .send()
            .await
            .with_context(|| format!("sending {method} to {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("{method} failed with HTTP status {status}");
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .with_context(|| format!("decoding {method} response"))?;

        match body {
            RpcResponse {
                error: Some(RpcErrorObject { code, message }),
                ..
            } => bail!("{method} failed: {message} (code {code})"),
            RpcResponse {
                result: Some(result),
                ..
            } => Ok(result),
            _ => bail!("{method} returned neither a result nor an error"),
        }
    }
}

#[async_trait]
impl NodeEnumerator for RpcNodeEnumerator {
    async fn nodes(&self) -> anyhow::Result<Vec<ClusterNode>> {
        self.call("getClusterNodes").await
    }

    async fn stakes(&self) -> anyhow::Result<StakeTable> {
        self.call("getVoteAccounts").await
    }
}
