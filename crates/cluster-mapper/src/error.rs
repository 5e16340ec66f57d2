// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::retry::RetryError;

/// Errors that abort the probe of a single node.
///
/// Every variant except [`ProbeError::Persist`] only affects the node being probed; the
/// orchestrator logs them and moves on. Losing the ability to persist records invalidates the
/// whole run, so that variant is escalated instead.
#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    #[error("node advertises neither a gossip nor a TPU endpoint")]
    NoEndpoint,

    #[error("malformed endpoint {endpoint:?}: {reason}")]
    MalformedEndpoint { endpoint: String, reason: String },

    #[error("failed to resolve origin of {host}: {source}")]
    OriginResolution {
        host: String,
        #[source]
        source: ResolveError,
    },

    #[error("ping to {host} failed: {source}")]
    Ping {
        host: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist record: {0}")]
    Persist(#[from] StoreError),
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("{0} is not an IP address")]
    NotAnAddress(String),

    #[error(transparent)]
    Exhausted(#[from] RetryError<anyhow::Error>),
}

/// Errors that abort a whole collection run.
#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error(
        "open file descriptor limit is too low ({limit}, need at least {required}); \
         use `ulimit -n 65536` to increase it"
    )]
    FdLimitTooLow { limit: u64, required: u64 },

    #[error("record store failure while probing node {node}: {source}")]
    Store {
        node: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to enumerate cluster nodes: {0}")]
    Enumerate(#[source] anyhow::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize record: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("malformed record on line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| StoreError::Io { path, source }
    }
}

/// A node-level failure, tagged with the node it happened to.
#[derive(Debug)]
pub struct NodeFailure {
    pub node: String,
    pub error: ProbeError,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error while processing {} node: {}", self.node, self.error)
    }
}
