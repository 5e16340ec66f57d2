// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod cache;
pub mod commands;
pub mod config;
pub mod enumerator;
pub mod error;
pub mod orchestrator;
pub mod origin;
pub mod ping;
pub mod preflight;
pub mod probe;
pub mod retry;
pub mod store;
pub mod task;
pub mod trace;
pub mod types;
pub mod view;

pub use error::{NodeFailure, ProbeError, RunError, StoreError};
pub use orchestrator::{Orchestrator, ProbeOutcome, RunSummary};
pub use origin::{OriginLookup, OriginResolver};
pub use probe::NodeProbe;
pub use store::{RecordReader, RecordStore};
pub use trace::{PathTracer, TraceProbe};
pub use view::QueryView;
