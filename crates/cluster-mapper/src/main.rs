// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::Parser;
use cluster_mapper::commands::{collect_cmd, view_cmd, CollectArgs, ViewArgs};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    FmtSubscriber,
};

#[derive(Parser, Debug)]
#[command(author = "build@mystenlabs.com", version, about, long_about = None)]
pub(crate) struct ClusterMapperArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Command {
    /// Probe every node of the cluster and save the measurements.
    #[clap(aliases = ["map", "c"])]
    Collect(CollectArgs),
    /// Rank the nodes of a results file by latency.
    #[clap(aliases = ["v"])]
    View(ViewArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let args = ClusterMapperArgs::parse();
    match args.command {
        Command::Collect(args) => collect_cmd(&args).await?,
        Command::View(args) => view_cmd(&args)?,
    }

    Ok(())
}
