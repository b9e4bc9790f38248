// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `run` command.

use tracing::info;

use crate::cli::{Cli, RunArgs};
use crate::error::BinResult;
use crate::runtime::RuntimeBuilder;

/// Executes the `run` command to start the relay.
pub async fn run(cli: &Cli, args: RunArgs) -> BinResult<()> {
    info!(config = %cli.config.display(), "Starting ua-relay...");

    let runtime = RuntimeBuilder::new()
        .config_path(&cli.config)
        .allow_missing_config(cli.uses_default_config())
        .skip_connect(args.skip_connect)
        .host(args.host)
        .port(args.port)
        .build()?;

    runtime.run().await
}
