// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! ua-relay binary entry point.

use relay_bin::cli::Cli;
use relay_bin::error::{report_error_and_exit, BinError};
use relay_bin::{commands, init_logging};

fn main() {
    let cli = Cli::parse_args();

    let (level, format) = match relay_config::load_config(&cli.config) {
        Ok(config) => (
            config.logging.level.as_str().to_string(),
            cli.effective_log_format(config.logging.format),
        ),
        Err(_) => (
            "info".to_string(),
            cli.effective_log_format(relay_config::LogFormat::default()),
        ),
    };
    init_logging(cli.effective_log_level(&level), format);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => report_error_and_exit(BinError::init(format!("tokio runtime: {e}"))),
    };

    if let Err(e) = runtime.block_on(commands::execute(cli)) {
        report_error_and_exit(e);
    }
}
