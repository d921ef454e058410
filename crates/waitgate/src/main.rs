// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use waitgate::config::ServerConfig;

#[derive(Parser)]
#[command(name = "waitgate", about = "Virtual waiting room admission-control gateway")]
struct Cli {
    #[command(flatten)]
    server: ServerConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.server.log_level)),
        )
        .init();

    if let Err(e) = waitgate::run(cli.server).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
