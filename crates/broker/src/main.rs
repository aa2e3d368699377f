// SPDX-License-Identifier: BUSL-1.1

use clap::Parser;
use tracing::error;

use glasses_broker::config::BrokerConfig;

#[derive(Parser)]
#[command(name = "glasses-broker", version, about = "Session broker between smart glasses and TPAs.")]
struct Cli {
    #[command(flatten)]
    config: BrokerConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = glasses_broker::run(cli.config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
