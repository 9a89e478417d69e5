use checkout_core::cli::{self, Cli};
use checkout_core::config::{Config, LogFormat};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Setup logging
    let json = config.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    tracing::info!(
        "Merchant backend: {}, VASP backend: {}{}",
        config.merchant_backend_url,
        config.vasp_backend_url,
        if config.vasp_mock { " (mock)" } else { "" }
    );

    let cli = Cli::parse();
    cli::run(cli, config).await
}
