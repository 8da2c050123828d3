mod cli;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = cli::parse_args();
    let config_path = args.resolved_config_path();
    let mut config = shopwatch_config::load_config_or_default(&config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    args.apply_overrides(&mut config);

    info!(
        "tailing {} into checkpoint {}",
        config.source.log_path, config.checkpoint.path
    );
    shopwatch_core::run_pipeline(config).await
}
