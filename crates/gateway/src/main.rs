use std::sync::Arc;

use ct_gateway::{bootstrap, cli, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_path) = cli::load_config()?;
    let tracer_provider = telemetry::init_tracing(&config.observability);
    tracing::info!(config = %config_path, "convtrace starting");

    let result = run(config).await;

    // Flush spans even when the turn failed.
    telemetry::shutdown(tracer_provider);
    result
}

async fn run(config: ct_domain::config::Config) -> anyhow::Result<()> {
    let runtime = bootstrap::build_runtime(Arc::new(config)).await?;
    cli::demo::run(&runtime).await
}
