use std::sync::Arc;

use mediawatch_api::app::{build_app, services};
use mediawatch_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mediawatch_observability::init();

    let config = ApiConfig::from_env()?;
    let services = Arc::new(services::build_services(&config).await?);

    match config.run_interval {
        Some(every) => {
            tracing::info!(interval_secs = every.as_secs(), "pipeline scheduler enabled");
            services::spawn_scheduler(services.clone(), every);
        }
        None => tracing::warn!("RUN_INTERVAL_SECS=0; runs only happen via POST /runs"),
    }

    let app = build_app(services);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
