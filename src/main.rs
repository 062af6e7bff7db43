use pairwire::{app, config::Config, shutdown_signal, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pairwire=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    let app = app(AppState::new(), &config)?;

    let addr = config.addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("pairwire v{} listening on {addr}", env!("CARGO_PKG_VERSION"));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(tokio::signal::ctrl_c()))
        .await?;

    Ok(())
}
