use anyhow::Context;
use db::DBService;
use server::{AppState, app};
use services::services::{config::Config, reconciler::BalanceReconciler};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    utils::logging::init_tracing("info,sqlx=warn");

    let config = Config::from_env().context("loading configuration")?;
    let addr = config.bind_address();
    let reconcile_interval = config.reconcile_interval;

    let db = DBService::new(&config.database_url)
        .await
        .context("opening database")?;
    let state = AppState::new(db, config).context("building form generator")?;

    let reconciler = BalanceReconciler::new(state.ledger.clone(), reconcile_interval).spawn();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(address = %addr, "Listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = reconciler {
        handle.abort();
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
