use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agritrust_common::credential::CredentialIssuer;
use agritrust_common::memory_store::MemoryStore;
use agritrust_common::record_store::RecordStore;
use agritrust_node::config::Cli;
use agritrust_node::pg_store::PgStore;
use agritrust_node::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,agritrust_node=debug")),
        )
        .init();

    let cli = Cli::parse();
    let issuer = CredentialIssuer::new(cli.public_origin.clone())?;

    let store: Arc<dyn RecordStore> = match cli.database_url.as_deref() {
        Some(url) => {
            let pg = PgStore::connect(&cli, url)?;
            if cli.skip_migrations {
                info!("skipping schema migration");
            } else {
                pg.migrate().await?;
            }
            Arc::new(pg)
        }
        None => {
            warn!("no DATABASE_URL set, records are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    info!(origin = issuer.origin(), "issuing credentials");
    let app = router(AppState::new(store, issuer));

    let listener = TcpListener::bind(cli.listen).await?;
    info!(addr = %cli.listen, "agritrust-node listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("agritrust-node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
