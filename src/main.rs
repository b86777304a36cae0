mod accounts;
mod api;
mod config;
mod db;
mod engine;
mod error;
mod state;
mod store;
mod types;

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::accounts::{AccountBook, AdminAuth};
use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::{load_entries, DbWriter};
use crate::engine::{Catalog, TransactionEngine, WagerEngine};
use crate::error::Result;
use crate::state::{SiteState, StateChange};
use crate::store::{KvStore, MemoryKv};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", cfg.db_path)).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Store: seeded from SQLite, writes mirrored back by DbWriter ---
    let entries = load_entries(&pool).await?;
    let health = Arc::new(HealthState::new());
    let (write_tx, write_rx) = mpsc::unbounded_channel();
    let kv: Arc<dyn KvStore> = MemoryKv::with_write_behind(entries, write_tx, Arc::clone(&health));

    let writer = DbWriter::new(pool.clone(), write_rx, Arc::clone(&health));
    tokio::spawn(async move { writer.run().await });

    // --- Domain state and engines ---
    let state = SiteState::load(Arc::clone(&kv));
    let accounts = AccountBook::new(Arc::clone(&kv));
    let wagers = Arc::new(WagerEngine::new(Arc::clone(&state), Arc::clone(&accounts)));
    let transactions = Arc::new(TransactionEngine::new(Arc::clone(&state), Arc::clone(&accounts)));
    let catalog = Arc::new(Catalog::new(Arc::clone(&state)));
    let admin = Arc::new(AdminAuth::new(&cfg.admin_username, &cfg.admin_password));
    info!("[ACCOUNTS] {} accounts on record", accounts.account_count());

    // Admin notification feed
    let changes = state.subscribe();
    tokio::spawn(async move { notification_logger(changes).await });

    // HTTP API server
    let api_state = ApiState {
        state,
        accounts,
        admin,
        wagers,
        transactions,
        catalog,
        health,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Logs every new pending transaction so an operator sees it without polling.
async fn notification_logger(mut rx: broadcast::Receiver<StateChange>) {
    loop {
        match rx.recv().await {
            Ok(StateChange::Notification) => info!("[ADMIN] new transaction awaiting review"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("[ADMIN] notification feed lagged, skipped {n} changes");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
