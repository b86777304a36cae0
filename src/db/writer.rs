use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::api::health::HealthState;
use crate::db::models::KvRow;
use crate::error::Result;
use crate::store::KvWrite;
use crate::types::now_ms;

/// Reads the whole `kv` table for seeding the in-memory store at startup.
pub async fn load_entries(pool: &sqlx::SqlitePool) -> Result<Vec<(String, Vec<u8>)>> {
    let rows: Vec<KvRow> = sqlx::query_as("SELECT key, value FROM kv")
        .fetch_all(pool)
        .await?;
    info!("[DB] loaded {} records", rows.len());
    Ok(rows.into_iter().map(|r| (r.key, r.value)).collect())
}

/// Receives store mutations and applies them to SQLite in arrival order.
/// Runs as a dedicated background task so request handling never waits on disk.
pub struct DbWriter {
    pool: sqlx::SqlitePool,
    write_rx: mpsc::UnboundedReceiver<KvWrite>,
    health: Arc<HealthState>,
}

impl DbWriter {
    pub fn new(
        pool: sqlx::SqlitePool,
        write_rx: mpsc::UnboundedReceiver<KvWrite>,
        health: Arc<HealthState>,
    ) -> Self {
        Self { pool, write_rx, health }
    }

    pub async fn run(mut self) {
        while let Some(write) = self.write_rx.recv().await {
            if let Err(e) = self.apply(&write).await {
                error!("[DB] write error: {e}");
            }
            self.health.dec_write_queue_pending();
            self.health.set_last_write_at_ms(now_ms());
        }
        info!("[DB] write channel closed, writer stopping");
    }

    async fn apply(&self, write: &KvWrite) -> Result<()> {
        match write {
            KvWrite::Set { key, value } => {
                sqlx::query(
                    r#"
                    INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(key.as_str())
                .bind(value.as_slice())
                .bind(now_ms() as i64)
                .execute(&self.pool)
                .await?;
            }
            KvWrite::Remove { key } => {
                sqlx::query("DELETE FROM kv WHERE key = ?")
                    .bind(key.as_str())
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}
