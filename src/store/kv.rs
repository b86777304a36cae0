use std::sync::Arc;

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::api::health::HealthState;
use crate::error::Result;

/// Durable key/value contract. No atomicity across keys: callers that need a
/// read-modify-write hold their own lock around it.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&self, key: &str, value: Vec<u8>);
    fn remove(&self, key: &str);
    fn keys(&self) -> Vec<String>;

    /// Keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        keys
    }
}

/// Decode a JSON record. A malformed record is reported and treated as absent.
pub fn load_json<T: DeserializeOwned>(kv: &dyn KvStore, key: &str) -> Option<T> {
    let bytes = kv.get(key)?;
    match serde_json::from_slice(&bytes) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, "[STORE] discarding malformed record: {e}");
            None
        }
    }
}

pub fn save_json<T: Serialize + ?Sized>(kv: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    kv.set(key, bytes);
    Ok(())
}

// ---------------------------------------------------------------------------
// Write-behind messages
// ---------------------------------------------------------------------------

/// Forwarded to the SQLite writer for every mutation of a `MemoryKv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvWrite {
    Set { key: String, value: Vec<u8> },
    Remove { key: String },
}

// ---------------------------------------------------------------------------
// MemoryKv
// ---------------------------------------------------------------------------

/// In-process store. Reads never touch disk; writes are mirrored to the
/// write-behind channel when one is attached.
pub struct MemoryKv {
    entries: DashMap<String, Vec<u8>>,
    /// Unbounded so a burst of writes is never dropped from a sync caller.
    write_tx: Option<mpsc::UnboundedSender<KvWrite>>,
    health: Option<Arc<HealthState>>,
}

impl MemoryKv {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store seeded with `entries` (loaded from SQLite) that mirrors every later
    /// write to `write_tx`. Seeding itself is not forwarded.
    pub fn with_write_behind(
        entries: Vec<(String, Vec<u8>)>,
        write_tx: mpsc::UnboundedSender<KvWrite>,
        health: Arc<HealthState>,
    ) -> Arc<Self> {
        let map = DashMap::with_capacity(entries.len());
        for (k, v) in entries {
            map.insert(k, v);
        }
        Arc::new(Self {
            entries: map,
            write_tx: Some(write_tx),
            health: Some(health),
        })
    }

    fn forward(&self, write: KvWrite) {
        let Some(tx) = &self.write_tx else { return };
        if let Some(h) = &self.health {
            h.inc_write_queue_pending();
        }
        if tx.send(write).is_err() {
            if let Some(h) = &self.health {
                h.dec_write_queue_pending();
            }
            error!("[STORE] write-behind channel closed, change not persisted");
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            write_tx: None,
            health: None,
        }
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).map(|v| v.clone())
    }

    fn set(&self, key: &str, value: Vec<u8>) {
        if self.write_tx.is_some() {
            self.forward(KvWrite::Set { key: key.to_string(), value: value.clone() });
        }
        self.entries.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.forward(KvWrite::Remove { key: key.to_string() });
        }
    }

    fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}
