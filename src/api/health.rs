//! Shared health state for the /health endpoint.
//! Updated by MemoryKv and DbWriter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Persistence health. Updated by the store and the writer, read by the API.
#[derive(Default)]
pub struct HealthState {
    /// Store mutations queued for SQLite but not yet written.
    pub write_queue_pending: AtomicU64,
    /// Millisecond timestamp of the last SQLite write (0 = none).
    pub last_write_at_ms: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_write_queue_pending(&self) {
        self.write_queue_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_write_queue_pending(&self) {
        self.write_queue_pending.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set_last_write_at_ms(&self, ms: u64) {
        self.last_write_at_ms.store(ms, Ordering::Relaxed);
    }

    pub fn write_queue_pending(&self) -> u64 {
        self.write_queue_pending.load(Ordering::Relaxed)
    }

    pub fn last_write_at_ms(&self) -> u64 {
        self.last_write_at_ms.load(Ordering::Relaxed)
    }
}
