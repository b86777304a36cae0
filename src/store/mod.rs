pub mod kv;
pub mod locks;

pub use kv::{load_json, save_json, KvStore, KvWrite, MemoryKv};
pub use locks::KeyLocks;
