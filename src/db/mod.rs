pub mod models;
pub mod writer;

pub use writer::{load_entries, DbWriter};
