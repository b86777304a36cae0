pub mod catalog;
pub mod transactions;
pub mod wager;

pub use catalog::Catalog;
pub use transactions::TransactionEngine;
pub use wager::{SettlementPreview, SettlementReport, WagerEngine};
