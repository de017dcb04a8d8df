pub mod models;
pub mod repository;

pub use models::{GmrSnapshot, PollingItem, PollingItemUpdate, RegisterOutcome};
pub use repository::{InMemoryLedger, LedgerStore, PgLedgerRepository};
