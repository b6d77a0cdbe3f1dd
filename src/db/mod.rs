pub mod memory;
pub mod pool;
pub mod postgres;
pub mod queries;
pub mod store;

pub use memory::{FailPoint, MemoryStore, MemoryTx, UnitSeed};
pub use pool::{create_pool, run_migrations};
pub use postgres::{PgStore, PgTx};
pub use queries::export_invoices_csv;
pub use store::{BillingStore, BillingTx};
