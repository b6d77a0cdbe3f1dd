pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;

pub use config::AppConfig;
pub use db::{create_pool, run_migrations, BillingStore, BillingTx, MemoryStore, PgStore};
pub use error::BillingError;
pub use service::{ClosingGenerator, PaymentAllocator, ProrationCalculator};
