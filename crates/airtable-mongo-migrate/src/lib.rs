//! # airtable-mongo-migrate
//!
//! Airtable to MongoDB migration library.
//!
//! Moves every record of a set of Airtable tables into MongoDB collections,
//! reshaping each record through declarative field rules:
//!
//! - **Field mapping** with rename, drop, computed and link rules
//! - **Type coercion** that never aborts a run; failures become anomalies
//! - **Two-pass link resolution** so records may link forward or to each other
//! - **Idempotent writes** keyed on `(source_table, source_id)`
//! - **Resume** by seeding id translations from the destination
//! - **Run reports** listing every per-record anomaly
//!
//! ## Example
//!
//! ```rust,no_run
//! use airtable_mongo_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> airtable_mongo_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::connect(config).await?;
//!     let run = orchestrator
//!         .run_migration(&[], false, CancellationToken::new())
//!         .await?;
//!     println!("Wrote {} records", run.summary().records_written);
//!     Ok(())
//! }
//! ```

pub mod coerce;
pub mod config;
pub mod core;
pub mod error;
pub mod mapper;
pub mod orchestrator;
pub mod report;
pub mod resolve;
pub mod source;
pub mod target;
pub mod transfer;

// Re-exports for convenient access
pub use crate::core::{
    Coercion, ComputedRule, FieldRule, FieldValue, RuleKind, SourceRecord, TableMapping,
    TransformedDocument,
};
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use error::{MigrateError, Result};
pub use orchestrator::{HealthCheckResult, MappingCheck, Orchestrator};
pub use report::{Anomaly, AnomalyKind, MigrationRun, RunPhase, RunStatus, TableStatus};
pub use resolve::{IdTranslationTable, LinkResolver};
pub use source::{AirtableSource, MemorySource, SourceReader};
pub use target::{DocumentStore, MemoryStore, MongoStore, Writer};
pub use transfer::{TransferConfig, TransferEngine, TransferStats};
