//! # storelens-core
//!
//! Core library for storelens - storefront analytics with bot and abuse
//! filtering.
//!
//! This library provides:
//! - Domain types for raw events and report values
//! - The SQLite event store the storefront logs into
//! - Report computation: time series, growth, breakdowns, conversion
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Reports are computed on request and never persisted:
//! - **Fetch:** every event set for the current and prior window, concurrently
//! - **Filter:** known bots, then sessions with automated access patterns
//! - **Aggregate:** per-bucket series, headline totals, breakdowns, funnel
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storelens_core::analytics::{ReportEngine, ReportRequest};
//! use storelens_core::db::SqliteEventStore;
//! use storelens_core::{ledger, Config, Database, Granularity};
//!
//! # async fn run() -> storelens_core::Result<()> {
//! let config = Config::load()?;
//! let db = Arc::new(Database::open(&config.database_path())?);
//! db.migrate()?;
//!
//! let store = Arc::new(SqliteEventStore::new(Arc::clone(&db))?);
//! let ledger = ledger::open_ledger(&config.ledger, db)?;
//! let engine = ReportEngine::new(Arc::new(config), store, ledger);
//!
//! let report = engine
//!     .report(&ReportRequest::new(Granularity::Daily), &chrono::Local::now())
//!     .await?;
//! println!("{} page views", report.snapshot.total_page_views);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use analytics::{Report, ReportEngine, ReportRequest};
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use types::*;

// Public modules
pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod types;
