//! Event store layer for storelens
//!
//! This module provides the SQLite storage the storefront's logging path
//! writes into, plus the collaborator implementations the analytics engine
//! reads through:
//! - Schema migrations
//! - Repository queries (paged event reads, paid-user lookups)
//! - [`SqliteEventStore`] and [`SqlitePurchaseLedger`]

pub mod repo;
pub mod schema;
pub mod store;

pub use repo::Database;
pub use store::{SqliteEventStore, SqlitePurchaseLedger};

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp the way the store keeps it.
///
/// Fixed precision and a `Z` suffix keep text order equal to time order.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
