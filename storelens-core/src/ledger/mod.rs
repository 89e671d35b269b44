//! Purchase ledger backends
//!
//! The conversion funnel asks a ledger which users completed a paid
//! purchase. Two backends are available:
//! - `sqlite` reads the `orders` table of the local event log
//!   ([`crate::db::SqlitePurchaseLedger`])
//! - `http` queries a remote ledger service ([`LedgerClient`])
//!
//! ## Usage
//!
//! Select the remote ledger in `~/.config/storelens/config.toml`:
//!
//! ```toml
//! [ledger]
//! backend = "http"
//! server_url = "https://ledger.example.com"
//! api_key = "lk_live_xxxxxxxxxxxx"
//! batch_size = 100
//! ```

mod client;

pub use client::LedgerClient;

use std::sync::Arc;

use crate::analytics::funnel::PurchaseLedger;
use crate::config::{LedgerBackend, LedgerConfig};
use crate::db::{Database, SqlitePurchaseLedger};
use crate::error::Result;

/// Build the configured ledger backend.
///
/// `db` backs the `sqlite` ledger and is ignored by the `http` one.
pub fn open_ledger(config: &LedgerConfig, db: Arc<Database>) -> Result<Arc<dyn PurchaseLedger>> {
    let ledger: Arc<dyn PurchaseLedger> = match config.backend {
        LedgerBackend::Sqlite => Arc::new(SqlitePurchaseLedger::new(db)),
        LedgerBackend::Http => Arc::new(LedgerClient::new(config.clone())?),
    };
    tracing::debug!(backend = ledger.name(), "Purchase ledger ready");
    Ok(ledger)
}
