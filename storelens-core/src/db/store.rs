//! SQLite-backed collaborators for the report engine
//!
//! Both wrappers share one [`Database`] and run every query on tokio's
//! blocking pool, so concurrent fetches queue on the connection lock
//! instead of stalling the async runtime.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use super::repo::Database;
use crate::analytics::fetcher::{EventPage, EventQuery, EventStore, Projection, SchemaCapability};
use crate::analytics::funnel::{LedgerFilter, PurchaseLedger};
use crate::error::{Error, Result};
use crate::types::EventKind;

/// Most user ids one ledger query binds.
///
/// Stays well under SQLite's default host parameter limit.
pub const SQLITE_MAX_LEDGER_BATCH: usize = 500;

/// Run a closure against the database on the blocking pool.
async fn blocking<T, F>(db: &Arc<Database>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T> + Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| Error::Fetch(format!("database task failed: {}", e)))?
}

/// [`EventStore`] over the local SQLite event log.
pub struct SqliteEventStore {
    db: Arc<Database>,
    capabilities: HashMap<EventKind, SchemaCapability>,
}

impl SqliteEventStore {
    /// Wrap an opened database, recording which optional columns each
    /// table has.
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let mut capabilities = HashMap::new();
        for kind in EventKind::ALL {
            let columns = db.table_columns(kind.table())?;
            if columns.is_empty() {
                return Err(Error::Fetch(format!(
                    "event table {} does not exist",
                    kind.table()
                )));
            }
            let capability = SchemaCapability::detect(kind, &columns);
            if let SchemaCapability::Reduced { missing } = &capability {
                tracing::info!(table = kind.table(), missing = ?missing, "Reduced event schema");
            }
            capabilities.insert(kind, capability);
        }
        Ok(Self { db, capabilities })
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn capability(&self, kind: EventKind) -> Result<SchemaCapability> {
        Ok(self
            .capabilities
            .get(&kind)
            .cloned()
            .unwrap_or(SchemaCapability::Full))
    }

    async fn fetch_page(
        &self,
        query: &EventQuery,
        projection: &Projection,
        offset: usize,
        limit: usize,
    ) -> Result<EventPage> {
        let query = query.clone();
        let projection = projection.clone();
        blocking(&self.db, move |db| {
            db.events_page(&query, &projection, offset, limit)
        })
        .await
    }
}

/// [`PurchaseLedger`] over the `orders` table of the local event log.
pub struct SqlitePurchaseLedger {
    db: Arc<Database>,
}

impl SqlitePurchaseLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PurchaseLedger for SqlitePurchaseLedger {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn max_batch_size(&self) -> usize {
        SQLITE_MAX_LEDGER_BATCH
    }

    async fn paid_users(&self, user_ids: &[String], filter: &LedgerFilter) -> Result<HashSet<String>> {
        if user_ids.len() > SQLITE_MAX_LEDGER_BATCH {
            return Err(Error::Ledger(format!(
                "batch of {} user ids exceeds limit of {}",
                user_ids.len(),
                SQLITE_MAX_LEDGER_BATCH
            )));
        }
        let user_ids = user_ids.to_vec();
        let filter = filter.clone();
        blocking(&self.db, move |db| {
            db.paid_users(&user_ids, &filter.status, filter.min_amount)
        })
        .await
        .map_err(|e| match e {
            Error::Database(e) => Error::Ledger(format!("ledger query failed: {}", e)),
            other => other,
        })
    }
}
