//! Paginated, schema-tolerant event retrieval
//!
//! [`EventFetcher`] reads every event of one kind inside a half-open window
//! from an [`EventStore`], one fixed-size page at a time. Pages are read
//! strictly in sequence: whether another page is requested depends on the
//! previous page's explicit `has_more`.
//!
//! Stores that predate an optional dimension column report a
//! [`SchemaCapability::Reduced`] when they are opened, and the fetcher
//! projects only the columns they have. If a read still hits a missing
//! column, the fetcher drops it and restarts the loop; the caller sees
//! `None` for that field, never a default.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::{EventKind, RawEvent, Window};

/// Default rows per page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// A range query for one event kind.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub kind: EventKind,
    /// `created_at >= start AND created_at < end`
    pub window: Window,
    /// Restrict to one product (kinds that carry a product only)
    pub product_id: Option<String>,
}

impl EventQuery {
    pub fn new(kind: EventKind, window: Window) -> Self {
        Self {
            kind,
            window,
            product_id: None,
        }
    }

    pub fn for_product(mut self, product_id: Option<String>) -> Self {
        self.product_id = product_id;
        self
    }
}

/// Which columns of a kind's table a store can serve, decided once per
/// store connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaCapability {
    /// Every optional column exists
    Full,
    /// These optional columns are absent
    Reduced { missing: Vec<&'static str> },
}

impl SchemaCapability {
    /// Build the capability from the columns a table actually has.
    pub fn detect(kind: EventKind, present: &[String]) -> Self {
        let missing: Vec<&'static str> = kind
            .optional_columns()
            .iter()
            .copied()
            .filter(|column| !present.iter().any(|p| p == column))
            .collect();
        if missing.is_empty() {
            SchemaCapability::Full
        } else {
            SchemaCapability::Reduced { missing }
        }
    }

    /// Projection matching this capability.
    pub fn projection(&self, kind: EventKind) -> Projection {
        match self {
            SchemaCapability::Full => Projection::full(kind),
            SchemaCapability::Reduced { missing } => {
                let mut projection = Projection::full(kind);
                for column in missing {
                    projection.remove_optional(kind, column);
                }
                projection
            }
        }
    }
}

/// The ordered column list a page read selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    columns: Vec<&'static str>,
}

impl Projection {
    /// Base plus every optional column of the kind.
    pub fn full(kind: EventKind) -> Self {
        let columns = kind
            .base_columns()
            .iter()
            .chain(kind.optional_columns())
            .copied()
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| *c == column)
    }

    /// Drop an optional column. Returns false when the column is not an
    /// optional column currently projected (nothing left to degrade).
    fn remove_optional(&mut self, kind: EventKind, column: &str) -> bool {
        if !kind.optional_columns().iter().any(|c| *c == column) || !self.contains(column) {
            return false;
        }
        self.columns.retain(|c| *c != column);
        true
    }
}

/// One page of a range read.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPage {
    /// Events ascending by `created_at`
    pub events: Vec<RawEvent>,
    /// Whether rows remain past this page
    pub has_more: bool,
}

/// The raw event log, as seen by the engine.
///
/// Implementations must return [`Error::MissingColumn`] when a projected
/// column does not exist, so the fetcher can tell it from other failures.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &'static str;

    /// Which optional columns this store has for `kind`.
    async fn capability(&self, kind: EventKind) -> Result<SchemaCapability>;

    /// Read rows `offset..offset + limit` of `query`, ascending by `created_at`.
    async fn fetch_page(
        &self,
        query: &EventQuery,
        projection: &Projection,
        offset: usize,
        limit: usize,
    ) -> Result<EventPage>;
}

/// Reads complete, ordered event sets from an [`EventStore`].
#[derive(Clone)]
pub struct EventFetcher {
    store: Arc<dyn EventStore>,
    page_size: usize,
}

impl EventFetcher {
    /// Create a fetcher. A zero page size is treated as the default.
    pub fn new(store: Arc<dyn EventStore>, page_size: usize) -> Self {
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        Self { store, page_size }
    }

    /// Fetch every event matching `query`, ascending by timestamp.
    ///
    /// Any error other than a missing optional column aborts the whole
    /// fetch; no partial result is returned.
    pub async fn fetch_all(&self, query: &EventQuery) -> Result<Vec<RawEvent>> {
        let capability = self.store.capability(query.kind).await?;
        if let SchemaCapability::Reduced { missing } = &capability {
            tracing::warn!(
                store = self.store.name(),
                kind = %query.kind,
                missing = ?missing,
                "Event store lacks optional columns, using reduced projection"
            );
        }

        let mut projection = capability.projection(query.kind);
        loop {
            match self.page_through(query, &projection).await {
                Ok(events) => return Ok(events),
                Err(Error::MissingColumn { table, column }) => {
                    if !projection.remove_optional(query.kind, &column) {
                        return Err(Error::MissingColumn { table, column });
                    }
                    tracing::warn!(
                        store = self.store.name(),
                        table = %table,
                        column = %column,
                        "Column disappeared mid-fetch, retrying with reduced projection"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn page_through(
        &self,
        query: &EventQuery,
        projection: &Projection,
    ) -> Result<Vec<RawEvent>> {
        let mut events = Vec::new();
        let mut offset = 0;
        let mut pages = 0usize;

        loop {
            let page = self
                .store
                .fetch_page(query, projection, offset, self.page_size)
                .await?;
            pages += 1;
            let read = page.events.len();
            offset += read;
            events.extend(page.events);

            // A store that claims more rows but returns none would loop forever
            if !page.has_more || read == 0 {
                break;
            }
        }

        // Pages are individually ordered; keep the whole set ordered too.
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        tracing::debug!(
            store = self.store.name(),
            kind = %query.kind,
            pages,
            rows = events.len(),
            "Fetched events"
        );

        Ok(events)
    }
}
