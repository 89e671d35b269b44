//! Database repository layer
//!
//! Provides the paged range reads and ledger lookups the collaborators are
//! built on, and the insert operations used by seeding and tests.

use super::format_ts;
use crate::analytics::fetcher::{EventPage, EventQuery, Projection};
use crate::analytics::funnel::PAID_STATUS;
use crate::error::{Error, Result};
use crate::types::{EventKind, RawEvent};
use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, Value};
use rusqlite::{Connection, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets the logging path keep writing while reports read
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection()?;
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Fetch("database connection lock poisoned".to_string()))
    }

    /// Column names present on a table.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.connection()?;
        super::schema::table_columns(&conn, table)
    }

    // ============================================
    // Event writes (seeding and tests)
    // ============================================

    /// Insert one event into its kind's table, returning the new row id.
    ///
    /// The store assigns the id; `event.id` is ignored. Orders are recorded
    /// with status `paid`.
    pub fn insert_event(&self, event: &RawEvent) -> Result<i64> {
        let conn = self.connection()?;
        insert_event_on(&conn, event, None)
    }

    /// Insert an order with an explicit status (e.g. `refunded`).
    pub fn insert_order(&self, event: &RawEvent, status: &str) -> Result<i64> {
        if event.kind != EventKind::Order {
            return Err(Error::InvalidRequest(format!(
                "insert_order called with a {} event",
                event.kind
            )));
        }
        let conn = self.connection()?;
        insert_event_on(&conn, event, Some(status))
    }

    /// Insert many events in one transaction.
    pub fn insert_events(&self, events: &[RawEvent]) -> Result<usize> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        for event in events {
            insert_event_on(&tx, event, None)?;
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// Count rows of one kind.
    pub fn count_events(&self, kind: EventKind) -> Result<i64> {
        let conn = self.connection()?;
        let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", kind.table()), [], |r| {
            r.get(0)
        })?;
        Ok(count)
    }

    // ============================================
    // Event reads
    // ============================================

    /// Read one page of events for `query`, projecting only `projection`.
    ///
    /// Rows come back ascending by `created_at` (then id). One extra row is
    /// read to decide `has_more` without a second query. Orders are limited
    /// to status `paid`, the same rule the purchase ledger applies.
    pub fn events_page(
        &self,
        query: &EventQuery,
        projection: &Projection,
        offset: usize,
        limit: usize,
    ) -> Result<EventPage> {
        let table = query.kind.table();
        let mut sql = format!(
            "SELECT {} FROM {} WHERE created_at >= ?1 AND created_at < ?2",
            projection.columns().join(", "),
            table
        );
        let mut params: Vec<Box<dyn ToSql>> = vec![
            Box::new(format_ts(query.window.start)),
            Box::new(format_ts(query.window.end)),
        ];

        if let Some(product_id) = &query.product_id {
            if query.kind.has_product() {
                sql.push_str(&format!(" AND product_id = ?{}", params.len() + 1));
                params.push(Box::new(product_id.clone()));
            }
        }

        // Refunded and pending orders are not revenue
        if query.kind == EventKind::Order {
            sql.push_str(&format!(" AND status = ?{}", params.len() + 1));
            params.push(Box::new(PAID_STATUS));
        }

        sql.push_str(&format!(
            " ORDER BY created_at ASC, id ASC LIMIT {} OFFSET {}",
            limit + 1,
            offset
        ));

        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| classify_query_error(table, e))?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut rows = stmt
            .query(param_refs.as_slice())
            .map_err(|e| classify_query_error(table, e))?;

        let mut events = Vec::with_capacity(limit.min(1024));
        let mut has_more = false;
        while let Some(row) = rows.next()? {
            if events.len() == limit {
                has_more = true;
                break;
            }
            events.push(row_to_event(query.kind, projection, row)?);
        }

        Ok(EventPage { events, has_more })
    }

    // ============================================
    // Ledger reads
    // ============================================

    /// Users among `user_ids` with at least one order in `status` whose
    /// amount is strictly above `min_amount`.
    pub fn paid_users(
        &self,
        user_ids: &[String],
        status: &str,
        min_amount: f64,
    ) -> Result<HashSet<String>> {
        if user_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let placeholders = (0..user_ids.len())
            .map(|i| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            r#"
            SELECT DISTINCT user_id
            FROM orders
            WHERE status = ?1 AND amount > ?2 AND user_id IN ({})
            "#,
            placeholders
        );

        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(user_ids.len() + 2);
        params.push(&status);
        params.push(&min_amount);
        for id in user_ids {
            params.push(id);
        }

        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map(params.as_slice(), |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(users)
    }
}

fn insert_event_on(conn: &Connection, event: &RawEvent, status: Option<&str>) -> Result<i64> {
    let mut columns: Vec<&str> = vec!["created_at", "session_id", "user_id"];
    let mut values: Vec<Value> = vec![
        Value::Text(format_ts(event.created_at)),
        opt_text(&event.session_id),
        opt_text(&event.user_id),
    ];

    let mut push = |column: &'static str, value: Value| {
        columns.push(column);
        values.push(value);
    };

    match event.kind {
        EventKind::PageView | EventKind::Download => push("product_id", opt_text(&event.product_id)),
        EventKind::Order => {
            push("amount", event.amount.map(Value::Real).unwrap_or(Value::Null));
            push("status", Value::Text(status.unwrap_or("paid").to_string()));
        }
        EventKind::Signup | EventKind::Inquiry => {}
    }

    // Optional dimensions are only written when known, so stores that
    // predate a column still accept events without it.
    if event.country.is_some() {
        push("country", opt_text(&event.country));
    }
    if event.referrer.is_some() {
        push("referrer", opt_text(&event.referrer));
    }
    if event.user_agent.is_some() {
        push("user_agent", opt_text(&event.user_agent));
    }
    if event.download_source.is_some() {
        push("download_source", opt_text(&event.download_source));
    }
    if let Some(categories) = &event.sub_categories {
        push("sub_categories", Value::Text(serde_json::to_string(categories)?));
    }

    let placeholders = (1..=columns.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        event.kind.table(),
        columns.join(", "),
        placeholders
    );

    conn.execute(&sql, rusqlite::params_from_iter(values.iter()))?;
    Ok(conn.last_insert_rowid())
}

fn opt_text(value: &Option<String>) -> Value {
    value
        .as_ref()
        .map(|v| Value::Text(v.clone()))
        .unwrap_or(Value::Null)
}

/// Translate SQLite's "no such column" into the typed schema signal.
fn classify_query_error(table: &str, err: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(_, Some(message)) = &err {
        if let Some(column) = message.strip_prefix("no such column: ") {
            return Error::MissingColumn {
                table: table.to_string(),
                column: column.trim().to_string(),
            };
        }
    }
    Error::Database(err)
}

fn row_to_event(kind: EventKind, projection: &Projection, row: &Row) -> Result<RawEvent> {
    let mut id = String::new();
    let mut created_at: Option<DateTime<Utc>> = None;
    let mut event = RawEvent::new(String::new(), kind, DateTime::<Utc>::MIN_UTC);

    for (idx, column) in projection.columns().iter().enumerate() {
        let value: Value = row.get(idx)?;
        match *column {
            "id" => id = value_to_string(value).unwrap_or_default(),
            "created_at" => {
                let raw = value_to_string(value).unwrap_or_default();
                let parsed = DateTime::parse_from_rfc3339(&raw).map_err(|e| {
                    Error::Fetch(format!("bad created_at {:?} in {}: {}", raw, kind.table(), e))
                })?;
                created_at = Some(parsed.with_timezone(&Utc));
            }
            "session_id" => event.session_id = value_to_string(value),
            "user_id" => event.user_id = value_to_string(value),
            "product_id" => event.product_id = value_to_string(value),
            "country" => event.country = value_to_string(value),
            "referrer" => event.referrer = value_to_string(value),
            "user_agent" => event.user_agent = value_to_string(value),
            "download_source" => event.download_source = value_to_string(value),
            "amount" => {
                event.amount = match value {
                    Value::Real(v) => Some(v),
                    Value::Integer(v) => Some(v as f64),
                    Value::Text(s) => s.trim().parse().ok(),
                    _ => None,
                }
            }
            "sub_categories" => {
                event.sub_categories = match value_to_string(value) {
                    Some(raw) => Some(serde_json::from_str(&raw)?),
                    None => None,
                }
            }
            other => {
                return Err(Error::Fetch(format!(
                    "unexpected column {} in projection for {}",
                    other,
                    kind.table()
                )))
            }
        }
    }

    event.id = id;
    event.created_at = created_at
        .ok_or_else(|| Error::Fetch(format!("projection for {} lacks created_at", kind.table())))?;
    Ok(event)
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(v) => Some(v.to_string()),
        Value::Real(v) => Some(v.to_string()),
        Value::Text(s) => Some(s),
        Value::Blob(b) => String::from_utf8(b).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Window;
    use chrono::{Duration, TimeZone};

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, minute, 0).unwrap()
    }

    fn view(minute: u32, session: &str) -> RawEvent {
        let mut e = RawEvent::new("", EventKind::PageView, ts(minute));
        e.session_id = Some(session.to_string());
        e.country = Some("JP".to_string());
        e
    }

    fn query(kind: EventKind) -> EventQuery {
        EventQuery::new(kind, Window::new(ts(0), ts(0) + Duration::hours(1)))
    }

    #[test]
    fn test_insert_and_page_events() {
        let db = test_db();
        for minute in [5, 1, 3, 2, 4] {
            db.insert_event(&view(minute, "s1")).unwrap();
        }

        let projection = Projection::full(EventKind::PageView);
        let page = db.events_page(&query(EventKind::PageView), &projection, 0, 3).unwrap();
        assert_eq!(page.events.len(), 3);
        assert!(page.has_more);
        assert_eq!(page.events[0].created_at, ts(1));
        assert_eq!(page.events[2].created_at, ts(3));
        assert_eq!(page.events[0].country.as_deref(), Some("JP"));

        let page = db.events_page(&query(EventKind::PageView), &projection, 3, 3).unwrap();
        assert_eq!(page.events.len(), 2);
        assert!(!page.has_more);
    }

    #[test]
    fn test_range_is_half_open() {
        let db = test_db();
        db.insert_event(&view(0, "start")).unwrap();
        db.insert_event(&view(59, "inside")).unwrap();
        let mut at_end = view(0, "end");
        at_end.created_at = ts(0) + Duration::hours(1);
        db.insert_event(&at_end).unwrap();

        let projection = Projection::full(EventKind::PageView);
        let page = db.events_page(&query(EventKind::PageView), &projection, 0, 100).unwrap();
        let sessions: Vec<_> = page.events.iter().filter_map(|e| e.session_id.clone()).collect();
        assert_eq!(sessions, vec!["start", "inside"]);
    }

    #[test]
    fn test_missing_column_is_typed() {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.connection().unwrap();
            super::super::schema::run_migrations_until(&conn, 1).unwrap();
        }

        let projection = Projection::full(EventKind::Download);
        let err = db
            .events_page(&query(EventKind::Download), &projection, 0, 10)
            .unwrap_err();
        assert!(err.is_missing_column(), "unexpected error: {err}");
    }

    #[test]
    fn test_sub_categories_round_trip_through_json_column() {
        let db = test_db();
        let mut e = RawEvent::new("", EventKind::Download, ts(10));
        e.user_id = Some("u1".to_string());
        e.product_id = Some("p1".to_string());
        e.sub_categories = Some(vec!["fonts".to_string(), "icons".to_string()]);
        db.insert_event(&e).unwrap();

        let projection = Projection::full(EventKind::Download);
        let page = db.events_page(&query(EventKind::Download), &projection, 0, 10).unwrap();
        assert_eq!(
            page.events[0].sub_categories,
            Some(vec!["fonts".to_string(), "icons".to_string()])
        );
        // Unrecorded optional columns stay unknown
        assert_eq!(page.events[0].download_source, None);
    }

    #[test]
    fn test_product_scope_applies_to_downloads() {
        let db = test_db();
        for product in ["p1", "p2", "p1"] {
            let mut e = RawEvent::new("", EventKind::Download, ts(10));
            e.product_id = Some(product.to_string());
            db.insert_event(&e).unwrap();
        }

        let mut q = query(EventKind::Download);
        q.product_id = Some("p1".to_string());
        let page = db.events_page(&q, &Projection::full(EventKind::Download), 0, 10).unwrap();
        assert_eq!(page.events.len(), 2);
    }

    #[test]
    fn test_order_reads_skip_refunded_orders() {
        let db = test_db();
        let mut paid = RawEvent::new("", EventKind::Order, ts(1));
        paid.user_id = Some("a".to_string());
        paid.amount = Some(100.0);
        db.insert_event(&paid).unwrap();
        let mut refunded = paid.clone();
        refunded.user_id = Some("b".to_string());
        refunded.amount = Some(900.0);
        db.insert_order(&refunded, "refunded").unwrap();

        let page = db
            .events_page(&query(EventKind::Order), &Projection::full(EventKind::Order), 0, 10)
            .unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].user_id.as_deref(), Some("a"));
        assert_eq!(page.events[0].amount, Some(100.0));
    }

    #[test]
    fn test_paid_users_filters_status_and_amount() {
        let db = test_db();
        let order = |user: &str, amount: f64| {
            let mut e = RawEvent::new("", EventKind::Order, ts(1));
            e.user_id = Some(user.to_string());
            e.amount = Some(amount);
            e
        };
        db.insert_event(&order("paid", 500.0)).unwrap();
        db.insert_event(&order("free", 0.0)).unwrap();
        db.insert_order(&order("refunded", 900.0), "refunded").unwrap();

        let ids: Vec<String> = ["paid", "free", "refunded", "nobody"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let paid = db.paid_users(&ids, "paid", 0.0).unwrap();
        assert_eq!(paid, HashSet::from(["paid".to_string()]));
        assert!(db.paid_users(&[], "paid", 0.0).unwrap().is_empty());
    }
}
