//! Event store schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//! Each event kind lives in its own table. Timestamps are stored as
//! RFC 3339 strings with millisecond precision in UTC so that text
//! comparison matches time order.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: event tables
    r#"
    CREATE TABLE IF NOT EXISTS page_views (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at       DATETIME NOT NULL,
        session_id       TEXT,
        user_id          TEXT,
        product_id       TEXT,
        country          TEXT,
        referrer         TEXT,
        user_agent       TEXT
    );

    CREATE TABLE IF NOT EXISTS orders (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at       DATETIME NOT NULL,
        session_id       TEXT,
        user_id          TEXT,
        amount           REAL,
        status           TEXT NOT NULL DEFAULT 'paid',
        country          TEXT,
        user_agent       TEXT
    );

    CREATE TABLE IF NOT EXISTS signups (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at       DATETIME NOT NULL,
        session_id       TEXT,
        user_id          TEXT,
        country          TEXT,
        referrer         TEXT
    );

    CREATE TABLE IF NOT EXISTS inquiries (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at       DATETIME NOT NULL,
        session_id       TEXT,
        user_id          TEXT,
        country          TEXT
    );

    CREATE TABLE IF NOT EXISTS downloads (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at       DATETIME NOT NULL,
        session_id       TEXT,
        user_id          TEXT,
        product_id       TEXT,
        country          TEXT,
        user_agent       TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_page_views_created ON page_views(created_at);
    CREATE INDEX IF NOT EXISTS idx_orders_created ON orders(created_at);
    CREATE INDEX IF NOT EXISTS idx_orders_user_status ON orders(user_id, status);
    CREATE INDEX IF NOT EXISTS idx_signups_created ON signups(created_at);
    CREATE INDEX IF NOT EXISTS idx_inquiries_created ON inquiries(created_at);
    CREATE INDEX IF NOT EXISTS idx_downloads_created ON downloads(created_at);
    "#,
    // Version 2: download attribution columns
    r#"
    ALTER TABLE downloads ADD COLUMN download_source TEXT;
    ALTER TABLE downloads ADD COLUMN sub_categories JSON;
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    run_migrations_until(conn, SCHEMA_VERSION)
}

/// Run pending migrations up to and including `target`.
///
/// Stores that stop short of [`SCHEMA_VERSION`] lack some optional columns;
/// the event fetcher reads them with a reduced projection.
pub fn run_migrations_until(conn: &Connection, target: i32) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = target,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version && version <= target {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < target {
        tracing::info!(from = current_version, to = target, "Migrations complete");
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

/// List the column names of a table (empty if the table is missing).
pub fn table_columns(conn: &Connection, table: &str) -> crate::error::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        // Run migrations twice - should be idempotent
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = ["page_views", "orders", "signups", "inquiries", "downloads"];

        for table in tables {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_partial_migration_lacks_attribution_columns() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations_until(&conn, 1).unwrap();

        let columns = table_columns(&conn, "downloads").unwrap();
        assert!(columns.contains(&"country".to_string()));
        assert!(!columns.contains(&"download_source".to_string()));

        // Completing the migration adds them
        run_migrations(&conn).unwrap();
        let columns = table_columns(&conn, "downloads").unwrap();
        assert!(columns.contains(&"download_source".to_string()));
        assert!(columns.contains(&"sub_categories".to_string()));
    }
}
