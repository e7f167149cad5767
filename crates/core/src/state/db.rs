//! # Unified Prism Database
//!
//! Single SQLite database for all Prism state persistence, at
//! `.prism/prism.db`. Sessions and the usage ledger are narrow managers
//! over the shared connection.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Unified database manager for all Prism state
pub struct PrismDb {
    conn: Arc<Mutex<Connection>>,
}

impl PrismDb {
    /// Open or create the database at `.prism/prism.db`
    pub fn open() -> Result<Self> {
        Self::open_at(".prism/prism.db")
    }

    /// Open database at a specific path (useful for testing)
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open prism database")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// In-memory database for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Shared connection for the managers
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }
}

/// Migration to version 1 - complete schema
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id)",
        [],
    )?;

    // Single-row cumulative usage totals
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS usage_totals (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            total_input_tokens INTEGER NOT NULL DEFAULT 0,
            total_output_tokens INTEGER NOT NULL DEFAULT 0,
            total_cost_usd REAL NOT NULL DEFAULT 0.0
        )
        "#,
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO usage_totals (id) VALUES (1)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let db = PrismDb::open_in_memory().unwrap();
        // Running migrations again must not fail or duplicate anything
        db.run_migrations().unwrap();

        let conn = db.connection();
        let conn = conn.lock().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_usage_totals_seeded() {
        let db = PrismDb::open_in_memory().unwrap();
        let conn = db.connection();
        let conn = conn.lock().unwrap();
        let cost: f64 = conn
            .query_row("SELECT total_cost_usd FROM usage_totals WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(cost, 0.0);
    }
}
