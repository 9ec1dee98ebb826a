//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The engine calls store methods (mostly through `LedgerStore`); it never
//! executes SQL directly.

use crate::error::InterestResult;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{types::Type, Connection};

mod configs;
mod ledger;

pub struct InterestStore {
    conn: Connection,
}

impl InterestStore {
    pub fn open(path: &str) -> InterestResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> InterestResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// In-memory store with the schema already applied.
    pub fn in_memory_migrated() -> InterestResult<Self> {
        let store = Self::in_memory()?;
        store.migrate()?;
        Ok(store)
    }

    /// Apply all schema migrations in order. Idempotent.
    pub fn migrate(&self) -> InterestResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_interest_config.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_interest_ledger.sql"))?;
        Ok(())
    }
}

// ── Column conversions ─────────────────────────────────────────────
// rusqlite is built without chrono support; dates travel as ISO text.

fn date_to_sql(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn timestamp_to_sql(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn date_from_sql(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| conversion_error(idx, format!("bad date '{raw}': {e}")))
}

fn timestamp_from_sql(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{raw}': {e}")))
}
