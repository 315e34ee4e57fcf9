//! SQLite persistence for leaderboard records and audit logs
//!
//! Each call is atomic at single-record granularity; the leaderboard
//! composes them into multi-bucket updates under its own serialization.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use shared::{Direction, HighScoreRecord, ScoreSubmission};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),
}

/// The two tracked maxima. Together with a calendar date this names one
/// stored record; the all-time pointers are derived, not stored rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Score,
    Combo,
}

impl Metric {
    pub fn key(self) -> &'static str {
        match self {
            Metric::Score => "score",
            Metric::Combo => "combo",
        }
    }
}

/// Append-only audit record of one submission. Never read back for
/// aggregate computation.
#[derive(Debug, Clone)]
pub struct ScoreLogEntry {
    pub submission: ScoreSubmission,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only audit record of one ingested chat message and its
/// classification.
#[derive(Debug, Clone)]
pub struct ChatLogEntry {
    pub message_id: String,
    pub username: String,
    pub text: String,
    pub direction: Direction,
    pub confidence: f32,
    pub recorded_at: DateTime<Utc>,
}

pub struct SqliteStore {
    pub(crate) conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS high_records (
                metric      TEXT NOT NULL,
                bucket_date TEXT NOT NULL,
                owner_id    TEXT,
                value       INTEGER NOT NULL,
                achieved_at TEXT NOT NULL,
                PRIMARY KEY (metric, bucket_date)
            );
            CREATE TABLE IF NOT EXISTS score_log (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                last_command TEXT,
                score        INTEGER NOT NULL,
                combo        INTEGER NOT NULL,
                recorded_at  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS chat_log (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id  TEXT NOT NULL,
                username    TEXT NOT NULL,
                text        TEXT NOT NULL,
                direction   TEXT NOT NULL,
                confidence  REAL NOT NULL,
                recorded_at TEXT NOT NULL
            );",
        )?;

        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Loads the record stored for a metric on the given date.
    pub fn get(
        &self,
        metric: Metric,
        date: NaiveDate,
    ) -> Result<Option<HighScoreRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT owner_id, value, achieved_at FROM high_records
                 WHERE metric = ?1 AND bucket_date = ?2",
                params![metric.key(), date.to_string()],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Inserts or overwrites the record stored under
    /// `(metric, date(achieved_at))`. Records of other dates stay as
    /// they are, so superseded today-records are retained.
    pub fn put(&self, metric: Metric, record: &HighScoreRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO high_records (metric, bucket_date, owner_id, value, achieved_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (metric, bucket_date) DO UPDATE SET
                 owner_id = excluded.owner_id,
                 value = excluded.value,
                 achieved_at = excluded.achieved_at",
            params![
                metric.key(),
                record.bucket_date().to_string(),
                record.owner_id,
                record.value,
                record.achieved_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Highest-value record ever stored for a metric, across all dates.
    /// Used once at startup to rebuild the all-time pointer.
    pub fn load_alltime(&self, metric: Metric) -> Result<Option<HighScoreRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT owner_id, value, achieved_at FROM high_records
                 WHERE metric = ?1 ORDER BY value DESC LIMIT 1",
                params![metric.key()],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn append_log(&self, entry: &ScoreLogEntry) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO score_log (last_command, score, combo, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.submission.last_command,
                entry.submission.score_value,
                entry.submission.combo,
                entry.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn append_chat(&self, entry: &ChatLogEntry) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO chat_log (message_id, username, text, direction, confidence, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.message_id,
                entry.username,
                entry.text,
                entry.direction.to_string(),
                entry.confidence as f64,
                entry.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<HighScoreRecord> {
        let achieved_at: String = row.get(2)?;
        let achieved_at = DateTime::parse_from_rfc3339(&achieved_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;

        Ok(HighScoreRecord {
            owner_id: row.get(0)?,
            value: row.get(1)?,
            achieved_at,
        })
    }
}
