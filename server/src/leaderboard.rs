//! Leaderboard consistency engine
//!
//! Ingests score submissions and keeps four buckets coherent: today's and
//! the all-time high score, and today's and the all-time high combo.
//! Submissions are serialized through a single write gate; readers get a
//! consistent view of all four buckets at once.

use crate::persist::{Metric, ScoreLogEntry, SqliteStore, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use shared::{HighScoreRecord, ScoreStats, ScoreSubmission};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default)]
struct Buckets {
    today_score: Option<HighScoreRecord>,
    alltime_score: Option<HighScoreRecord>,
    today_combo: Option<HighScoreRecord>,
    alltime_combo: Option<HighScoreRecord>,
    current_score: i64,
    current_combo: i64,
}

impl Buckets {
    fn stats(&self) -> ScoreStats {
        ScoreStats {
            today_high_score: self.today_score.clone(),
            alltime_high_score: self.alltime_score.clone(),
            today_high_combo: self.today_combo.clone(),
            alltime_high_combo: self.alltime_combo.clone(),
            current_score: self.current_score,
            current_combo: self.current_combo,
        }
    }
}

/// Result of advancing one metric by one submission.
#[derive(Debug, Clone, PartialEq)]
struct BucketOutcome {
    today: HighScoreRecord,
    alltime: HighScoreRecord,
    /// Whether the today-record needs to be persisted (created or
    /// value/owner updated). The all-time pointer is derived state and
    /// never persisted on its own.
    today_changed: bool,
}

/// Advances one metric's today/all-time pair by a submitted value.
///
/// A today-record whose date is not `date(at)` is treated as absent; the
/// new day starts a fresh record. Only a strictly greater value displaces
/// an existing one, so on ties the earliest achiever keeps the record.
fn advance(
    today: Option<&HighScoreRecord>,
    alltime: Option<&HighScoreRecord>,
    value: i64,
    owner_id: Option<&str>,
    at: DateTime<Utc>,
) -> BucketOutcome {
    let current = today.filter(|record| record.bucket_date() == at.date_naive());

    let (today, today_changed) = match current {
        Some(existing) if value <= existing.value => (existing.clone(), false),
        _ => (
            HighScoreRecord {
                owner_id: owner_id.map(str::to_string),
                value,
                achieved_at: at,
            },
            true,
        ),
    };

    // the all-time pointer tracks whichever stored record holds the
    // maximum; ties keep the existing holder
    let alltime = match alltime {
        Some(record) if record.value >= today.value => record.clone(),
        _ => today.clone(),
    };

    BucketOutcome {
        today,
        alltime,
        today_changed,
    }
}

pub struct Leaderboard {
    store: Arc<SqliteStore>,
    state: RwLock<Buckets>,
    submit_gate: Mutex<()>,
}

impl Leaderboard {
    /// Opens the engine over a store, priming the bucket cache from
    /// persisted history. The all-time pointers are recomputed by
    /// scanning stored records rather than trusted from a previous
    /// process.
    pub fn open(store: Arc<SqliteStore>) -> Result<Self, StoreError> {
        let today = Utc::now().date_naive();
        let buckets = Buckets {
            today_score: store.get(Metric::Score, today)?,
            alltime_score: store.load_alltime(Metric::Score)?,
            today_combo: store.get(Metric::Combo, today)?,
            alltime_combo: store.load_alltime(Metric::Combo)?,
            current_score: 0,
            current_combo: 0,
        };

        Ok(Leaderboard {
            store,
            state: RwLock::new(buckets),
            submit_gate: Mutex::new(()),
        })
    }

    /// Ingests one submission and returns the updated aggregate.
    ///
    /// Persistence happens before the cache is touched: on a store
    /// failure every cached bucket is left exactly as it was, so a
    /// retried submission starts from a known-good state. The cache
    /// update covers all four buckets in one write section; a concurrent
    /// reader sees either none or all of this submission's effects.
    pub async fn submit(
        &self,
        submission: ScoreSubmission,
        owner_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<ScoreStats, StoreError> {
        let _gate = self.submit_gate.lock().await;

        let (cached_today_score, alltime_score, cached_today_combo, alltime_combo) = {
            let state = self.state.read().unwrap();
            (
                state.today_score.clone(),
                state.alltime_score.clone(),
                state.today_combo.clone(),
                state.alltime_combo.clone(),
            )
        };

        // a cached record from an earlier day may already have a
        // successor in storage (written by a previous process); check
        // before starting a fresh one
        let today = at.date_naive();
        let today_score = self.refresh(cached_today_score, Metric::Score, today)?;
        let today_combo = self.refresh(cached_today_combo, Metric::Combo, today)?;

        let score = advance(
            today_score.as_ref(),
            alltime_score.as_ref(),
            submission.score_value,
            owner_id.as_deref(),
            at,
        );
        let combo = advance(
            today_combo.as_ref(),
            alltime_combo.as_ref(),
            submission.combo,
            owner_id.as_deref(),
            at,
        );

        if score.today_changed {
            self.store.put(Metric::Score, &score.today)?;
        }
        if combo.today_changed {
            self.store.put(Metric::Combo, &combo.today)?;
        }
        self.store.append_log(&ScoreLogEntry {
            submission: submission.clone(),
            recorded_at: at,
        })?;

        let stats = {
            let mut state = self.state.write().unwrap();
            state.today_score = Some(score.today);
            state.alltime_score = Some(score.alltime);
            state.today_combo = Some(combo.today);
            state.alltime_combo = Some(combo.alltime);
            state.current_score = submission.score_value;
            state.current_combo = submission.combo;
            state.stats()
        };
        Ok(stats)
    }

    fn refresh(
        &self,
        cached: Option<HighScoreRecord>,
        metric: Metric,
        today: NaiveDate,
    ) -> Result<Option<HighScoreRecord>, StoreError> {
        match cached {
            Some(record) if record.bucket_date() == today => Ok(Some(record)),
            _ => self.store.get(metric, today),
        }
    }

    /// Read-only aggregate snapshot; current values are zero until the
    /// first submission of this process lifetime.
    pub fn current_stats(&self) -> ScoreStats {
        self.state.read().unwrap().stats()
    }
}
