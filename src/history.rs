//! Append-only SQLite log of every prediction shown to a user.
//!
//! One connection, opened at startup and reused for every statement. Each
//! insert commits on its own; there is no pooling, reconnection or retry.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::PersistenceError;
use crate::features::MixInput;
use crate::prediction::Prediction;

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS predictions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cement REAL,
        blast_furnace_slag REAL,
        fly_ash REAL,
        water REAL,
        superplasticizer REAL,
        coarse_aggregate REAL,
        fine_aggregate REAL,
        age INTEGER,
        strength_prediction REAL,
        quantile_10 REAL,
        quantile_90 REAL
    )";

const INSERT: &str = "
    INSERT INTO predictions (
        cement, blast_furnace_slag, fly_ash, water, superplasticizer,
        coarse_aggregate, fine_aggregate, age,
        strength_prediction, quantile_10, quantile_90
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

/// Destination for finished predictions. The engine only needs `append`.
pub trait PredictionSink: Send + Sync {
    fn append(&self, input: &MixInput, result: &Prediction) -> Result<i64, PersistenceError>;
}

/// One stored row.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub id: i64,
    pub input: MixInput,
    pub prediction: Prediction,
}

#[derive(Debug)]
pub struct PredictionLog {
    conn: Mutex<Option<Connection>>,
}

impl PredictionLog {
    /// Open (or create) the database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            // A missing directory surfaces below as an SQLite open error.
            let _ = std::fs::create_dir_all(dir);
        }
        let conn = Connection::open(path)?;
        info!(target: "history", path = %path.display(), "prediction log opened");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    /// Create the `predictions` table if it does not exist. Safe on every start.
    pub fn ensure_schema(&self) -> Result<(), PersistenceError> {
        self.with_conn(|c| {
            c.execute_batch(CREATE_TABLE)?;
            Ok(())
        })?;
        info!(target: "history", "table 'predictions' ready");
        Ok(())
    }

    /// Insert one row and return its id.
    pub fn append(&self, input: &MixInput, result: &Prediction) -> Result<i64, PersistenceError> {
        let id = self.with_conn(|c| {
            c.execute(
                INSERT,
                params![
                    input.cement,
                    input.slag,
                    input.flyash,
                    input.water,
                    input.superplasticizer,
                    input.coarseagg,
                    input.fineagg,
                    age_days(input.age),
                    result.mean,
                    result.q10,
                    result.q90,
                ],
            )?;
            Ok(c.last_insert_rowid())
        })?;
        debug!(target: "history", id, "prediction logged");
        Ok(id)
    }

    /// Read one row back. Used for verification; no front end exposes it.
    pub fn fetch(&self, id: i64) -> Result<Option<LogRecord>, PersistenceError> {
        self.with_conn(|c| {
            let row = c
                .query_row(
                    "SELECT id, cement, blast_furnace_slag, fly_ash, water, superplasticizer,
                            coarse_aggregate, fine_aggregate, age,
                            strength_prediction, quantile_10, quantile_90
                     FROM predictions WHERE id = ?1",
                    params![id],
                    |r| {
                        Ok(LogRecord {
                            id: r.get(0)?,
                            input: MixInput {
                                cement: r.get(1)?,
                                slag: r.get(2)?,
                                flyash: r.get(3)?,
                                water: r.get(4)?,
                                superplasticizer: r.get(5)?,
                                coarseagg: r.get(6)?,
                                fineagg: r.get(7)?,
                                age: r.get::<_, i64>(8)? as f64,
                            },
                            prediction: Prediction {
                                mean: r.get(9)?,
                                q10: r.get(10)?,
                                q90: r.get(11)?,
                            },
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn count(&self) -> Result<i64, PersistenceError> {
        self.with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM predictions", [], |r| r.get(0))?))
    }

    /// Close the connection. Later calls fail with [`PersistenceError::Closed`].
    pub fn close(&self) -> Result<(), PersistenceError> {
        let mut guard = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| PersistenceError::Sqlite(e))?;
            info!(target: "history", "prediction log closed");
        }
        Ok(())
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        let guard = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        let conn = guard.as_ref().ok_or(PersistenceError::Closed)?;
        f(conn)
    }
}

impl PredictionSink for PredictionLog {
    fn append(&self, input: &MixInput, result: &Prediction) -> Result<i64, PersistenceError> {
        PredictionLog::append(self, input, result)
    }
}

/// Age column is INTEGER days.
fn age_days(age: f64) -> i64 {
    age.round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mix() -> MixInput {
        MixInput {
            cement: 540.0,
            slag: 0.0,
            flyash: 0.0,
            water: 162.0,
            superplasticizer: 2.5,
            coarseagg: 1040.0,
            fineagg: 676.0,
            age: 28.0,
        }
    }

    fn pred() -> Prediction {
        Prediction {
            mean: 79.99,
            q10: 61.2,
            q90: 85.1,
        }
    }

    #[test]
    fn append_then_fetch_returns_same_values() {
        let log = PredictionLog::open_in_memory().unwrap();
        log.ensure_schema().unwrap();
        let id = log.append(&mix(), &pred()).unwrap();
        let rec = log.fetch(id).unwrap().expect("row");
        assert_eq!(rec.id, id);
        assert_eq!(rec.input, mix());
        assert_eq!(rec.prediction, pred());
    }

    #[test]
    fn ids_increase() {
        let log = PredictionLog::open_in_memory().unwrap();
        log.ensure_schema().unwrap();
        let a = log.append(&mix(), &pred()).unwrap();
        let b = log.append(&mix(), &pred()).unwrap();
        assert!(b > a);
        assert_eq!(log.count().unwrap(), 2);
    }

    #[test]
    fn fractional_age_is_stored_as_whole_days() {
        let log = PredictionLog::open_in_memory().unwrap();
        log.ensure_schema().unwrap();
        let id = log
            .append(&MixInput { age: 6.6, ..mix() }, &pred())
            .unwrap();
        assert_eq!(log.fetch(id).unwrap().unwrap().input.age, 7.0);
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let log = PredictionLog::open_in_memory().unwrap();
        for _ in 0..3 {
            log.ensure_schema().unwrap();
        }
        log.append(&mix(), &pred()).unwrap();
        log.ensure_schema().unwrap();
        assert_eq!(log.count().unwrap(), 1);
    }

    #[test]
    fn append_without_schema_fails() {
        let log = PredictionLog::open_in_memory().unwrap();
        assert!(matches!(
            log.append(&mix(), &pred()),
            Err(PersistenceError::Sqlite(_))
        ));
    }

    #[test]
    fn closed_log_rejects_everything() {
        let log = PredictionLog::open_in_memory().unwrap();
        log.ensure_schema().unwrap();
        log.close().unwrap();
        log.close().unwrap();
        assert!(matches!(
            log.append(&mix(), &pred()),
            Err(PersistenceError::Closed)
        ));
        assert!(matches!(log.ensure_schema(), Err(PersistenceError::Closed)));
    }

    #[test]
    fn missing_row_is_none() {
        let log = PredictionLog::open_in_memory().unwrap();
        log.ensure_schema().unwrap();
        assert!(log.fetch(42).unwrap().is_none());
    }
}
