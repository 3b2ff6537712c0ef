//! SQLite sink for extracted point values.
//!
//! One row per (run date, cycle, forecast hour, variable, point). Re-running a
//! run upserts on that natural key: new keys are inserted, changed rows are
//! rewritten, and identical rows are left untouched (including their
//! `ingested_at` stamp). A batch is written in a single transaction; a record
//! that violates a constraint is counted as failed without aborting the rest.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, StorageError};

pub const DEFAULT_TABLE_NAME: &str = "hrrr_forecasts";

/// Identity of one extracted value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey {
    pub run_date: NaiveDate,
    /// Two-digit UTC cycle hour, e.g. "06"
    pub cycle: String,
    pub forecast_hour: u32,
    pub variable_name: String,
    pub point_id: String,
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}z/f{:02}/{}/{}",
            self.run_date.format("%Y%m%d"),
            self.cycle,
            self.forecast_hour,
            self.variable_name,
            self.point_id
        )
    }
}

/// One extracted value at one point.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRecord {
    pub key: NaturalKey,
    pub valid_time: DateTime<Utc>,
    /// `None` when the grid carries no data at the chosen cell
    pub value: Option<f64>,
    pub grid_latitude: f64,
    pub grid_longitude: f64,
    pub distance_km: f64,
    pub out_of_domain: bool,
    /// Object key of the file the value came from
    pub source: String,
}

/// A record as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub record: ExtractionRecord,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordFailure {
    pub key: NaturalKey,
    pub reason: String,
}

/// Result of one upsert batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub failures: Vec<RecordFailure>,
}

impl UpsertOutcome {
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged + self.failed
    }

    pub fn merge(&mut self, other: UpsertOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
        self.failures.extend(other.failures);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(sqlx::FromRow)]
struct StoredRow {
    run_date: String,
    cycle: String,
    forecast_hour: u32,
    variable_name: String,
    point_id: String,
    valid_time: String,
    value: Option<f64>,
    grid_latitude: f64,
    grid_longitude: f64,
    distance_km: f64,
    out_of_domain: bool,
    source: String,
    ingested_at: String,
}

impl TryFrom<StoredRow> for StoredRecord {
    type Error = StorageError;

    fn try_from(row: StoredRow) -> Result<Self> {
        let run_date = NaiveDate::parse_from_str(&row.run_date, "%Y-%m-%d")
            .map_err(|e| StorageError::MalformedRow(format!("run_date {:?}: {}", row.run_date, e)))?;
        let valid_time = parse_timestamp(&row.valid_time)?;
        let ingested_at = parse_timestamp(&row.ingested_at)?;

        Ok(StoredRecord {
            record: ExtractionRecord {
                key: NaturalKey {
                    run_date,
                    cycle: row.cycle,
                    forecast_hour: row.forecast_hour,
                    variable_name: row.variable_name,
                    point_id: row.point_id,
                },
                valid_time,
                value: row.value,
                grid_latitude: row.grid_latitude,
                grid_longitude: row.grid_longitude,
                distance_km: row.distance_km,
                out_of_domain: row.out_of_domain,
                source: row.source,
            },
            ingested_at,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::MalformedRow(format!("timestamp {:?}: {}", s, e)))
}

fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid && name.len() <= 64 && !name.to_ascii_lowercase().starts_with("sqlite_") {
        Ok(())
    } else {
        Err(StorageError::InvalidTableName(name.to_string()))
    }
}

const COLUMNS: &str = "run_date, cycle, forecast_hour, variable_name, point_id, \
     valid_time, value, grid_latitude, grid_longitude, distance_km, out_of_domain, \
     source, ingested_at";

const KEY_FILTER: &str = "run_date = ? AND cycle = ? AND forecast_hour = ? \
     AND variable_name = ? AND point_id = ?";

/// Idempotent store for extracted point values.
#[derive(Clone)]
pub struct ForecastStore {
    pool: SqlitePool,
    table: String,
}

impl ForecastStore {
    /// Open or create the database file and ensure the table exists.
    pub async fn open(path: &Path, table_name: &str) -> Result<Self> {
        validate_table_name(table_name)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let store = Self::connect(options, table_name).await?;
        info!(path = %path.display(), table = %table_name, "Opened forecast store");
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory(table_name: &str) -> Result<Self> {
        validate_table_name(table_name)?;
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect(options, table_name).await
    }

    async fn connect(options: SqliteConnectOptions, table_name: &str) -> Result<Self> {
        // A single writer keeps upsert classification race-free and is
        // required for in-memory databases, which are per-connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            table: table_name.to_string(),
        };
        store.migrate().await?;
        Ok(store)
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Create the table and indexes if they don't exist.
    pub async fn migrate(&self) -> Result<()> {
        let schema = SCHEMA_SQL.replace("{table}", &self.table);
        for statement in schema.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    /// Write a batch in one transaction.
    #[instrument(skip(self, records), fields(table = %self.table, records = records.len()))]
    pub async fn upsert(&self, records: &[ExtractionRecord]) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        if records.is_empty() {
            return Ok(outcome);
        }

        let ingested_at = format_timestamp(&Utc::now());
        let mut tx = self.pool.begin().await?;

        for record in records {
            match self.upsert_one(&mut tx, record, &ingested_at).await {
                Ok(Change::Inserted) => outcome.inserted += 1,
                Ok(Change::Updated) => outcome.updated += 1,
                Ok(Change::Unchanged) => outcome.unchanged += 1,
                Err(e) => {
                    warn!(key = %record.key, error = %e, "Record rejected");
                    outcome.failed += 1;
                    outcome.failures.push(RecordFailure {
                        key: record.key.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tx.commit().await?;

        debug!(
            inserted = outcome.inserted,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            failed = outcome.failed,
            "Upsert batch committed"
        );
        Ok(outcome)
    }

    async fn upsert_one(
        &self,
        conn: &mut SqliteConnection,
        record: &ExtractionRecord,
        ingested_at: &str,
    ) -> std::result::Result<Change, sqlx::Error> {
        let key = &record.key;
        let run_date = key.run_date.format("%Y-%m-%d").to_string();

        let existing = sqlx::query(&format!("SELECT 1 FROM {} WHERE {}", self.table, KEY_FILTER))
            .bind(&run_date)
            .bind(&key.cycle)
            .bind(key.forecast_hour)
            .bind(&key.variable_name)
            .bind(&key.point_id)
            .fetch_optional(&mut *conn)
            .await?;

        let sql = format!(
            "INSERT INTO {table} ({columns}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (run_date, cycle, forecast_hour, variable_name, point_id) DO UPDATE SET \
                 valid_time = excluded.valid_time, \
                 value = excluded.value, \
                 grid_latitude = excluded.grid_latitude, \
                 grid_longitude = excluded.grid_longitude, \
                 distance_km = excluded.distance_km, \
                 out_of_domain = excluded.out_of_domain, \
                 source = excluded.source, \
                 ingested_at = excluded.ingested_at \
             WHERE {table}.valid_time IS NOT excluded.valid_time \
                OR {table}.value IS NOT excluded.value \
                OR {table}.grid_latitude IS NOT excluded.grid_latitude \
                OR {table}.grid_longitude IS NOT excluded.grid_longitude \
                OR {table}.distance_km IS NOT excluded.distance_km \
                OR {table}.out_of_domain IS NOT excluded.out_of_domain \
                OR {table}.source IS NOT excluded.source",
            table = self.table,
            columns = COLUMNS,
        );

        let result = sqlx::query(&sql)
            .bind(&run_date)
            .bind(&key.cycle)
            .bind(key.forecast_hour)
            .bind(&key.variable_name)
            .bind(&key.point_id)
            .bind(format_timestamp(&record.valid_time))
            .bind(record.value.filter(|v| !v.is_nan()))
            .bind(record.grid_latitude)
            .bind(record.grid_longitude)
            .bind(record.distance_km)
            .bind(record.out_of_domain)
            .bind(&record.source)
            .bind(ingested_at)
            .execute(&mut *conn)
            .await?;

        Ok(match (existing.is_some(), result.rows_affected()) {
            (false, _) => Change::Inserted,
            (true, 0) => Change::Unchanged,
            (true, _) => Change::Updated,
        })
    }

    /// Number of stored rows.
    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Fetch one row by natural key.
    pub async fn fetch(&self, key: &NaturalKey) -> Result<Option<StoredRecord>> {
        let row: Option<StoredRow> = sqlx::query_as(&format!(
            "SELECT {} FROM {} WHERE {}",
            COLUMNS, self.table, KEY_FILTER
        ))
        .bind(key.run_date.format("%Y-%m-%d").to_string())
        .bind(&key.cycle)
        .bind(key.forecast_hour)
        .bind(&key.variable_name)
        .bind(&key.point_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredRecord::try_from).transpose()
    }

    /// All rows ordered by natural key.
    pub async fn fetch_all(&self) -> Result<Vec<StoredRecord>> {
        let rows: Vec<StoredRow> = sqlx::query_as(&format!(
            "SELECT {} FROM {} ORDER BY run_date, cycle, forecast_hour, variable_name, point_id",
            COLUMNS, self.table
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredRecord::try_from).collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS {table} (
    run_date TEXT NOT NULL,
    cycle TEXT NOT NULL CHECK (length(cycle) = 2),
    forecast_hour INTEGER NOT NULL CHECK (forecast_hour >= 0),
    variable_name TEXT NOT NULL CHECK (length(variable_name) > 0),
    point_id TEXT NOT NULL CHECK (length(point_id) > 0),
    valid_time TEXT NOT NULL,
    value REAL,
    grid_latitude REAL NOT NULL,
    grid_longitude REAL NOT NULL,
    distance_km REAL NOT NULL CHECK (distance_km >= 0),
    out_of_domain INTEGER NOT NULL CHECK (out_of_domain IN (0, 1)),
    source TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    PRIMARY KEY (run_date, cycle, forecast_hour, variable_name, point_id)
);

CREATE INDEX IF NOT EXISTS idx_{table}_valid_time ON {table}(valid_time);
CREATE INDEX IF NOT EXISTS idx_{table}_point ON {table}(point_id, variable_name)
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(point: &str, variable: &str, value: Option<f64>) -> ExtractionRecord {
        ExtractionRecord {
            key: NaturalKey {
                run_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                cycle: "06".to_string(),
                forecast_hour: 5,
                variable_name: variable.to_string(),
                point_id: point.to_string(),
            },
            valid_time: Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap(),
            value,
            grid_latitude: 11.0,
            grid_longitude: 21.0,
            distance_km: 15.7,
            out_of_domain: false,
            source: "hrrr.20240101/conus/hrrr.t06z.wrfsfcf05.grib2".to_string(),
        }
    }

    #[test]
    fn test_table_name_validation() {
        assert!(validate_table_name("hrrr_forecasts").is_ok());
        assert!(validate_table_name("_t1").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("1abc").is_err());
        assert!(validate_table_name("x; DROP TABLE y").is_err());
        assert!(validate_table_name("sqlite_master").is_err());
    }

    #[tokio::test]
    async fn test_open_rejects_bad_table_name() {
        let err = ForecastStore::open_memory("bad name").await.err().unwrap();
        assert!(matches!(err, StorageError::InvalidTableName(_)));
    }

    #[tokio::test]
    async fn test_insert_then_identical_upsert_is_unchanged() {
        let store = ForecastStore::open_memory(DEFAULT_TABLE_NAME).await.unwrap();
        let batch = vec![
            record("p1", "temperature_2m", Some(288.15)),
            record("p2", "temperature_2m", Some(289.0)),
        ];

        let first = store.upsert(&batch).await.unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(first.written(), 2);

        let before = store.fetch(&batch[0].key).await.unwrap().unwrap();

        let second = store.upsert(&batch).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(store.count().await.unwrap(), 2);

        let after = store.fetch(&batch[0].key).await.unwrap().unwrap();
        assert_eq!(before.ingested_at, after.ingested_at);
        assert_eq!(after.record, batch[0]);
    }

    #[tokio::test]
    async fn test_changed_value_is_updated() {
        let store = ForecastStore::open_memory(DEFAULT_TABLE_NAME).await.unwrap();
        store
            .upsert(&[record("p1", "temperature_2m", Some(288.0))])
            .await
            .unwrap();

        let outcome = store
            .upsert(&[record("p1", "temperature_2m", Some(290.5))])
            .await
            .unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(store.count().await.unwrap(), 1);

        let all = store.fetch_all().await.unwrap();
        assert_eq!(all[0].record.value, Some(290.5));
    }

    #[tokio::test]
    async fn test_missing_value_roundtrips_as_null() {
        let store = ForecastStore::open_memory(DEFAULT_TABLE_NAME).await.unwrap();
        let r = record("p1", "surface_roughness", None);
        store.upsert(std::slice::from_ref(&r)).await.unwrap();

        let stored = store.fetch(&r.key).await.unwrap().unwrap();
        assert_eq!(stored.record.value, None);

        // NULL -> NULL is not a change
        let again = store.upsert(&[r]).await.unwrap();
        assert_eq!(again.unchanged, 1);
    }

    #[tokio::test]
    async fn test_invalid_record_fails_without_aborting_batch() {
        let store = ForecastStore::open_memory(DEFAULT_TABLE_NAME).await.unwrap();
        let mut bad = record("", "temperature_2m", Some(1.0));
        bad.key.point_id = String::new();

        let outcome = store
            .upsert(&[
                record("p1", "temperature_2m", Some(1.0)),
                bad,
                record("p2", "temperature_2m", Some(2.0)),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.total(), 3);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_extended_forecast_hours_are_stored() {
        let store = ForecastStore::open_memory(DEFAULT_TABLE_NAME).await.unwrap();
        let mut r = record("p1", "temperature_2m", Some(280.0));
        r.key.forecast_hour = 60;

        let outcome = store.upsert(std::slice::from_ref(&r)).await.unwrap();
        assert_eq!(outcome.inserted, 1, "{:?}", outcome.failures);
        assert_eq!(outcome.failed, 0);

        let stored = store.fetch(&r.key).await.unwrap().unwrap();
        assert_eq!(stored.record.key.forecast_hour, 60);
    }

    #[tokio::test]
    async fn test_fetch_all_is_key_ordered() {
        let store = ForecastStore::open_memory("custom_table").await.unwrap();
        store
            .upsert(&[
                record("p2", "temperature_2m", Some(2.0)),
                record("p1", "dewpoint_2m", Some(3.0)),
                record("p1", "temperature_2m", Some(1.0)),
            ])
            .await
            .unwrap();

        let keys: Vec<String> = store
            .fetch_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| format!("{}:{}", r.record.key.variable_name, r.record.key.point_id))
            .collect();
        assert_eq!(
            keys,
            vec!["dewpoint_2m:p1", "temperature_2m:p1", "temperature_2m:p2"]
        );
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("points.db");

        {
            let store = ForecastStore::open(&path, DEFAULT_TABLE_NAME).await.unwrap();
            store
                .upsert(&[record("p1", "temperature_2m", Some(1.0))])
                .await
                .unwrap();
            store.close().await;
        }

        let store = ForecastStore::open(&path, DEFAULT_TABLE_NAME).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[test]
    fn test_outcome_merge() {
        let mut a = UpsertOutcome {
            inserted: 1,
            ..Default::default()
        };
        a.merge(UpsertOutcome {
            updated: 2,
            unchanged: 3,
            ..Default::default()
        });
        assert_eq!(a.total(), 6);
        assert_eq!(a.written(), 3);
    }
}
