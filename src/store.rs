//! Dataset access over SQLite
//!
//! [`TrialStore`] owns a connection pool to the clinical database. Every
//! operation acquires a pooled connection for its own duration; nothing holds
//! a connection across calls, so schema lookups and query execution within
//! one model turn never contend on a shared handle.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::audit::AUDIT_TABLE;
use crate::error::Result;

/// Name of the subject-level reference table.
pub const CLINICAL_TABLE: &str = "clinical";

/// Result of executing a statement.
///
/// The two outcome forms are mutually exclusive by construction: a success
/// carries `rowcount == rows.len()` and no error; a failure carries the
/// engine's message with empty rows and a zero rowcount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutput {
    pub rows: Vec<Value>,
    pub rowcount: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryOutput {
    pub fn success(rows: Vec<Value>) -> Self {
        let rowcount = rows.len();
        Self {
            rows,
            rowcount,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            rows: Vec::new(),
            rowcount: 0,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Pooled access to the clinical dataset.
#[derive(Debug, Clone)]
pub struct TrialStore {
    pool: SqlitePool,
}

impl TrialStore {
    /// Open (creating if missing) a file-backed store.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// In-memory store for tests. A single connection keeps the database
    /// alive for the pool's lifetime.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// The underlying pool, shared with the audit log.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Report table/column names and declared types for the dataset,
    /// excluding the audit table and engine internals. Idempotent and safe to
    /// call concurrently.
    pub async fn list_schema(&self) -> Result<BTreeMap<String, BTreeMap<String, String>>> {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut schema = BTreeMap::new();
        for table in tables
            .into_iter()
            .filter(|t| !t.eq_ignore_ascii_case(AUDIT_TABLE))
        {
            // PRAGMA does not accept bound parameters; the name comes from
            // sqlite_master and is quoted before interpolation.
            let quoted = table.replace('"', "\"\"");
            let columns = sqlx::query(&format!("PRAGMA table_info(\"{}\")", quoted))
                .fetch_all(&self.pool)
                .await?;

            let mut table_schema = BTreeMap::new();
            for column in columns {
                let name: String = column.try_get("name")?;
                let declared_type: String = column.try_get("type")?;
                table_schema.insert(name, declared_type);
            }
            schema.insert(table, table_schema);
        }
        Ok(schema)
    }

    /// Execute a statement with optional positional parameters.
    ///
    /// The statement must already have passed the policy gate; no shape
    /// restriction is applied here. Engine failures come back as the
    /// structured error form rather than an `Err`, worded so the calling
    /// model can correct itself.
    pub async fn run(&self, sql: &str, params: &[Value]) -> QueryOutput {
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        query.bind(i)
                    } else {
                        query.bind(n.as_f64().unwrap_or(0.0))
                    }
                }
                Value::String(s) => query.bind(s.clone()),
                other => query.bind(other.to_string()),
            };
        }

        let rows = match query.fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => {
                return QueryOutput::failure(format!(
                    "SQL error: {}. Did you check list_schema first?",
                    e
                ))
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_json(row) {
                Ok(value) => out.push(value),
                Err(e) => return QueryOutput::failure(format!("SQL error: {}", e)),
            }
        }
        QueryOutput::success(out)
    }

    /// Create and populate the demo dataset unless the table already exists.
    /// Returns whether seeding happened.
    ///
    /// Subjects are generated deterministically: ids `001-0001`…, 25 sites,
    /// enrollment dates scattered over the past year, roughly 80% evaluable,
    /// ages 18-85, alternating sexes, cycling race categories.
    pub async fn ensure_demo_dataset(&self, n: usize) -> Result<bool> {
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(CLINICAL_TABLE)
        .fetch_optional(&self.pool)
        .await?;
        if existing.is_some() {
            return Ok(false);
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE clinical (
                STUDYID TEXT NOT NULL,
                USUBJID TEXT NOT NULL UNIQUE,
                SITEID TEXT NOT NULL,
                ENRLDT DATETIME NOT NULL,
                EVALFLAG BOOLEAN NOT NULL,
                AGE INTEGER NOT NULL,
                SEX TEXT NOT NULL,
                RACE TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        let races = ["White", "Black", "Asian", "Other"];
        let today = chrono::Utc::now();
        for i in 1..=n {
            let enrollment = today - chrono::Duration::days(((i * 37) % 365) as i64);
            sqlx::query(
                "INSERT INTO clinical (STUDYID, USUBJID, SITEID, ENRLDT, EVALFLAG, AGE, SEX, RACE) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind("DEMO-101")
            .bind(format!("001-{:04}", i))
            .bind(format!("SITE{:02}", (i - 1) % 25 + 1))
            .bind(enrollment.to_rfc3339())
            .bind(i % 5 != 0)
            .bind((18 + (i * 13) % 68) as i64)
            .bind(if i % 2 == 0 { "F" } else { "M" })
            .bind(races[(i - 1) % races.len()])
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(subjects = n, "seeded demo clinical dataset");
        Ok(true)
    }
}

/// Convert a result row into a JSON object keyed by column name.
fn row_to_json(row: &SqliteRow) -> Result<Value> {
    let mut map = serde_json::Map::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "INT" | "BIGINT" => Value::from(row.try_get::<i64, _>(idx)?),
                "REAL" | "NUMERIC" => serde_json::Number::from_f64(row.try_get::<f64, _>(idx)?)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(idx)?),
                "BLOB" => {
                    Value::String(String::from_utf8_lossy(&row.try_get::<Vec<u8>, _>(idx)?).into_owned())
                }
                _ => Value::String(row.try_get::<String, _>(idx)?),
            }
        };
        map.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(map))
}
