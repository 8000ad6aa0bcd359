//! Security-master data sources
//!
//! [`SqlSecuritySource`] reads one as-of-date snapshot from a SQL table.
//! `instrument_id` and `as_of_date` form the key; every other non-null column
//! becomes an attribute, typed by the column's SQL type.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use secrecon_common::{Error, Result, SecurityRecord, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use tracing::{debug, info};

const KEY_INSTRUMENT: &str = "instrument_id";
const KEY_DATE: &str = "as_of_date";

/// Data-source collaborator: one side of the reconciliation
#[async_trait]
pub trait SecuritySource: Send + Sync {
    /// System label (`legacy`, `strategic`)
    fn system(&self) -> &str;

    /// All rows for `as_of_date`
    async fn fetch(&self, as_of_date: NaiveDate) -> Result<Vec<SecurityRecord>>;
}

/// Table-backed source over a pooled connection
#[derive(Clone)]
pub struct SqlSecuritySource {
    system: String,
    pool: SqlitePool,
    table: String,
    timeout: Duration,
}

impl SqlSecuritySource {
    /// Fails with a configuration error when `table` is not a plain
    /// (optionally schema-qualified) identifier.
    pub fn new(system: impl Into<String>, pool: SqlitePool, table: impl Into<String>, timeout: Duration) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self {
            system: system.into(),
            pool,
            table,
            timeout,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Total rows in the table, for connectivity diagnostics
    pub async fn row_count(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let count = tokio::time::timeout(self.timeout, sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool))
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| Error::Fetch(format!("{}: count on {} failed: {}", self.system, self.table, e)))?;
        Ok(count)
    }

    fn timed_out(&self) -> Error {
        Error::Fetch(format!(
            "{}: query on {} exceeded {}s",
            self.system,
            self.table,
            self.timeout.as_secs()
        ))
    }
}

#[async_trait]
impl SecuritySource for SqlSecuritySource {
    fn system(&self) -> &str {
        &self.system
    }

    async fn fetch(&self, as_of_date: NaiveDate) -> Result<Vec<SecurityRecord>> {
        let sql = format!("SELECT * FROM {} WHERE date({}) = ?", self.table, KEY_DATE);
        debug!(system = %self.system, %as_of_date, "{}", sql);

        let rows = tokio::time::timeout(
            self.timeout,
            sqlx::query(&sql)
                .bind(as_of_date.format("%Y-%m-%d").to_string())
                .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| self.timed_out())?
        .map_err(|e| Error::Fetch(format!("{}: select from {} failed: {}", self.system, self.table, e)))?;

        let records = rows
            .iter()
            .map(|row| row_to_record(row, as_of_date))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| match e {
                Error::Fetch(msg) => Error::Fetch(format!("{}: {}", self.system, msg)),
                other => other,
            })?;

        info!(
            system = %self.system,
            table = %self.table,
            %as_of_date,
            rows = records.len(),
            "Fetched snapshot"
        );
        Ok(records)
    }
}

fn validate_table_name(table: &str) -> Result<()> {
    let valid_part = |part: &str| {
        !part.is_empty()
            && !part.starts_with(|c: char| c.is_ascii_digit())
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() <= 2 && parts.iter().all(|p| valid_part(p)) {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid table name '{table}'")))
    }
}

fn row_to_record(row: &SqliteRow, as_of_date: NaiveDate) -> Result<SecurityRecord> {
    let mut instrument_id = None;
    let mut record_date = None;
    let mut attributes = Vec::new();

    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let value = column_value(row, idx)?;
        match name {
            KEY_INSTRUMENT => instrument_id = value.map(|v| v.to_string()),
            KEY_DATE => record_date = value,
            _ => {
                if let Some(value) = value {
                    attributes.push((name.to_string(), value));
                }
            }
        }
    }

    let instrument_id =
        instrument_id.ok_or_else(|| Error::Fetch(format!("row without {KEY_INSTRUMENT}")))?;
    let record_date = match record_date {
        Some(Value::Date(d)) => d,
        Some(Value::Text(s)) => parse_date(&s)
            .ok_or_else(|| Error::Fetch(format!("{instrument_id}: unparseable {KEY_DATE} '{s}'")))?,
        _ => as_of_date,
    };

    let mut record = SecurityRecord::new(instrument_id, record_date);
    record.attributes.extend(attributes);
    Ok(record)
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date()))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").map(|dt| dt.date()))
        .ok()
}

/// Map one column to a [`Value`] by declared type, falling back to the
/// storage class of the value itself. NULL maps to `None`.
fn column_value(row: &SqliteRow, idx: usize) -> Result<Option<Value>> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(None);
    }
    let storage = raw.type_info().name().to_ascii_uppercase();
    let declared = row.column(idx).type_info().name().to_ascii_uppercase();

    let value = match (declared.as_str(), storage.as_str()) {
        ("BOOLEAN", "INTEGER") => Value::Bool(row.try_get::<bool, _>(idx)?),
        ("DATE", "TEXT") => {
            let s: String = row.try_get(idx)?;
            match parse_date(&s) {
                Some(d) => Value::Date(d),
                None => Value::Text(s),
            }
        }
        (_, "INTEGER") => Value::Integer(row.try_get::<i64, _>(idx)?),
        (_, "REAL") => Value::Float(row.try_get::<f64, _>(idx)?),
        (_, "BLOB") => {
            let bytes: Vec<u8> = row.try_get(idx)?;
            Value::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => Value::Text(row.try_get::<String, _>(idx)?),
    };
    Ok(Some(value))
}
