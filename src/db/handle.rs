//! Live database handle
//!
//! A connection pool for one engine plus the row decoding used by callers
//! that only need JSON-friendly values.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use sqlx::mysql::types::MySqlTime;
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};

use super::error::DatabaseError;
use crate::config::EngineKind;

/// Engine-specific pool
#[derive(Debug, Clone)]
pub enum DatabasePool {
    Mysql(MySqlPool),
    Sqlite(SqlitePool),
}

/// Handle to an open database. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct DatabaseHandle {
    pool: DatabasePool,
    dates_as_strings: bool,
}

/// One decoded cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

/// Result of [`DatabaseHandle::fetch_all`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl DatabaseHandle {
    pub(crate) fn new(pool: DatabasePool, dates_as_strings: bool) -> Self {
        Self {
            pool,
            dates_as_strings,
        }
    }

    pub fn engine(&self) -> EngineKind {
        match &self.pool {
            DatabasePool::Mysql(_) => EngineKind::Mysql,
            DatabasePool::Sqlite(_) => EngineKind::Sqlite,
        }
    }

    pub fn dates_as_strings(&self) -> bool {
        self.dates_as_strings
    }

    pub fn is_closed(&self) -> bool {
        match &self.pool {
            DatabasePool::Mysql(pool) => pool.is_closed(),
            DatabasePool::Sqlite(pool) => pool.is_closed(),
        }
    }

    /// Round-trip `SELECT 1`
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        match &self.pool {
            DatabasePool::Mysql(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DatabasePool::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }
        Ok(())
    }

    /// Run `sql` and decode every row.
    pub async fn fetch_all(&self, sql: &str) -> Result<QueryRows, DatabaseError> {
        match &self.pool {
            DatabasePool::Mysql(pool) => {
                // The text protocol hands temporal values over as stored,
                // including zero dates chrono cannot represent
                let rows = if self.dates_as_strings {
                    sqlx::raw_sql(sql).fetch_all(pool).await?
                } else {
                    sqlx::query(sql).fetch_all(pool).await?
                };
                let mut result = QueryRows {
                    columns: column_names(rows.first()),
                    rows: Vec::with_capacity(rows.len()),
                };
                for row in &rows {
                    result.rows.push(decode_mysql_row(row, self.dates_as_strings)?);
                }
                Ok(result)
            }
            DatabasePool::Sqlite(pool) => {
                let rows = sqlx::query(sql).fetch_all(pool).await?;
                let mut result = QueryRows {
                    columns: column_names(rows.first()),
                    rows: Vec::with_capacity(rows.len()),
                };
                for row in &rows {
                    result
                        .rows
                        .push(decode_sqlite_row(row, self.dates_as_strings)?);
                }
                Ok(result)
            }
        }
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        match &self.pool {
            DatabasePool::Mysql(pool) => pool.close().await,
            DatabasePool::Sqlite(pool) => pool.close().await,
        }
    }
}

fn column_names<R: Row>(row: Option<&R>) -> Vec<String> {
    row.map(|row| {
        row.columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    })
    .unwrap_or_default()
}

fn is_temporal(type_name: &str) -> bool {
    matches!(type_name, "DATE" | "TIME" | "DATETIME" | "TIMESTAMP")
}

fn decode_mysql_row(row: &MySqlRow, dates_as_strings: bool) -> Result<Vec<CellValue>, sqlx::Error> {
    let mut cells = Vec::with_capacity(row.len());
    for column in row.columns() {
        let i = column.ordinal();
        if row.try_get_raw(i)?.is_null() {
            cells.push(CellValue::Null);
            continue;
        }

        let type_name = column.type_info().name();
        let cell = match type_name {
            "BOOLEAN" => CellValue::Bool(row.try_get(i)?),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                CellValue::Int(row.try_get(i)?)
            }
            name if name.ends_with(" UNSIGNED") => CellValue::UInt(row.try_get(i)?),
            "YEAR" => CellValue::UInt(row.try_get_unchecked::<u16, _>(i)? as u64),
            "FLOAT" => CellValue::Float(row.try_get::<f32, _>(i)? as f64),
            "DOUBLE" => CellValue::Float(row.try_get(i)?),
            name if dates_as_strings && is_temporal(name) => {
                CellValue::Text(row.try_get_unchecked(i)?)
            }
            "DATE" => CellValue::Date(row.try_get(i)?),
            "DATETIME" | "TIMESTAMP" => CellValue::DateTime(row.try_get(i)?),
            // MySQL TIME is a signed interval that may exceed 24h
            "TIME" => match row.try_get::<NaiveTime, _>(i) {
                Ok(t) => CellValue::Time(t),
                Err(_) => CellValue::Text(row.try_get::<MySqlTime, _>(i)?.to_string()),
            },
            "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB"
            | "BIT" | "GEOMETRY" => CellValue::Bytes(row.try_get_unchecked(i)?),
            _ => text_or_bytes(row.try_get_unchecked::<Vec<u8>, _>(i)?),
        };
        cells.push(cell);
    }
    Ok(cells)
}

fn decode_sqlite_row(
    row: &SqliteRow,
    dates_as_strings: bool,
) -> Result<Vec<CellValue>, sqlx::Error> {
    let mut cells = Vec::with_capacity(row.len());
    for column in row.columns() {
        let i = column.ordinal();
        if row.try_get_raw(i)?.is_null() {
            cells.push(CellValue::Null);
            continue;
        }

        let cell = match column.type_info().name() {
            "INTEGER" => CellValue::Int(row.try_get(i)?),
            "BOOLEAN" => CellValue::Bool(row.try_get(i)?),
            "REAL" => CellValue::Float(row.try_get(i)?),
            "BLOB" => CellValue::Bytes(row.try_get(i)?),
            // Stored as text; only parse when typed values were asked for
            name if dates_as_strings && is_temporal(name) => {
                CellValue::Text(row.try_get_unchecked(i)?)
            }
            "DATE" => row
                .try_get::<NaiveDate, _>(i)
                .map(CellValue::Date)
                .or_else(|_| row.try_get_unchecked(i).map(CellValue::Text))?,
            "TIME" => row
                .try_get::<NaiveTime, _>(i)
                .map(CellValue::Time)
                .or_else(|_| row.try_get_unchecked(i).map(CellValue::Text))?,
            "DATETIME" => row
                .try_get::<NaiveDateTime, _>(i)
                .map(CellValue::DateTime)
                .or_else(|_| row.try_get_unchecked(i).map(CellValue::Text))?,
            _ => match row.try_get_unchecked::<String, _>(i) {
                Ok(text) => CellValue::Text(text),
                Err(_) => CellValue::Bytes(row.try_get_unchecked(i)?),
            },
        };
        cells.push(cell);
    }
    Ok(cells)
}

fn text_or_bytes(raw: Vec<u8>) -> CellValue {
    match String::from_utf8(raw) {
        Ok(text) => CellValue::Text(text),
        Err(e) => CellValue::Bytes(e.into_bytes()),
    }
}
