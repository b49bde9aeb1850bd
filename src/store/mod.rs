pub mod batch;
pub mod record;
pub mod report;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection};
use thiserror::Error;
use tracing::debug;

pub use batch::Batch;
pub use record::{json_to_sql, Record, SqlValue};
pub use report::{AreaSummary, Report};
pub use schema::TableSchema;

use record::quote_ident;

pub const CENTRES_TABLE: &str = "centres";
pub const STATS_TABLE: &str = "stats";

pub const URI_COLUMN: &str = "uri";
pub const DATE_COLUMN: &str = "date";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed creating store directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("table {0} needs at least one column")]
    NoColumns(String),
    #[error("refusing to write an empty record into {0}")]
    EmptyRecord(String),
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn table_exists(&self, name: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn upsert(&self, table: &str, record: &Record) -> Result<(), StoreError> {
        self.insert_with("INSERT OR REPLACE INTO", table, record)
    }

    pub fn append(&self, table: &str, record: &Record) -> Result<(), StoreError> {
        self.insert_with("INSERT INTO", table, record)
    }

    fn insert_with(&self, verb: &str, table: &str, record: &Record) -> Result<(), StoreError> {
        if record.is_empty() {
            return Err(StoreError::EmptyRecord(table.to_string()));
        }
        let columns = record
            .columns()
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=record.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "{verb} {} ({columns}) VALUES ({placeholders})",
            quote_ident(table)
        );
        self.conn.execute(&sql, params_from_iter(record.values()))?;
        Ok(())
    }

    pub fn exists_today(
        &self,
        table: &str,
        base_uri: &str,
        today: NaiveDate,
    ) -> Result<bool, StoreError> {
        if !self.table_exists(table)? {
            return Ok(false);
        }
        let sql = format!(
            "SELECT 1 FROM {table} WHERE {date} = ?1 AND ({uri} = ?2 OR substr({uri}, 1, length(?3)) = ?3) LIMIT 1",
            table = quote_ident(table),
            date = quote_ident(DATE_COLUMN),
            uri = quote_ident(URI_COLUMN),
        );
        let qualified_prefix = format!("{base_uri}?");
        let mut stmt = self.conn.prepare(&sql)?;
        let found = stmt.exists(params![
            today.format("%Y-%m-%d").to_string(),
            base_uri,
            qualified_prefix
        ])?;
        debug!(table, base_uri, found, "checked today's snapshot");
        Ok(found)
    }

    pub fn rows(&self, table: &str) -> Result<Vec<Record>, StoreError> {
        if !self.table_exists(table)? {
            return Ok(Vec::new());
        }
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {}", quote_ident(table)))?;
        let names = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let rows = stmt
            .query_map([], |row| {
                names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| Ok((name.clone(), row.get::<_, SqlValue>(i)?)))
                    .collect::<rusqlite::Result<Record>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count(&self, table: &str) -> Result<usize, StoreError> {
        if !self.table_exists(table)? {
            return Ok(0);
        }
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
