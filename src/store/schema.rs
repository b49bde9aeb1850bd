use rusqlite::params;
use tracing::{debug, info, warn};

use crate::store::record::{quote_ident, Record};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn covers(&self, record: &Record) -> bool {
        record.columns().all(|c| self.has_column(c))
    }

    fn definition(&self) -> String {
        let mut parts = self
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>();
        if !self.primary_key.is_empty() {
            let key = self
                .primary_key
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("PRIMARY KEY ({key})"));
        }
        parts.join(", ")
    }
}

impl Store {
    pub fn table_schema(&self, name: &str) -> Result<Option<TableSchema>, StoreError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT name, pk FROM pragma_table_info(?1) ORDER BY cid")?;
        let rows = stmt
            .query_map(params![name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut key_parts = rows
            .iter()
            .filter(|(_, pk)| *pk > 0)
            .map(|(column, pk)| (*pk, column.clone()))
            .collect::<Vec<_>>();
        key_parts.sort();

        Ok(Some(TableSchema {
            name: name.to_string(),
            columns: rows.into_iter().map(|(column, _)| column).collect(),
            primary_key: key_parts.into_iter().map(|(_, column)| column).collect(),
        }))
    }

    /// Makes sure `name` exists with at least `required` columns.
    ///
    /// A missing table is created with exactly those columns. An existing
    /// table that lacks some of them is rebuilt as `existing ∪ missing`:
    /// the old table is renamed aside, the new one created, rows copied
    /// over through the existing-column projection and the old one dropped,
    /// all inside one savepoint. Added columns read as NULL on old rows.
    /// Columns are never dropped or renamed, and an existing primary key is
    /// kept as is.
    pub fn ensure_table<I, S>(
        &self,
        name: &str,
        required: I,
        primary_key: Option<&str>,
    ) -> Result<TableSchema, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut wanted: Vec<String> = Vec::new();
        for column in required {
            let column = column.as_ref();
            if !wanted.iter().any(|c| c == column) {
                wanted.push(column.to_string());
            }
        }
        if let Some(key) = primary_key {
            if !wanted.iter().any(|c| c == key) {
                wanted.insert(0, key.to_string());
            }
        }
        if wanted.is_empty() {
            return Err(StoreError::NoColumns(name.to_string()));
        }

        let Some(existing) = self.table_schema(name)? else {
            let schema = TableSchema {
                name: name.to_string(),
                columns: wanted,
                primary_key: primary_key.map(|k| vec![k.to_string()]).unwrap_or_default(),
            };
            self.conn().execute_batch(&format!(
                "CREATE TABLE {} ({});",
                quote_ident(name),
                schema.definition()
            ))?;
            info!(table = name, columns = schema.columns.len(), "created table");
            return Ok(schema);
        };

        let missing = wanted
            .into_iter()
            .filter(|c| !existing.has_column(c))
            .collect::<Vec<_>>();
        if missing.is_empty() {
            debug!(table = name, "schema already up to date");
            return Ok(existing);
        }

        self.migrate(existing, missing)
    }

    fn migrate(
        &self,
        existing: TableSchema,
        missing: Vec<String>,
    ) -> Result<TableSchema, StoreError> {
        let name = existing.name.clone();
        let aside = format!("{name}__pre_migration");
        let copied = existing
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut evolved = existing;
        evolved.columns.extend(missing.iter().cloned());

        let sql = format!(
            r#"
ALTER TABLE {table} RENAME TO {aside};
CREATE TABLE {table} ({definition});
INSERT INTO {table} ({copied}) SELECT {copied} FROM {aside};
DROP TABLE {aside};
"#,
            table = quote_ident(&name),
            aside = quote_ident(&aside),
            definition = evolved.definition(),
        );

        let conn = self.conn();
        conn.execute_batch("SAVEPOINT schema_migration;")?;
        if let Err(err) = conn.execute_batch(&sql) {
            if let Err(rollback) =
                conn.execute_batch("ROLLBACK TO schema_migration; RELEASE schema_migration;")
            {
                warn!(table = %name, "migration rollback failed: {rollback}");
            }
            return Err(err.into());
        }
        conn.execute_batch("RELEASE schema_migration;")?;

        info!(table = %name, added = ?missing, "migrated table schema");
        Ok(evolved)
    }
}
