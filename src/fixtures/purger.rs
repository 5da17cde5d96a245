//! Empties mapped tables ahead of a fixture load

use crate::error::Result;
use crate::orm::{EntityManager, Value, quote_identifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PurgeMode {
    /// `DELETE FROM` every table
    #[default]
    Delete,
    /// Delete and also reset the autoincrement counters
    Truncate,
}

#[derive(Debug, Clone, Default)]
pub struct Purger {
    mode: PurgeMode,
    excluded_tables: Vec<String>,
}

impl Purger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: PurgeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Leave `table` untouched
    pub fn exclude_table(mut self, table: impl Into<String>) -> Self {
        self.excluded_tables.push(table.into());
        self
    }

    pub fn mode(&self) -> PurgeMode {
        self.mode
    }

    /// Delete every row of every mapped table that exists, last mapping
    /// first. Returns the number of rows removed.
    pub fn purge(&self, em: &mut EntityManager) -> Result<usize> {
        let names = em
            .configuration()
            .metadata_driver()
            .map(|driver| driver.all_class_names())
            .unwrap_or_default();

        let mut tables = Vec::with_capacity(names.len());
        for name in &names {
            tables.push(em.class_metadata(name)?.table);
        }

        let reset_sequences = self.mode == PurgeMode::Truncate
            && em.connection().table_exists("sqlite_sequence")?;

        let mut removed = 0;
        for table in tables.iter().rev() {
            if self.excluded_tables.contains(table) || !em.connection().table_exists(table)? {
                continue;
            }
            removed += em
                .connection()
                .execute(&format!("DELETE FROM {}", quote_identifier(table)), &[])?;
            if reset_sequences {
                em.connection().execute(
                    "DELETE FROM sqlite_sequence WHERE name = ?1",
                    &[Value::Text(table.clone())],
                )?;
            }
        }

        tracing::debug!(removed, mode = ?self.mode, "purged mapped tables");
        Ok(removed)
    }
}
