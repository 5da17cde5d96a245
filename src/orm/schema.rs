//! Schema generation from entity metadata

use crate::error::Result;

use super::{EntityManager, EntityMetadata};

/// Creates and drops tables for a set of entities on a manager's connection
pub struct SchemaTool<'a> {
    em: &'a mut EntityManager,
}

impl<'a> SchemaTool<'a> {
    pub fn new(em: &'a mut EntityManager) -> Self {
        Self { em }
    }

    /// DDL for one entity. Tables are created without `IF NOT EXISTS` so a
    /// conflicting schema surfaces as an engine error.
    pub fn create_table_sql(metadata: &EntityMetadata) -> String {
        let mut columns = vec![format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            quote_identifier(&metadata.id_column)
        )];
        columns.extend(metadata.columns.iter().map(|column| {
            let null = if column.nullable { "" } else { " NOT NULL" };
            format!(
                "{} {}{}",
                quote_identifier(&column.name),
                column.kind.sql_type(),
                null
            )
        }));

        format!(
            "CREATE TABLE {} ({})",
            quote_identifier(&metadata.table),
            columns.join(", ")
        )
    }

    pub fn create_schema_sql(metadata: &[EntityMetadata]) -> Vec<String> {
        metadata.iter().map(Self::create_table_sql).collect()
    }

    /// Create tables for exactly the given entities, atomically
    pub fn create_schema(&mut self, metadata: &[EntityMetadata]) -> Result<()> {
        if metadata.is_empty() {
            return Ok(());
        }

        let statements = Self::create_schema_sql(metadata);
        self.em.transactional(|em| {
            for sql in &statements {
                em.connection().execute(sql, &[])?;
            }
            Ok(())
        })?;

        tracing::debug!(
            entities = ?metadata.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            "created schema"
        );
        Ok(())
    }

    /// Drop the tables of the given entities, ignoring ones that do not exist
    pub fn drop_schema(&mut self, metadata: &[EntityMetadata]) -> Result<()> {
        for meta in metadata.iter().rev() {
            let sql = format!("DROP TABLE IF EXISTS {}", quote_identifier(&meta.table));
            self.em.connection().execute(&sql, &[])?;
        }
        Ok(())
    }
}

pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
