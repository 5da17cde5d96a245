//! Entity manager: persistence operations bound to one connection

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{HarnessError, Result};

use super::schema::quote_identifier;
use super::{
    Connection, Entity, EntityMetadata, EntityResolver, EventArgs, EventManager, LifecycleEvent,
    OrmConfiguration, Value,
};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// A live connection paired with its ORM configuration.
///
/// Writes are grouped into a unit of work: the first `persist` or `remove`
/// opens a transaction and `flush` commits it.
#[derive(Debug)]
pub struct EntityManager {
    handle_id: u64,
    conn: Connection,
    config: OrmConfiguration,
    events: EventManager,
    resolver: EntityResolver,
    metadata_cache: HashMap<String, EntityMetadata>,
    identity_map: HashSet<(String, i64)>,
    unit_of_work_open: bool,
}

impl EntityManager {
    /// Fails with `MissingMappingDriver` when `config` has no metadata driver
    pub fn create(
        conn: Connection,
        config: OrmConfiguration,
        events: EventManager,
        resolver: EntityResolver,
    ) -> Result<Self> {
        if config.metadata_driver().is_none() {
            return Err(HarnessError::MissingMappingDriver {
                configuration: config.name().to_string(),
            });
        }

        Ok(Self {
            handle_id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            conn,
            config,
            events,
            resolver,
            metadata_cache: HashMap::new(),
            identity_map: HashSet::new(),
            unit_of_work_open: false,
        })
    }

    /// Process-unique id of this handle
    pub fn handle_id(&self) -> u64 {
        self.handle_id
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn configuration(&self) -> &OrmConfiguration {
        &self.config
    }

    pub fn event_manager(&self) -> &EventManager {
        &self.events
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_connected()
    }

    /// Metadata for `name` (or the entity it resolves to), cached per handle
    pub fn class_metadata(&mut self, name: &str) -> Result<EntityMetadata> {
        let resolved = self.resolver.resolve(name).to_string();
        if let Some(meta) = self.metadata_cache.get(&resolved) {
            return Ok(meta.clone());
        }

        let driver = self
            .config
            .metadata_driver()
            .ok_or_else(|| HarnessError::MissingMappingDriver {
                configuration: self.config.name().to_string(),
            })?;
        let meta = driver.load_metadata(&resolved)?;
        self.metadata_cache.insert(resolved, meta.clone());
        Ok(meta)
    }

    fn identity_key<E: Entity>(&self, id: i64) -> (String, i64) {
        (self.resolver.resolve(E::NAME).to_string(), id)
    }

    fn begin_unit_of_work(&mut self) -> Result<()> {
        if !self.unit_of_work_open {
            self.conn.begin_transaction()?;
            self.unit_of_work_open = true;
        }
        Ok(())
    }

    /// Write `entity`: a new row when it has no identifier (which is then
    /// assigned), otherwise an update of its row
    pub fn persist<E: Entity>(&mut self, entity: &mut E) -> Result<()> {
        let meta = self.class_metadata(E::NAME)?;
        self.events.dispatch(
            LifecycleEvent::PrePersist,
            &EventArgs::for_entity(&meta.name, entity.id()),
        );
        self.begin_unit_of_work()?;

        let values = entity.values();
        let id = match entity.id() {
            Some(id) => {
                let assignments: Vec<String> = meta
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| format!("{} = ?{}", quote_identifier(&c.name), i + 1))
                    .collect();
                let sql = format!(
                    "UPDATE {} SET {} WHERE {} = ?{}",
                    quote_identifier(&meta.table),
                    assignments.join(", "),
                    quote_identifier(&meta.id_column),
                    values.len() + 1
                );
                let mut params = values;
                params.push(Value::Integer(id));
                self.conn.execute(&sql, &params)?;
                id
            }
            None => {
                self.conn.execute(&insert_sql(&meta), &values)?;
                let id = self.conn.last_insert_id()?;
                entity.set_id(id);
                id
            }
        };

        let key = self.identity_key::<E>(id);
        self.identity_map.insert(key);
        self.events.dispatch(
            LifecycleEvent::PostPersist,
            &EventArgs::for_entity(&meta.name, Some(id)),
        );
        Ok(())
    }

    pub fn remove<E: Entity>(&mut self, entity: &E) -> Result<()> {
        let meta = self.class_metadata(E::NAME)?;
        let id = entity
            .id()
            .ok_or_else(|| HarnessError::MissingIdentifier(meta.name.clone()))?;

        self.events.dispatch(
            LifecycleEvent::PreRemove,
            &EventArgs::for_entity(&meta.name, Some(id)),
        );
        self.begin_unit_of_work()?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_identifier(&meta.table),
            quote_identifier(&meta.id_column)
        );
        self.conn.execute(&sql, &[Value::Integer(id)])?;

        let key = self.identity_key::<E>(id);
        self.identity_map.remove(&key);
        self.events.dispatch(
            LifecycleEvent::PostRemove,
            &EventArgs::for_entity(&meta.name, Some(id)),
        );
        Ok(())
    }

    /// Commit the pending unit of work, if any
    pub fn flush(&mut self) -> Result<()> {
        self.events
            .dispatch(LifecycleEvent::PreFlush, &EventArgs::empty());
        if self.unit_of_work_open {
            self.conn.commit()?;
            self.unit_of_work_open = false;
        }
        self.events
            .dispatch(LifecycleEvent::PostFlush, &EventArgs::empty());
        Ok(())
    }

    pub fn find<E: Entity>(&mut self, id: i64) -> Result<Option<E>> {
        let meta = self.class_metadata(E::NAME)?;
        let sql = format!(
            "{} WHERE {} = ?1",
            select_sql(&meta),
            quote_identifier(&meta.id_column)
        );
        let mut rows = self.conn.query(&sql, &[Value::Integer(id)], E::from_row)?;
        let found = rows.pop();
        if found.is_some() {
            self.mark_loaded::<E>(&meta, &[id]);
        }
        Ok(found)
    }

    /// Rows whose columns equal every `(column, value)` pair, ordered by
    /// identifier. A `Null` value matches `IS NULL`.
    pub fn find_by<E: Entity>(&mut self, criteria: &[(&str, Value)]) -> Result<Vec<E>> {
        let meta = self.class_metadata(E::NAME)?;
        let (filter, params) = where_clause(&meta, criteria)?;
        let sql = format!(
            "{}{} ORDER BY {}",
            select_sql(&meta),
            filter,
            quote_identifier(&meta.id_column)
        );
        let rows = self.conn.query(&sql, &params, |row| {
            Ok((row.get::<_, i64>(0)?, E::from_row(row)?))
        })?;

        let ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
        self.mark_loaded::<E>(&meta, &ids);
        Ok(rows.into_iter().map(|(_, entity)| entity).collect())
    }

    pub fn find_one_by<E: Entity>(&mut self, criteria: &[(&str, Value)]) -> Result<Option<E>> {
        Ok(self.find_by(criteria)?.into_iter().next())
    }

    pub fn find_all<E: Entity>(&mut self) -> Result<Vec<E>> {
        self.find_by(&[])
    }

    pub fn count<E: Entity>(&mut self, criteria: &[(&str, Value)]) -> Result<i64> {
        let meta = self.class_metadata(E::NAME)?;
        let (filter, params) = where_clause(&meta, criteria)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            quote_identifier(&meta.table),
            filter
        );
        self.conn.query_i64(&sql, &params)
    }

    fn mark_loaded<E: Entity>(&mut self, meta: &EntityMetadata, ids: &[i64]) {
        for id in ids {
            let key = self.identity_key::<E>(*id);
            self.identity_map.insert(key);
            self.events.dispatch(
                LifecycleEvent::PostLoad,
                &EventArgs::for_entity(&meta.name, Some(*id)),
            );
        }
    }

    /// Whether `entity` is managed by this handle
    pub fn contains<E: Entity>(&self, entity: &E) -> bool {
        entity
            .id()
            .is_some_and(|id| self.identity_map.contains(&self.identity_key::<E>(id)))
    }

    /// Detach every managed entity
    pub fn clear(&mut self) {
        self.identity_map.clear();
        self.events
            .dispatch(LifecycleEvent::OnClear, &EventArgs::empty());
    }

    /// Run `f` inside a transaction, rolling back if it fails
    pub fn transactional<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.conn.begin_transaction()?;
        match f(self) {
            Ok(value) => {
                self.conn.commit()?;
                Ok(value)
            }
            Err(e) => {
                self.unit_of_work_open = false;
                if self.conn.is_transaction_active() {
                    if let Err(rollback) = self.conn.roll_back() {
                        tracing::warn!(error = %rollback, "rollback failed");
                    }
                }
                Err(e)
            }
        }
    }

    /// Close the connection; pending unflushed writes are discarded
    pub fn close(&mut self) -> Result<()> {
        self.unit_of_work_open = false;
        self.identity_map.clear();
        self.conn.close()
    }
}

fn select_sql(meta: &EntityMetadata) -> String {
    let columns: Vec<String> = meta
        .column_names()
        .into_iter()
        .map(quote_identifier)
        .collect();
    format!(
        "SELECT {} FROM {}",
        columns.join(", "),
        quote_identifier(&meta.table)
    )
}

fn insert_sql(meta: &EntityMetadata) -> String {
    if meta.columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote_identifier(&meta.table));
    }
    let columns: Vec<String> = meta
        .columns
        .iter()
        .map(|c| quote_identifier(&c.name))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(&meta.table),
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn where_clause(meta: &EntityMetadata, criteria: &[(&str, Value)]) -> Result<(String, Vec<Value>)> {
    if criteria.is_empty() {
        return Ok((String::new(), Vec::new()));
    }

    let mut conditions = Vec::with_capacity(criteria.len());
    let mut params = Vec::new();
    for (column, value) in criteria {
        if !meta.has_column(column) {
            return Err(HarnessError::UnknownColumn {
                entity: meta.name.clone(),
                column: column.to_string(),
            });
        }
        if *value == Value::Null {
            conditions.push(format!("{} IS NULL", quote_identifier(column)));
        } else {
            params.push(value.clone());
            conditions.push(format!("{} = ?{}", quote_identifier(column), params.len()));
        }
    }

    Ok((format!(" WHERE {}", conditions.join(" AND ")), params))
}
