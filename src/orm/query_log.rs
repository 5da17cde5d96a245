//! Shared log of executed statements

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// One executed statement
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedQuery {
    pub sql: String,
    pub params: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Append-only statement log. Clones share the same entries, so one sink
/// can be handed to several connections or harnesses.
#[derive(Debug, Clone, Default)]
pub struct QueryLog {
    entries: Arc<Mutex<Vec<LoggedQuery>>>,
}

impl QueryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LoggedQuery>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, query: LoggedQuery) {
        self.lock().push(query);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of every entry, oldest first
    pub fn queries(&self) -> Vec<LoggedQuery> {
        self.lock().clone()
    }

    /// Entries recorded at or after `index`
    pub fn since(&self, index: usize) -> Vec<LoggedQuery> {
        self.lock().iter().skip(index).cloned().collect()
    }

    pub fn last(&self) -> Option<LoggedQuery> {
        self.lock().last().cloned()
    }

    /// Whether two handles write to the same sink
    pub fn shares_with(&self, other: &QueryLog) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}
