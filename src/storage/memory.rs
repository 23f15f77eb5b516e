use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{validate_table, CardStore};
use crate::error::StorageError;
use crate::model::{CanonicalCard, CardId};

#[derive(Debug, Clone)]
struct StoredRow {
    row: Map<String, Value>,
    last_updated: DateTime<Utc>,
}

type Table = BTreeMap<CardId, StoredRow>;

/// In-process store for `--dry-run` passes and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<R>(&self, table: &str, f: impl FnOnce(&mut Table) -> R) -> Result<R, StorageError> {
        validate_table(table)?;
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| StorageError::Transport("memory store lock poisoned".into()))?;
        Ok(f(tables.entry(table.to_string()).or_default()))
    }

    pub fn len(&self, table: &str) -> usize {
        self.with_table(table, |t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Snapshot of every row in id order.
    pub fn rows(&self, table: &str) -> Vec<Map<String, Value>> {
        self.with_table(table, |t| t.values().map(|s| s.row.clone()).collect())
            .unwrap_or_default()
    }

    /// Seed a row directly, bypassing normalization (tests, fixtures).
    pub fn insert_raw(&self, table: &str, id: CardId, row: Map<String, Value>, last_updated: DateTime<Utc>) {
        let _ = self.with_table(table, |t| t.insert(id, StoredRow { row, last_updated }));
    }
}

#[async_trait]
impl CardStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, table: &str, card: &CanonicalCard) -> Result<DateTime<Utc>, StorageError> {
        let now = Utc::now();
        let row = card.to_row(now)?;
        self.with_table(table, |t| {
            t.insert(card.id.clone(), StoredRow { row, last_updated: now });
        })?;
        Ok(now)
    }

    async fn sweep_stale(&self, table: &str, before: DateTime<Utc>) -> Result<u64, StorageError> {
        self.with_table(table, |t| {
            let start = t.len();
            t.retain(|_, r| r.last_updated >= before);
            (start - t.len()) as u64
        })
    }

    async fn get_by_id(&self, table: &str, id: &CardId) -> Result<Option<Value>, StorageError> {
        self.with_table(table, |t| t.get(id).map(|r| Value::Object(r.row.clone())))
    }

    async fn search_by_name(
        &self,
        table: &str,
        fragment: &str,
        limit: usize,
    ) -> Result<Vec<Value>, StorageError> {
        let needle = fragment.to_lowercase();
        self.with_table(table, |t| {
            let mut hits: Vec<&StoredRow> = t
                .values()
                .filter(|r| {
                    r.row
                        .get("name")
                        .and_then(Value::as_str)
                        .is_some_and(|n| n.to_lowercase().contains(&needle))
                })
                .collect();
            hits.sort_by(|a, b| {
                let name = |r: &StoredRow| r.row.get("name").and_then(Value::as_str).map(str::to_string);
                name(a).cmp(&name(b))
            });
            hits.into_iter()
                .take(limit)
                .map(|r| Value::Object(r.row.clone()))
                .collect()
        })
    }

    async fn get_many(&self, table: &str, ids: &[CardId]) -> Result<Vec<Value>, StorageError> {
        self.with_table(table, |t| {
            ids.iter()
                .filter_map(|id| t.get(id))
                .map(|r| Value::Object(r.row.clone()))
                .collect()
        })
    }
}
