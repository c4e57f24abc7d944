//! In-process store used by tests and offline runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use prdforge_core::Table;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::storage::ObjectStorage;
use crate::{DataStore, Query, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Select,
    Insert,
    Update,
    Delete,
    Upload,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<Table, Vec<Value>>,
    objects: HashMap<String, (Vec<u8>, String)>,
    /// (table, op) -> number of calls still allowed to succeed before one failure
    failures: HashMap<(Option<Table>, Op), usize>,
    calls: Vec<(Option<Table>, Op)>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `op` on `table` fail once.
    pub fn fail_next(&self, table: Table, op: Op) {
        self.fail_after(table, op, 0);
    }

    /// Let `successes` calls of `op` on `table` through, then fail one.
    pub fn fail_after(&self, table: Table, op: Op, successes: usize) {
        self.lock().failures.insert((Some(table), op), successes);
    }

    /// Make the next object upload fail once.
    pub fn fail_next_upload(&self) {
        self.lock().failures.insert((None, Op::Upload), 0);
    }

    pub fn seed(&self, table: Table, rows: Vec<Value>) {
        self.lock().tables.entry(table).or_default().extend(rows);
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    pub fn count(&self, table: Table) -> usize {
        self.lock().tables.get(&table).map_or(0, Vec::len)
    }

    /// Number of calls of `op` made against `table` so far.
    pub fn calls(&self, table: Table, op: Op) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| **c == (Some(table), op))
            .count()
    }

    pub fn object(&self, path: &str) -> Option<(Vec<u8>, String)> {
        self.lock().objects.get(path).cloned()
    }
}

impl Inner {
    fn check(&mut self, table: Option<Table>, op: Op) -> Result<(), StoreError> {
        self.calls.push((table, op));
        let key = (table, op);
        match self.failures.get_mut(&key) {
            Some(0) => {
                self.failures.remove(&key);
                let target = table.map_or("storage".to_string(), |t| t.to_string());
                Err(StoreError::Network(format!("injected {op:?} failure on {target}")))
            }
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        let mut inner = self.lock();
        inner.check(Some(table), Op::Select)?;
        let mut rows: Vec<Value> = inner
            .tables
            .get(&table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();
        query.apply_order(&mut rows);
        Ok(rows)
    }

    async fn insert(&self, table: Table, rows: Vec<Value>) -> Result<Vec<Value>, StoreError> {
        let mut inner = self.lock();
        inner.check(Some(table), Op::Insert)?;
        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let Value::Object(mut map) = row else {
                return Err(StoreError::Http {
                    status: 400,
                    body: format!("{table}: row must be an object"),
                });
            };
            let has_id = map
                .get("id")
                .and_then(Value::as_str)
                .is_some_and(|id| !id.is_empty());
            if !has_id {
                map.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
            }
            stored.push(Value::Object(map));
        }
        inner
            .tables
            .entry(table)
            .or_default()
            .extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn update(
        &self,
        table: Table,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoreError> {
        let mut inner = self.lock();
        inner.check(Some(table), Op::Update)?;
        let patch: Map<String, Value> = match patch {
            Value::Object(map) => map,
            _ => {
                return Err(StoreError::Http {
                    status: 400,
                    body: format!("{table}: patch must be an object"),
                })
            }
        };
        let mut updated = Vec::new();
        if let Some(rows) = inner.tables.get_mut(&table) {
            for row in rows.iter_mut().filter(|r| query.matches(r)) {
                if let Value::Object(map) = row {
                    for (k, v) in &patch {
                        map.insert(k.clone(), v.clone());
                    }
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: Table, query: &Query) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        inner.check(Some(table), Op::Delete)?;
        let Some(rows) = inner.tables.get_mut(&table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !query.matches(r));
        Ok(before - rows.len())
    }
}

#[async_trait]
impl ObjectStorage for MemoryStore {
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check(None, Op::Upload)?;
        inner
            .objects
            .insert(format!("{bucket}/{path}"), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u64,
    ) -> Result<String, StoreError> {
        let key = format!("{bucket}/{path}");
        if !self.lock().objects.contains_key(&key) {
            return Err(StoreError::NotFound(key));
        }
        Ok(format!("memory://{key}?expires_in={expires_in_secs}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn injected_failure_fires_once_after_successes() {
        let store = MemoryStore::new();
        store.fail_after(Table::Tasks, Op::Insert, 1);
        assert!(store.insert(Table::Tasks, vec![json!({"title": "a"})]).await.is_ok());
        assert!(store.insert(Table::Tasks, vec![json!({"title": "b"})]).await.is_err());
        assert!(store.insert(Table::Tasks, vec![json!({"title": "c"})]).await.is_ok());
        assert_eq!(store.count(Table::Tasks), 2);
        assert_eq!(store.calls(Table::Tasks, Op::Insert), 3);
    }

    #[tokio::test]
    async fn insert_keeps_given_id() {
        let store = MemoryStore::new();
        let rows = store
            .insert(Table::Bugs, vec![json!({"id": "b1"}), json!({"title": "x"})])
            .await
            .unwrap();
        assert_eq!(rows[0]["id"], "b1");
        assert!(rows[1]["id"].as_str().is_some_and(|s| !s.is_empty()));
    }

    #[tokio::test]
    async fn update_merges_patch() {
        let store = MemoryStore::new();
        store.seed(Table::Tasks, vec![json!({"id": "t1", "title": "a", "status": "todo"})]);
        let rows = store
            .update(Table::Tasks, &Query::new().eq("id", "t1"), json!({"status": "done"}))
            .await
            .unwrap();
        assert_eq!(rows[0]["status"], "done");
        assert_eq!(rows[0]["title"], "a");
    }
}
