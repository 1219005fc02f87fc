//! Key/value + sorted-range persistence used by the pipeline and queries.

use crate::errors::StoreError;
use crate::model::Fields;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

/// A single table or collection.
///
/// Rows written with a sort key form an ordered partition readable through
/// [`Store::query_range`]; a row written without one is the partition's single
/// keyed item, readable through [`Store::get_item`]. Writes are unconditional.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put(
        &self,
        partition_key: &str,
        sort_key: Option<i64>,
        fields: Fields,
    ) -> Result<(), StoreError>;

    async fn get_item(&self, partition_key: &str) -> Result<Option<Fields>, StoreError>;

    /// Rows with `from <= sort_key <= to`, ascending by sort key.
    async fn query_range(
        &self,
        partition_key: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<(i64, Fields)>, StoreError>;
}

#[derive(Default)]
struct Tables {
    ranged: HashMap<String, BTreeMap<i64, Fields>>,
    keyed: HashMap<String, Fields>,
}

/// In-process store, used by tests and by deployments run with `DATABASE_URL=memory`.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    writes: AtomicUsize,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of rows currently held in a partition's sorted range.
    pub fn len(&self, partition_key: &str) -> usize {
        self.read()
            .map(|t| t.ranged.get(partition_key).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Simulate an outage: every call fails with [`StoreError::Unavailable`] while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(
        &self,
        partition_key: &str,
        sort_key: Option<i64>,
        fields: Fields,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;

        match sort_key {
            Some(sort_key) => {
                tables
                    .ranged
                    .entry(partition_key.to_string())
                    .or_default()
                    .insert(sort_key, fields);
            }
            None => {
                tables.keyed.insert(partition_key.to_string(), fields);
            }
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_item(&self, partition_key: &str) -> Result<Option<Fields>, StoreError> {
        self.check_online()?;
        Ok(self.read()?.keyed.get(partition_key).cloned())
    }

    async fn query_range(
        &self,
        partition_key: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<(i64, Fields)>, StoreError> {
        self.check_online()?;
        if from > to {
            return Ok(Vec::new());
        }

        let tables = self.read()?;
        Ok(tables
            .ranged
            .get(partition_key)
            .map(|rows| {
                rows.range(from..=to)
                    .map(|(k, v)| (*k, v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
