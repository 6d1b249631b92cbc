// # Memory Stores
//
// In-memory implementations of Store and PairingTable.
//
// ## Purpose
//
// Fast collections that don't persist across restarts. Useful for testing,
// embedding, and scenarios where one side is rebuilt on every start.
//
// ## Crash Behavior
//
// - All records and pairings are lost on restart/crash
// - A lost pairing table makes every record look unpaired on the next pass,
//   which duplicates counterparts; use the file table in production

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::lifecycle::{Readiness, ReadinessGate};
use crate::traits::pairing_table::{NewPairing, Pairing, PairingTable};
use crate::traits::store::{Record, Store, Timestamp, now_millis};
use crate::Error;

/// In-memory store implementation
///
/// Records live in a `BTreeMap` protected by a `RwLock`, so `list()` returns
/// them in id order. Every clone shares the same collection.
///
/// # Example
///
/// ```rust,no_run
/// use pairsync_core::state::MemoryStore;
/// use pairsync_core::traits::Store;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store: MemoryStore<String> = MemoryStore::new("deals");
///
///     let id = store.create(&"Acme".to_string()).await?;
///     let records = store.list().await?;
///     assert_eq!(records[0].id, id);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore<T> {
    name: String,
    inner: Arc<RwLock<BTreeMap<String, Record<T>>>>,
    gate: ReadinessGate,
}

impl<T> MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new empty store that is ready immediately
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(RwLock::new(BTreeMap::new())),
            gate: ReadinessGate::ready(),
        }
    }

    /// Create a new empty store that stays `Initializing` until
    /// [`mark_ready`](Self::mark_ready) is called
    pub fn initializing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(RwLock::new(BTreeMap::new())),
            gate: ReadinessGate::new(),
        }
    }

    /// Finish initialization
    pub fn mark_ready(&self) {
        self.gate.mark_ready();
    }

    /// Current lifecycle state
    pub fn readiness(&self) -> Readiness {
        self.gate.state()
    }

    /// Insert a record as-is, keeping its id and `updated_at`
    ///
    /// Seeds a collection, or simulates an external edit.
    pub async fn insert(&self, record: Record<T>) {
        self.inner.write().await.insert(record.id.clone(), record);
    }

    /// Remove a record behind the engine's back
    pub async fn remove(&self, id: &str) -> Option<Record<T>> {
        self.inner.write().await.remove(id)
    }

    /// Get a record by id
    pub async fn get(&self, id: &str) -> Option<Record<T>> {
        self.inner.read().await.get(id).cloned()
    }

    /// Get the number of records in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl<T> Store<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn ready(&self) -> Result<(), Error> {
        self.gate.wait().await;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Record<T>>, Error> {
        if !self.gate.is_ready() {
            return Err(Error::not_ready(format!("store '{}'", self.name)));
        }
        Ok(self.inner.read().await.values().cloned().collect())
    }

    async fn create(&self, data: &T) -> Result<String, Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let record = Record::new(id.clone(), now_millis(), data.clone());
        self.inner.write().await.insert(id.clone(), record);
        Ok(id)
    }

    async fn update(&self, id: &str, data: &T) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let record = guard
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("{} in store '{}'", id, self.name)))?;
        record.data = data.clone();
        record.updated_at = now_millis();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), Error> {
        self.inner.write().await.remove(id);
        Ok(())
    }
}

/// In-memory pairing table implementation
///
/// Rows live in a `BTreeMap` keyed by row id. Every clone shares the same
/// rows, so one table can back several integrations.
#[derive(Debug, Clone, Default)]
pub struct MemoryPairingTable {
    inner: Arc<RwLock<BTreeMap<String, Pairing>>>,
}

impl MemoryPairingTable {
    /// Create a new empty pairing table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row as-is
    ///
    /// Bypasses the 1:1 check, so tests can stage a broken table.
    pub async fn insert(&self, pairing: Pairing) {
        self.inner.write().await.insert(pairing.id.clone(), pairing);
    }

    /// Get a row by id
    pub async fn get(&self, id: &str) -> Option<Pairing> {
        self.inner.read().await.get(id).cloned()
    }

    /// Find the row pairing a Primary id within a service
    pub async fn find_by_primary(&self, service_name: &str, id_in_primary: &str) -> Option<Pairing> {
        self.inner
            .read()
            .await
            .values()
            .find(|p| p.service_name == service_name && p.id_in_primary == id_in_primary)
            .cloned()
    }

    /// Get the number of rows across all services
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the table is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Reject a new row that would pair an already-paired id
pub(crate) fn check_unpaired<'a>(
    rows: impl IntoIterator<Item = &'a Pairing>,
    candidate: &NewPairing,
) -> Result<(), Error> {
    for row in rows {
        if row.service_name != candidate.service_name {
            continue;
        }
        if row.id_in_primary == candidate.id_in_primary {
            return Err(Error::invariant(format!(
                "primary id '{}' is already paired by row '{}' in service '{}'",
                candidate.id_in_primary, row.id, row.service_name
            )));
        }
        if row.id_in_secondary == candidate.id_in_secondary {
            return Err(Error::invariant(format!(
                "secondary id '{}' is already paired by row '{}' in service '{}'",
                candidate.id_in_secondary, row.id, row.service_name
            )));
        }
    }
    Ok(())
}

/// Stamp a row's watermark, never moving it backwards
pub(crate) fn stamp(row: &mut Pairing, now: Timestamp) {
    row.updated_at = row.updated_at.max(now);
}

#[async_trait]
impl PairingTable for MemoryPairingTable {
    async fn list(&self, service_name: &str) -> Result<Vec<Pairing>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .values()
            .filter(|p| p.service_name == service_name)
            .cloned()
            .collect())
    }

    async fn create(&self, pairing: NewPairing) -> Result<Pairing, Error> {
        let mut guard = self.inner.write().await;
        check_unpaired(guard.values(), &pairing)?;

        let row = pairing.into_pairing(uuid::Uuid::new_v4().to_string(), now_millis());
        guard.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn touch(&self, id: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let row = guard
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("pairing '{}'", id)))?;
        stamp(row, now_millis());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), Error> {
        self.inner.write().await.remove(id);
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        // No-op for memory table (everything is already "persisted")
        Ok(())
    }
}
