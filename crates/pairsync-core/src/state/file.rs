// # File Stores
//
// File-based implementations of Store and PairingTable with crash recovery.
//
// ## Purpose
//
// Provides persistent collections and pairing rows across daemon restarts
// and crashes. The pairing table in particular must survive: it is the only
// memory the engine has between passes.
//
// ## Crash Recovery
//
// Every mutation is written through immediately (see `json_file`):
// write-then-rename, `.backup` of the last committed state, recovery from
// the backup when the main file fails to parse. A file that exists but
// cannot be recovered fails `open` instead of loading as empty.
//
// ## File Formats
//
// ```json
// {
//   "version": "1.0",
//   "records": {
//     "p1": { "id": "p1", "updated_at": 1736424000000, "data": { "name": "Acme" } }
//   }
// }
// ```
//
// ```json
// {
//   "version": "1.0",
//   "pairings": {
//     "6f1c...": {
//       "id": "6f1c...",
//       "service_name": "hubspot/deals",
//       "id_in_primary": "p1",
//       "id_in_secondary": "s1",
//       "updated_at": 1736424000000
//     }
//   }
// }
// ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::lifecycle::ReadinessGate;
use crate::state::json_file::JsonFile;
use crate::state::memory::{check_unpaired, stamp};
use crate::traits::pairing_table::{NewPairing, Pairing, PairingTable};
use crate::traits::store::{Record, Store, now_millis};
use crate::Error;

/// Content of a collection file
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: Serialize",
    deserialize = "T: DeserializeOwned"
))]
struct RecordsFile<T> {
    records: BTreeMap<String, Record<T>>,
}

impl<T> Default for RecordsFile<T> {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }
}

/// Content of a pairing file
#[derive(Debug, Default, Serialize, Deserialize)]
struct PairingsFile {
    pairings: BTreeMap<String, Pairing>,
}

/// File-based store with crash recovery
///
/// The whole collection is held in memory and written through on every
/// mutation. The store is `Ready` once the initial load completed.
///
/// # Example
///
/// ```rust,no_run
/// use pairsync_core::state::FileStore;
/// use pairsync_core::traits::{Document, Store};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store: FileStore<Document> = FileStore::open("deals", "/var/lib/pairsync/deals.json").await?;
///
///     for record in store.list().await? {
///         println!("{} @ {}", record.id, record.updated_at);
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStore<T> {
    name: String,
    file: JsonFile,
    records: Arc<RwLock<BTreeMap<String, Record<T>>>>,
    gate: ReadinessGate,
}

impl<T> FileStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create or load a file store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Load the existing file, recovering from backup if corrupted
    /// 3. Mark the store `Ready`
    ///
    /// Fails if the file is corrupted and no usable backup exists.
    pub async fn open(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, Error> {
        let name = name.into();
        let gate = ReadinessGate::new();
        let file = JsonFile::prepare(path).await?;

        let content: RecordsFile<T> = file.load_with_recovery().await?;
        tracing::debug!(
            "Loaded store '{}' from {}: {} records",
            name,
            file.path().display(),
            content.records.len()
        );
        gate.mark_ready();

        Ok(Self {
            name,
            file,
            records: Arc::new(RwLock::new(content.records)),
            gate,
        })
    }

    /// Write the current collection to disk
    async fn persist(&self, records: &BTreeMap<String, Record<T>>) -> Result<(), Error> {
        self.file
            .write(&RecordsFile {
                records: records.clone(),
            })
            .await
    }
}

#[async_trait]
impl<T> Store<T> for FileStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn ready(&self) -> Result<(), Error> {
        self.gate.wait().await;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Record<T>>, Error> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn create(&self, data: &T) -> Result<String, Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut guard = self.records.write().await;
        guard.insert(id.clone(), Record::new(id.clone(), now_millis(), data.clone()));

        if let Err(e) = self.persist(&guard).await {
            guard.remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    async fn update(&self, id: &str, data: &T) -> Result<(), Error> {
        let mut guard = self.records.write().await;
        let previous = guard
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{} in store '{}'", id, self.name)))?;

        guard.insert(
            id.to_string(),
            Record::new(id, now_millis().max(previous.updated_at), data.clone()),
        );

        if let Err(e) = self.persist(&guard).await {
            guard.insert(id.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), Error> {
        let mut guard = self.records.write().await;
        let Some(previous) = guard.remove(id) else {
            return Ok(());
        };

        if let Err(e) = self.persist(&guard).await {
            guard.insert(id.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }
}

/// File-based pairing table with crash recovery
///
/// Rows are written through immediately on every mutation, so a crash never
/// loses a pairing for a counterpart that was already created.
#[derive(Debug)]
pub struct FilePairingTable {
    file: JsonFile,
    state: Arc<RwLock<PairingState>>,
}

/// Internal state for the file-based table
#[derive(Debug)]
struct PairingState {
    rows: BTreeMap<String, Pairing>,
    dirty: bool,
}

impl FilePairingTable {
    /// Create or load a file pairing table
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = JsonFile::prepare(path).await?;
        let content: PairingsFile = file.load_with_recovery().await?;
        tracing::debug!(
            "Loaded pairing table from {}: {} rows",
            file.path().display(),
            content.pairings.len()
        );

        Ok(Self {
            file,
            state: Arc::new(RwLock::new(PairingState {
                rows: content.pairings,
                dirty: false,
            })),
        })
    }

    /// Force immediate write to disk
    pub async fn sync(&self) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        self.write_locked(&mut guard).await
    }

    async fn write_locked(&self, state: &mut PairingState) -> Result<(), Error> {
        self.file
            .write(&PairingsFile {
                pairings: state.rows.clone(),
            })
            .await
            .map_err(|e| Error::pairing_table(e.to_string()))?;
        state.dirty = false;
        Ok(())
    }
}

#[async_trait]
impl PairingTable for FilePairingTable {
    async fn list(&self, service_name: &str) -> Result<Vec<Pairing>, Error> {
        let guard = self.state.read().await;
        Ok(guard
            .rows
            .values()
            .filter(|p| p.service_name == service_name)
            .cloned()
            .collect())
    }

    async fn create(&self, pairing: NewPairing) -> Result<Pairing, Error> {
        let mut guard = self.state.write().await;
        check_unpaired(guard.rows.values(), &pairing)?;

        let row = pairing.into_pairing(uuid::Uuid::new_v4().to_string(), now_millis());
        guard.rows.insert(row.id.clone(), row.clone());
        guard.dirty = true;

        // Immediate write for durability
        if let Err(e) = self.write_locked(&mut guard).await {
            guard.rows.remove(&row.id);
            return Err(e);
        }
        Ok(row)
    }

    async fn touch(&self, id: &str) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        let row = guard
            .rows
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("pairing '{}'", id)))?;
        stamp(row, now_millis());
        guard.dirty = true;

        self.write_locked(&mut guard).await
    }

    async fn delete(&self, id: &str) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        if guard.rows.remove(id).is_none() {
            return Ok(());
        }
        guard.dirty = true;

        self.write_locked(&mut guard).await
    }

    async fn flush(&self) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        if guard.dirty {
            self.write_locked(&mut guard).await
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::store::Document;
    use tempfile::tempdir;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deals.json");

        let store: FileStore<Document> = FileStore::open("deals", &path).await.unwrap();
        store.ready().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());

        let id = store
            .create(&doc(serde_json::json!({ "name": "Acme", "amount": 100 })))
            .await
            .unwrap();
        store
            .update(&id, &doc(serde_json::json!({ "name": "Acme", "amount": 250 })))
            .await
            .unwrap();
        assert!(path.exists());

        let reopened: FileStore<Document> = FileStore::open("deals", &path).await.unwrap();
        let records = reopened.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].data["amount"], 250);

        reopened.delete(&id).await.unwrap();
        let again: FileStore<Document> = FileStore::open("deals", &path).await.unwrap();
        assert!(again.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_pairing_table_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pairings.json");

        let table = FilePairingTable::open(&path).await.unwrap();
        let row = table
            .create(NewPairing::new("hubspot/deals", "p1", "s1"))
            .await
            .unwrap();
        table.flush().await.unwrap();

        let reopened = FilePairingTable::open(&path).await.unwrap();
        let rows = reopened.list("hubspot/deals").await.unwrap();
        assert_eq!(rows, vec![row.clone()]);

        let duplicate = reopened
            .create(NewPairing::new("hubspot/deals", "p9", "s1"))
            .await;
        assert!(matches!(duplicate, Err(Error::InvariantViolation(_))));

        reopened.delete(&row.id).await.unwrap();
        let emptied = FilePairingTable::open(&path).await.unwrap();
        assert!(emptied.list("hubspot/deals").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_pairing_table_corruption_recovery() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pairings.json");

        let table = FilePairingTable::open(&path).await.unwrap();
        let first = table
            .create(NewPairing::new("hubspot/deals", "p1", "s1"))
            .await
            .unwrap();
        table
            .create(NewPairing::new("hubspot/deals", "p2", "s2"))
            .await
            .unwrap();

        tokio::fs::write(&path, b"corrupted json data").await.unwrap();

        let recovered = FilePairingTable::open(&path).await.unwrap();
        let mut rows = recovered.list("hubspot/deals").await.unwrap();
        rows.sort_by(|a, b| a.id_in_primary.cmp(&b.id_in_primary));
        assert_eq!(rows.len(), 2, "newest pairing survives recovery");
        assert_eq!(rows[0], first);
        assert_eq!(rows[1].id_in_secondary, "s2");
    }

    #[tokio::test]
    async fn test_corrupt_store_without_backup_refuses_to_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("primary.json");
        tokio::fs::write(&path, b"{ truncated").await.unwrap();

        let opened = FileStore::<Document>::open("primary", &path).await;
        assert!(matches!(opened, Err(Error::Store(_))));

        // The damaged file is left for inspection
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(raw, "{ truncated");
    }

    #[tokio::test]
    async fn test_corrupt_pairing_table_without_backup_refuses_to_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pairings.json");
        tokio::fs::write(&path, b"{ truncated").await.unwrap();

        assert!(FilePairingTable::open(&path).await.is_err());
    }
}
