// # Store Trait
//
// Defines the interface both sides of a reconciliation are accessed through.
//
// The same trait is used for the Primary Store (the local system of record)
// and for the Secondary Service (the remote side). Adapters are responsible
// for converting between their native shape and the shared payload type `T`.
//
// ## Implementations
//
// - In-memory: `state::MemoryStore`
// - JSON file: `state::FileStore`
// - HTTP JSON collection: `pairsync-service-http` crate
//
// ## Usage
//
// ```rust,ignore
// use pairsync_core::Store;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let store = /* Store implementation */;
//
//     store.ready().await?;
//     for record in store.list().await? {
//         println!("{} @ {}", record.id, record.updated_at);
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opaque JSON payload used by configuration-driven stores
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// A record as seen by the engine
///
/// Only `id` and `updated_at` carry meaning for reconciliation. `data` is
/// passed through create/update calls untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    /// Identifier, opaque and unique within its store
    pub id: String,
    /// Last modification time in the store that owns the record
    pub updated_at: Timestamp,
    /// Domain payload
    pub data: T,
}

impl<T> Record<T> {
    /// Create a record
    pub fn new(id: impl Into<String>, updated_at: Timestamp, data: T) -> Self {
        Self {
            id: id.into(),
            updated_at,
            data,
        }
    }
}

/// Trait for store implementations
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Trust Level: Untrusted
///
/// Stores are single-shot I/O components:
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O against their own backing collection
/// - ✅ Convert between the native shape and `T`
/// - ✅ Return success or failure (engine handles retry)
///
/// ## Forbidden Capabilities
/// - ❌ Retry or back off (owned by `Reconciler`)
/// - ❌ Touch the pairing table (owned by `Reconciler`)
/// - ❌ Decide which side wins a conflict (owned by `Reconciler`)
/// - ❌ Spawn tasks without a clear lifecycle
#[async_trait]
pub trait Store<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Name of the store (for logging/debugging)
    fn name(&self) -> &str;

    /// Wait until the store's contents are authoritative
    ///
    /// Stores without an asynchronous first load can rely on the default.
    async fn ready(&self) -> Result<(), crate::Error> {
        Ok(())
    }

    /// List every record in the collection
    ///
    /// The engine performs a full scan on every pass; this must return the
    /// complete collection, not a delta.
    async fn list(&self) -> Result<Vec<crate::Record<T>>, crate::Error>;

    /// Create a record from a payload
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: The id assigned by the store
    /// - `Err(Error)`: If creation failed
    async fn create(&self, data: &T) -> Result<String, crate::Error>;

    /// Replace the payload of an existing record
    ///
    /// Stores stamp a new `updated_at` on success.
    async fn update(&self, id: &str, data: &T) -> Result<(), crate::Error>;

    /// Delete a record
    ///
    /// Deleting a record that does not exist is not an error.
    async fn delete(&self, id: &str) -> Result<(), crate::Error>;
}

/// Helper trait for constructing JSON document stores from configuration
#[async_trait]
pub trait StoreFactory: Send + Sync {
    /// Create a Store instance from configuration
    ///
    /// # Parameters
    ///
    /// - `name`: Collection name the store is registered under
    /// - `config`: Configuration specific to this store
    async fn create(
        &self,
        name: &str,
        config: &crate::config::StoreConfig,
    ) -> Result<std::sync::Arc<dyn Store<Document>>, crate::Error>;
}
