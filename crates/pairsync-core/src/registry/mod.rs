//! Plugin-based store registry
//!
//! The registry allows store and pairing-table backends to be registered
//! dynamically at runtime, avoiding hardcoded if-else chains, and owns the
//! instances built from them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pairsync_core::registry::StoreRegistry;
//!
//! // Create a registry with the memory and file backends
//! let registry = StoreRegistry::with_builtins();
//!
//! // Register plugins
//! pairsync_service_http::register(&registry);
//!
//! // Wire an engine from config
//! let (engine, events) = registry.build_reconciler(&config).await?;
//! ```
//!
//! ## Instances
//!
//! Stores are memoized by collection name and pairing tables by
//! [`PairingTableConfig::instance_key`], so several integrations configured
//! against the same pairing file share one table and one set of
//! [`ServiceLocks`]. A registry belongs to its composition root; tests build
//! a fresh one each.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, mpsc};

use crate::config::{PairingTableConfig, StoreConfig, SyncConfig};
use crate::engine::{EngineEvent, Reconciler, ServiceLocks};
use crate::error::{Error, Result};
use crate::state::{
    FilePairingTableFactory, FileStoreFactory, MemoryPairingTableFactory, MemoryStoreFactory,
};
use crate::traits::{Document, PairingTable, PairingTableFactory, Store, StoreFactory};

/// A memoized store and the configuration it was built from
struct StoreSlot {
    config: StoreConfig,
    store: Arc<dyn Store<Document>>,
}

/// Store registry for plugin-based backend creation
///
/// The registry maintains maps of backend type names to factory objects,
/// allowing dynamic instantiation of stores based on configuration.
///
/// ## Thread Safety
///
/// Factories sit behind a `RwLock`, allowing concurrent reads and exclusive
/// writes. Instances sit behind async mutexes so two concurrent requests for
/// the same collection build it once.
#[derive(Default)]
pub struct StoreRegistry {
    /// Registered store factories
    store_factories: RwLock<HashMap<String, Arc<dyn StoreFactory>>>,

    /// Registered pairing table factories
    pairing_factories: RwLock<HashMap<String, Arc<dyn PairingTableFactory>>>,

    /// Stores built so far, by collection name
    stores: Mutex<HashMap<String, StoreSlot>>,

    /// Pairing tables built so far, by instance key
    pairing_tables: Mutex<HashMap<String, Arc<dyn PairingTable>>>,

    /// Pass locks shared by every engine built here
    locks: Arc<ServiceLocks>,
}

impl StoreRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the `memory` and `file` backends registered
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_store("memory", Arc::new(MemoryStoreFactory));
        registry.register_store("file", Arc::new(FileStoreFactory));
        registry.register_pairing_table("memory", Arc::new(MemoryPairingTableFactory));
        registry.register_pairing_table("file", Arc::new(FilePairingTableFactory));
        registry
    }

    /// Register a store factory
    ///
    /// # Parameters
    ///
    /// - `name`: Store type name (e.g., "memory", "http")
    /// - `factory`: Factory object for creating store instances
    ///
    /// Registering the same name twice replaces the earlier factory.
    pub fn register_store(&self, name: impl Into<String>, factory: Arc<dyn StoreFactory>) {
        let name = name.into();
        tracing::debug!("Registering store type '{}'", name);
        self.store_factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, factory);
    }

    /// Register a pairing table factory
    ///
    /// # Parameters
    ///
    /// - `name`: Pairing table type name (e.g., "memory", "file")
    /// - `factory`: Factory object for creating pairing table instances
    pub fn register_pairing_table(
        &self,
        name: impl Into<String>,
        factory: Arc<dyn PairingTableFactory>,
    ) {
        let name = name.into();
        tracing::debug!("Registering pairing table type '{}'", name);
        self.pairing_factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, factory);
    }

    /// Get or create the store for a collection
    ///
    /// # Parameters
    ///
    /// - `name`: Collection name; the memoization key
    /// - `config`: Backend configuration; later requests must repeat it
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn Store>)`: The collection's store
    /// - `Err(Error::Config)`: Unknown store type, or the collection was
    ///   already built from a different configuration
    pub async fn store(&self, name: &str, config: &StoreConfig) -> Result<Arc<dyn Store<Document>>> {
        let mut stores = self.stores.lock().await;

        if let Some(slot) = stores.get(name) {
            if slot.config != *config {
                return Err(Error::config(format!(
                    "Collection '{}' is already bound to a different '{}' store, cannot rebind it to this '{}' configuration",
                    name,
                    slot.config.type_name(),
                    config.type_name()
                )));
            }
            return Ok(Arc::clone(&slot.store));
        }

        config.validate()?;
        let factory = self.store_factory(config.type_name())?;
        let store = factory.create(name, config).await?;
        tracing::debug!("Created '{}' store for collection '{}'", config.type_name(), name);

        stores.insert(
            name.to_string(),
            StoreSlot {
                config: config.clone(),
                store: Arc::clone(&store),
            },
        );
        Ok(store)
    }

    /// Get or create a pairing table
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn PairingTable>)`: The table for this configuration's
    ///   instance key
    /// - `Err(Error::Config)`: If the table type is not registered
    pub async fn pairing_table(&self, config: &PairingTableConfig) -> Result<Arc<dyn PairingTable>> {
        let key = config.instance_key();
        let mut tables = self.pairing_tables.lock().await;

        if let Some(table) = tables.get(&key) {
            return Ok(Arc::clone(table));
        }

        config.validate()?;
        let factory = self.pairing_factory(config.type_name())?;
        let table = factory.create(config).await?;
        tracing::debug!("Created pairing table '{}'", key);

        tables.insert(key, Arc::clone(&table));
        Ok(table)
    }

    /// Build a reconciler from configuration
    ///
    /// Both collections and the pairing table come from (or are added to)
    /// this registry's instances, and the engine shares the registry's
    /// [`ServiceLocks`].
    pub async fn build_reconciler(
        &self,
        config: &SyncConfig,
    ) -> Result<(Reconciler<Document>, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let primary = self.store(&config.primary.name, &config.primary.store).await?;
        let secondary = self
            .store(&config.secondary.name, &config.secondary.store)
            .await?;
        let pairings = self.pairing_table(&config.pairing_table).await?;

        let (engine, events) = Reconciler::new(
            config.service_name.clone(),
            primary,
            secondary,
            pairings,
            config.engine.clone(),
        )?;

        Ok((engine.with_locks(Arc::clone(&self.locks)), events))
    }

    /// Pass locks shared by every engine built by this registry
    pub fn locks(&self) -> Arc<ServiceLocks> {
        Arc::clone(&self.locks)
    }

    fn store_factory(&self, type_name: &str) -> Result<Arc<dyn StoreFactory>> {
        self.store_factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown store type: {}", type_name)))
    }

    fn pairing_factory(&self, type_name: &str) -> Result<Arc<dyn PairingTableFactory>> {
        self.pairing_factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown pairing table type: {}", type_name)))
    }

    /// List all registered store types
    pub fn list_stores(&self) -> Vec<String> {
        let factories = self.store_factories.read().unwrap_or_else(PoisonError::into_inner);
        factories.keys().cloned().collect()
    }

    /// List all registered pairing table types
    pub fn list_pairing_tables(&self) -> Vec<String> {
        let factories = self
            .pairing_factories
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        factories.keys().cloned().collect()
    }

    /// Check if a store type is registered
    pub fn has_store(&self, name: &str) -> bool {
        self.store_factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Check if a pairing table type is registered
    pub fn has_pairing_table(&self, name: &str) -> bool {
        self.pairing_factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}
