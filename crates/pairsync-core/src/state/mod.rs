// # Built-in Stores
//
// This module provides implementations of the Store and PairingTable traits
// for different persistence strategies, plus the factories the registry uses
// to build them from configuration.

pub mod file;
mod json_file;
pub mod memory;

pub use file::{FilePairingTable, FileStore};
pub use memory::{MemoryPairingTable, MemoryStore};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{PairingTableConfig, StoreConfig};
use crate::traits::{Document, PairingTable, PairingTableFactory, Store, StoreFactory};
use crate::{Error, Result};

/// Factory for in-memory document stores
pub struct MemoryStoreFactory;

#[async_trait]
impl StoreFactory for MemoryStoreFactory {
    async fn create(&self, name: &str, config: &StoreConfig) -> Result<Arc<dyn Store<Document>>> {
        match config {
            StoreConfig::Memory => Ok(Arc::new(MemoryStore::<Document>::new(name))),
            _ => Err(Error::config("Invalid config for memory store")),
        }
    }
}

/// Factory for JSON-file document stores
pub struct FileStoreFactory;

#[async_trait]
impl StoreFactory for FileStoreFactory {
    async fn create(&self, name: &str, config: &StoreConfig) -> Result<Arc<dyn Store<Document>>> {
        match config {
            StoreConfig::File { path } => {
                Ok(Arc::new(FileStore::<Document>::open(name, path).await?))
            }
            _ => Err(Error::config("Invalid config for file store")),
        }
    }
}

/// Factory for in-memory pairing tables
pub struct MemoryPairingTableFactory;

#[async_trait]
impl PairingTableFactory for MemoryPairingTableFactory {
    async fn create(&self, config: &PairingTableConfig) -> Result<Arc<dyn PairingTable>> {
        match config {
            PairingTableConfig::Memory => Ok(Arc::new(MemoryPairingTable::new())),
            _ => Err(Error::config("Invalid config for memory pairing table")),
        }
    }
}

/// Factory for file-based pairing tables
pub struct FilePairingTableFactory;

#[async_trait]
impl PairingTableFactory for FilePairingTableFactory {
    async fn create(&self, config: &PairingTableConfig) -> Result<Arc<dyn PairingTable>> {
        match config {
            PairingTableConfig::File { path } => Ok(Arc::new(FilePairingTable::open(path).await?)),
            _ => Err(Error::config("Invalid config for file pairing table")),
        }
    }
}
