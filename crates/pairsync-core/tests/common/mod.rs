//! Test doubles and common utilities for contract tests
//!
//! This module provides store and pairing-table wrappers that count calls
//! and inject failures on top of the built-in memory implementations.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pairsync_core::config::EngineConfig;
use pairsync_core::engine::{EngineEvent, Reconciler};
use pairsync_core::error::{Error, Result};
use pairsync_core::state::{MemoryPairingTable, MemoryStore};
use pairsync_core::traits::{Document, NewPairing, Pairing, PairingTable, Record, Store};
use tokio::sync::mpsc;

pub const SERVICE: &str = "hubspot/deals";

/// Build a JSON document payload
pub fn doc(value: serde_json::Value) -> Document {
    value
        .as_object()
        .cloned()
        .expect("test documents are JSON objects")
}

/// Engine settings that keep retries fast
pub fn fast_settings() -> EngineConfig {
    EngineConfig {
        max_retries: 2,
        retry_delay_ms: 1,
        operation_timeout_secs: 5,
        ready_timeout_secs: 1,
        poll_interval_secs: 1,
        ..EngineConfig::default()
    }
}

/// Per-operation call counters
#[derive(Debug, Default)]
pub struct Calls {
    pub list: AtomicUsize,
    pub create: AtomicUsize,
    pub update: AtomicUsize,
    pub delete: AtomicUsize,
}

impl Calls {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Injected store failures
#[derive(Debug, Default)]
struct StoreFaults {
    /// Creates whose payload "name" matches fail
    create_named: HashSet<String>,
    /// Deletes of these ids fail
    delete_ids: HashSet<String>,
    /// Updates of these ids fail
    update_ids: HashSet<String>,
    /// The next N list calls fail with a transient error
    transient_lists: usize,
    /// Every list call fails with a non-transient error
    list_broken: bool,
}

/// A memory store that counts calls and fails on demand
///
/// Clones share the underlying collection, counters and faults, so a test
/// can hand one clone to the engine and inspect another.
#[derive(Clone)]
pub struct TestStore {
    inner: MemoryStore<Document>,
    calls: Arc<Calls>,
    faults: Arc<Mutex<StoreFaults>>,
}

impl TestStore {
    pub fn new(name: &str) -> Self {
        Self::wrap(MemoryStore::new(name))
    }

    /// A store that stays Initializing until `inner().mark_ready()`
    pub fn initializing(name: &str) -> Self {
        Self::wrap(MemoryStore::initializing(name))
    }

    fn wrap(inner: MemoryStore<Document>) -> Self {
        Self {
            inner,
            calls: Arc::new(Calls::default()),
            faults: Arc::new(Mutex::new(StoreFaults::default())),
        }
    }

    pub fn inner(&self) -> &MemoryStore<Document> {
        &self.inner
    }

    pub fn as_store(&self) -> Arc<dyn Store<Document>> {
        Arc::new(self.clone())
    }

    /// Insert a record as if it was edited outside the engine
    pub async fn seed(&self, id: &str, updated_at: i64, data: serde_json::Value) {
        self.inner.insert(Record::new(id, updated_at, doc(data))).await;
    }

    pub async fn get(&self, id: &str) -> Option<Record<Document>> {
        self.inner.get(id).await
    }

    pub async fn records(&self) -> Vec<Record<Document>> {
        self.inner.list().await.expect("memory store is ready")
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }

    pub fn creates(&self) -> usize {
        Calls::get(&self.calls.create)
    }

    pub fn updates(&self) -> usize {
        Calls::get(&self.calls.update)
    }

    pub fn deletes(&self) -> usize {
        Calls::get(&self.calls.delete)
    }

    pub fn lists(&self) -> usize {
        Calls::get(&self.calls.list)
    }

    /// Creates, updates and deletes issued so far
    pub fn mutations(&self) -> usize {
        self.creates() + self.updates() + self.deletes()
    }

    pub fn fail_create_named(&self, name: &str) {
        self.faults.lock().unwrap().create_named.insert(name.to_string());
    }

    pub fn fail_delete(&self, id: &str) {
        self.faults.lock().unwrap().delete_ids.insert(id.to_string());
    }

    pub fn fail_update(&self, id: &str) {
        self.faults.lock().unwrap().update_ids.insert(id.to_string());
    }

    pub fn fail_lists_transiently(&self, times: usize) {
        self.faults.lock().unwrap().transient_lists = times;
    }

    pub fn break_list(&self) {
        self.faults.lock().unwrap().list_broken = true;
    }

    pub fn heal(&self) {
        *self.faults.lock().unwrap() = StoreFaults::default();
    }
}

#[async_trait]
impl Store<Document> for TestStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn ready(&self) -> Result<()> {
        self.inner.ready().await
    }

    async fn list(&self) -> Result<Vec<Record<Document>>> {
        Calls::bump(&self.calls.list);
        {
            let mut faults = self.faults.lock().unwrap();
            if faults.list_broken {
                return Err(Error::service("test", "list is broken"));
            }
            if faults.transient_lists > 0 {
                faults.transient_lists -= 1;
                return Err(Error::unavailable("503 from test store"));
            }
        }
        self.inner.list().await
    }

    async fn create(&self, data: &Document) -> Result<String> {
        Calls::bump(&self.calls.create);
        let name = data.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        if self.faults.lock().unwrap().create_named.contains(name) {
            return Err(Error::service("test", format!("create of '{}' rejected", name)));
        }
        self.inner.create(data).await
    }

    async fn update(&self, id: &str, data: &Document) -> Result<()> {
        Calls::bump(&self.calls.update);
        if self.faults.lock().unwrap().update_ids.contains(id) {
            return Err(Error::service("test", format!("update of '{}' rejected", id)));
        }
        self.inner.update(id, data).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        Calls::bump(&self.calls.delete);
        if self.faults.lock().unwrap().delete_ids.contains(id) {
            return Err(Error::service("test", format!("delete of '{}' rejected", id)));
        }
        self.inner.delete(id).await
    }
}

/// A memory pairing table that counts calls and fails on demand
#[derive(Clone, Default)]
pub struct TestPairingTable {
    inner: MemoryPairingTable,
    creates: Arc<AtomicUsize>,
    touches: Arc<AtomicUsize>,
    deletes: Arc<AtomicUsize>,
    flushes: Arc<AtomicUsize>,
    fail_creates: Arc<Mutex<bool>>,
}

impl TestPairingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryPairingTable {
        &self.inner
    }

    pub fn as_table(&self) -> Arc<dyn PairingTable> {
        Arc::new(self.clone())
    }

    /// Insert a row with a chosen id and watermark
    pub async fn seed(&self, id: &str, id_in_primary: &str, id_in_secondary: &str, updated_at: i64) {
        self.inner
            .insert(Pairing {
                id: id.to_string(),
                service_name: SERVICE.to_string(),
                id_in_primary: id_in_primary.to_string(),
                id_in_secondary: id_in_secondary.to_string(),
                updated_at,
            })
            .await;
    }

    pub async fn rows(&self) -> Vec<Pairing> {
        self.inner.list(SERVICE).await.expect("memory table lists")
    }

    pub async fn row_for_primary(&self, id_in_primary: &str) -> Option<Pairing> {
        self.inner.find_by_primary(SERVICE, id_in_primary).await
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn touches(&self) -> usize {
        self.touches.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Creates and deletes issued so far
    pub fn mutations(&self) -> usize {
        self.creates() + self.deletes()
    }

    pub fn fail_creates(&self, fail: bool) {
        *self.fail_creates.lock().unwrap() = fail;
    }
}

#[async_trait]
impl PairingTable for TestPairingTable {
    async fn list(&self, service_name: &str) -> Result<Vec<Pairing>> {
        self.inner.list(service_name).await
    }

    async fn create(&self, pairing: NewPairing) -> Result<Pairing> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if *self.fail_creates.lock().unwrap() {
            return Err(Error::pairing_table("disk full"));
        }
        self.inner.create(pairing).await
    }

    async fn touch(&self, id: &str) -> Result<()> {
        self.touches.fetch_add(1, Ordering::SeqCst);
        self.inner.touch(id).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(id).await
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.inner.flush().await
    }
}

/// The three participants of one integration
pub struct Fixture {
    pub primary: TestStore,
    pub secondary: TestStore,
    pub pairings: TestPairingTable,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            primary: TestStore::new("primary"),
            secondary: TestStore::new("secondary"),
            pairings: TestPairingTable::new(),
        }
    }

    /// Build an engine over this fixture
    pub fn engine(&self) -> (Reconciler<Document>, mpsc::Receiver<EngineEvent>) {
        self.engine_with(fast_settings())
    }

    pub fn engine_with(&self, settings: EngineConfig) -> (Reconciler<Document>, mpsc::Receiver<EngineEvent>) {
        Reconciler::new(
            SERVICE,
            self.primary.as_store(),
            self.secondary.as_store(),
            self.pairings.as_table(),
            settings,
        )
        .expect("engine construction succeeds")
    }

    /// Every create/update/delete issued against any participant
    pub fn mutations(&self) -> usize {
        self.primary.mutations() + self.secondary.mutations() + self.pairings.mutations()
    }
}

/// Drain every event currently buffered
pub fn drain(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
