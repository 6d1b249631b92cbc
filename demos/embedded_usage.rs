//! Minimal embedding example for pairsync-core
//!
//! This example pairs an application-owned address book with an in-memory
//! stand-in for a remote CRM. The application drives each pass itself.

use async_trait::async_trait;
use pairsync_core::traits::now_millis;
use pairsync_core::{
    EngineConfig, MemoryPairingTable, MemoryStore, PairingTable, Record, Reconciler, Result, Store,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Application payload
#[derive(Debug, Clone, PartialEq)]
struct Contact {
    name: String,
    email: String,
}

/// Custom Primary Store owned by the application
struct AddressBook {
    contacts: Mutex<HashMap<String, Record<Contact>>>,
    next_id: AtomicU64,
}

impl AddressBook {
    fn new() -> Self {
        Self {
            contacts: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Edit a contact the way a user of the application would
    async fn rename(&self, id: &str, name: &str) {
        if let Some(record) = self.contacts.lock().await.get_mut(id) {
            record.data.name = name.to_string();
            record.updated_at = now_millis();
        }
    }
}

#[async_trait]
impl Store<Contact> for AddressBook {
    fn name(&self) -> &str {
        "address-book"
    }

    async fn list(&self) -> Result<Vec<Record<Contact>>> {
        Ok(self.contacts.lock().await.values().cloned().collect())
    }

    async fn create(&self, data: &Contact) -> Result<String> {
        let id = format!("ab-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        println!("[AddressBook] Creating {} ({})", id, data.name);
        self.contacts
            .lock()
            .await
            .insert(id.clone(), Record::new(id.clone(), now_millis(), data.clone()));
        Ok(id)
    }

    async fn update(&self, id: &str, data: &Contact) -> Result<()> {
        println!("[AddressBook] Updating {} -> {}", id, data.name);
        if let Some(record) = self.contacts.lock().await.get_mut(id) {
            record.data = data.clone();
            record.updated_at = now_millis();
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        println!("[AddressBook] Deleting {}", id);
        self.contacts.lock().await.remove(id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Embedded pairsync-core Example ===\n");

    let book = Arc::new(AddressBook::new());
    let crm = Arc::new(MemoryStore::<Contact>::new("crm"));
    let pairings = Arc::new(MemoryPairingTable::new());

    crm.insert(Record::new(
        "crm-1",
        now_millis(),
        Contact {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
        },
    ))
    .await;
    book.create(&Contact {
        name: "Alan Turing".to_string(),
        email: "alan@example.com".to_string(),
    })
    .await?;

    println!("1. Creating engine...");
    let settings = EngineConfig {
        max_retries: 0,
        event_channel_capacity: 100,
        ..EngineConfig::default()
    };
    let (engine, mut event_rx) = Reconciler::new(
        "crm/contacts",
        book.clone() as Arc<dyn Store<Contact>>,
        crm.clone() as Arc<dyn Store<Contact>>,
        pairings.clone() as Arc<dyn PairingTable>,
        settings,
    )?;

    let event_listener = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("[Event] {:?}", event);
        }
    });

    println!("\n2. First pass: each side gets the other's records");
    let report = engine.reconcile().await?;
    println!(
        "   created in primary: {}, created in secondary: {}",
        report.created_in_primary, report.created_in_secondary
    );

    println!("\n3. Second pass: nothing to do");
    let report = engine.reconcile().await?;
    println!("   mutations: {}", report.record_mutations());

    println!("\n4. Renaming a contact locally, then passing again");
    // Make sure the edit lands on a later millisecond than the pairing watermark
    tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
    book.rename("ab-1", "Alan M. Turing").await;
    let report = engine.reconcile().await?;
    println!("   updated in secondary: {}", report.updated_in_secondary);

    println!("\n5. Deleting the CRM copy of Ada, then passing again");
    let ada = pairings
        .list("crm/contacts")
        .await?
        .into_iter()
        .find(|p| p.id_in_secondary == "crm-1");
    crm.remove("crm-1").await;
    let report = engine.reconcile().await?;
    println!(
        "   deleted from primary: {} (pairing {} removed)",
        report.deleted_from_primary,
        ada.map(|p| p.id).unwrap_or_default()
    );

    drop(engine);
    let _ = event_listener.await;

    println!("\nFinal CRM contents:");
    for record in crm.list().await? {
        println!("   {} -> {:?}", record.id, record.data);
    }

    println!("\n=== Embedding Successful ===");
    println!("Key Points:");
    println!("- The payload type is the application's own struct");
    println!("- The application decides when passes run");
    println!("- No global state");

    Ok(())
}
