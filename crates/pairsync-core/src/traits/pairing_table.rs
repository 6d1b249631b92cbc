// # Pairing Table Trait
//
// Defines the interface for the persistent join table linking Primary ids to
// Secondary ids.
//
// ## Purpose
//
// The pairing table is the only state that survives between passes. Each row
// records:
// - Which Primary record and which Secondary record belong together
// - Which integration ("service name") the row belongs to
// - When the engine last reconciled the pair (the watermark)
//
// Several integrations can share one table; every query is scoped by
// service name.
//
// ## Implementations
//
// - In-memory: `state::MemoryPairingTable`
// - JSON file: `state::FilePairingTable`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::traits::store::Timestamp;

/// A pairing row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    /// Row identifier assigned by the table
    pub id: String,
    /// Integration this row belongs to
    pub service_name: String,
    /// Record id in the Primary Store
    pub id_in_primary: String,
    /// Record id in the Secondary Service
    pub id_in_secondary: String,
    /// Last time the engine created or reconciled this pair
    pub updated_at: Timestamp,
}

impl Pairing {
    /// Whether this row links exactly these two ids
    pub fn links(&self, id_in_primary: &str, id_in_secondary: &str) -> bool {
        self.id_in_primary == id_in_primary && self.id_in_secondary == id_in_secondary
    }

    /// Whether neither side changed after the last reconciliation
    pub fn covers(&self, primary_updated_at: Timestamp, secondary_updated_at: Timestamp) -> bool {
        self.updated_at >= primary_updated_at && self.updated_at >= secondary_updated_at
    }
}

/// Fields needed to create a pairing row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPairing {
    /// Integration this row belongs to
    pub service_name: String,
    /// Record id in the Primary Store
    pub id_in_primary: String,
    /// Record id in the Secondary Service
    pub id_in_secondary: String,
}

impl NewPairing {
    /// Create a new pairing request
    pub fn new(
        service_name: impl Into<String>,
        id_in_primary: impl Into<String>,
        id_in_secondary: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            id_in_primary: id_in_primary.into(),
            id_in_secondary: id_in_secondary.into(),
        }
    }

    /// Materialize the row with an id and creation time
    ///
    /// # Visibility
    ///
    /// This is `pub(crate)` so that only pairing table implementations in
    /// this crate mint rows; external tables build `Pairing` themselves.
    pub(crate) fn into_pairing(self, id: String, created_at: Timestamp) -> Pairing {
        Pairing {
            id,
            service_name: self.service_name,
            id_in_primary: self.id_in_primary,
            id_in_secondary: self.id_in_secondary,
            updated_at: created_at,
        }
    }
}

/// Trait for pairing table implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage (files, databases, etc.)
/// - ✅ Cache rows in memory (with explicit flush)
/// - ✅ Reject rows that would break the 1:1 pairing invariant
///
/// ## Forbidden Capabilities
/// - ❌ Repair invariant violations silently
/// - ❌ Re-point an existing row at different ids
/// - ❌ Decide when to reconcile (owned by `Reconciler`)
///
/// ## Implementation Guidelines
///
/// - **1:1 per service**: `create` must fail with
///   [`Error::InvariantViolation`](crate::Error::InvariantViolation) when the
///   service already has a row for either id
/// - **Explicit flush**: `flush()` must persist all pending changes
#[async_trait]
pub trait PairingTable: Send + Sync {
    /// Wait until the table's contents are authoritative
    async fn ready(&self) -> Result<(), crate::Error> {
        Ok(())
    }

    /// List every row belonging to `service_name`
    async fn list(&self, service_name: &str) -> Result<Vec<Pairing>, crate::Error>;

    /// Create a row
    ///
    /// # Returns
    ///
    /// - `Ok(Pairing)`: The stored row, with its id and creation watermark
    /// - `Err(Error::InvariantViolation)`: Either id is already paired
    async fn create(&self, pairing: NewPairing) -> Result<Pairing, crate::Error>;

    /// Set a row's watermark to "now", leaving every other field unchanged
    async fn touch(&self, id: &str) -> Result<(), crate::Error>;

    /// Delete a row
    ///
    /// Deleting a row that does not exist is not an error.
    async fn delete(&self, id: &str) -> Result<(), crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing pairing tables from configuration
#[async_trait]
pub trait PairingTableFactory: Send + Sync {
    /// Create a PairingTable instance from configuration
    async fn create(
        &self,
        config: &crate::config::PairingTableConfig,
    ) -> Result<std::sync::Arc<dyn PairingTable>, crate::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairing(updated_at: Timestamp) -> Pairing {
        NewPairing::new("hubspot/deals", "p1", "s1").into_pairing("row-1".into(), updated_at)
    }

    #[test]
    fn test_links() {
        let row = pairing(5);
        assert!(row.links("p1", "s1"));
        assert!(!row.links("p1", "s2"));
        assert!(!row.links("s1", "p1"));
    }

    #[test]
    fn test_covers_uses_watermark() {
        let row = pairing(100);
        assert!(row.covers(100, 99));
        assert!(row.covers(10, 20));
        assert!(!row.covers(101, 20));
        assert!(!row.covers(10, 150));
    }
}
