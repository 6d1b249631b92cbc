// # pairsync-core
//
// Core library for two-way record reconciliation.
//
// ## Architecture Overview
//
// This library keeps two independently edited collections in step:
// - **Store**: Trait both sides (Primary Store, Secondary Service) are accessed through
// - **PairingTable**: Trait for the persistent join table linking Primary and Secondary ids
// - **Reconciler**: Core engine that runs snapshot → scan → resolve passes
// - **StoreRegistry**: Plugin-based registry building stores and engines from config
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from store implementations
// 2. **Stateless Passes**: Every pass starts from fresh snapshots; the pairing
//    table is the only memory between passes
// 3. **Plugin-Based**: Backends are registered dynamically, no hard-coded if-else
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Idempotency**: A pass over reconciled data changes nothing

pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use config::{CollectionConfig, EngineConfig, PairingTableConfig, StoreConfig, SyncConfig, TieBreak};
pub use engine::{EngineEvent, PassOutcome, PassReport, Reconciler, ServiceLocks, Side};
pub use error::{Error, ErrorClass, Result};
pub use lifecycle::{Readiness, ReadinessGate};
pub use registry::StoreRegistry;
pub use state::{FilePairingTable, FileStore, MemoryPairingTable, MemoryStore};
pub use traits::{Document, NewPairing, Pairing, PairingTable, Record, Store, Timestamp};
