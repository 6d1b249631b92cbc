//! Core traits for the pairsync system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`Store`]: A reconciled collection (Primary Store or Secondary Service)
//! - [`PairingTable`]: Persistent join rows between the two sides

pub mod pairing_table;
pub mod store;

pub use pairing_table::{NewPairing, Pairing, PairingTable, PairingTableFactory};
pub use store::{Document, Record, Store, StoreFactory, Timestamp, now_millis};
