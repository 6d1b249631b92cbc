//! Per-service pass serialization
//!
//! Two overlapping passes over the same service would each take their own
//! snapshot and could both create a counterpart for the same unpaired
//! record. [`ServiceLocks`] hands out at most one [`PassGuard`] per service
//! name; a second caller is rejected instead of queued, since the next
//! scheduled pass will pick up whatever it would have done.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};

/// Set of services with a pass in flight
#[derive(Debug, Default)]
pub struct ServiceLocks {
    active: Mutex<HashSet<String>>,
}

impl ServiceLocks {
    /// Create an empty lock set
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `service_name` for one pass
    ///
    /// # Returns
    ///
    /// - `Ok(PassGuard)`: Released when dropped
    /// - `Err(Error::PassInProgress)`: Another pass holds the service
    pub fn try_acquire(self: &Arc<Self>, service_name: &str) -> Result<PassGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(service_name.to_string()) {
            return Err(Error::PassInProgress(service_name.to_string()));
        }

        Ok(PassGuard {
            locks: Arc::clone(self),
            service_name: service_name.to_string(),
        })
    }

    /// Whether a pass for `service_name` is in flight
    pub fn is_active(&self, service_name: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(service_name)
    }
}

/// Exclusive claim on one service for the duration of a pass
#[derive(Debug)]
pub struct PassGuard {
    locks: Arc<ServiceLocks>,
    service_name: String,
}

impl PassGuard {
    /// The claimed service
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.locks
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.service_name);
    }
}
