//! Readiness lifecycle for stores and pairing tables
//!
//! A collection whose first load is asynchronous starts out
//! [`Readiness::Initializing`] and flips to [`Readiness::Ready`] exactly once.
//! Until then, its contents must not be mistaken for "the collection is
//! empty", so the engine awaits the transition before taking a snapshot.

use tokio::sync::watch;

/// Two-state lifecycle of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// First load still in flight
    Initializing,
    /// Contents are authoritative
    Ready,
}

/// One-shot, awaitable readiness transition
///
/// Cloning the gate shares the same underlying state, so a loader task and
/// the store handing out `wait()` futures can each hold one.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    tx: std::sync::Arc<watch::Sender<Readiness>>,
}

impl ReadinessGate {
    /// Create a gate in the `Initializing` state
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Readiness::Initializing);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    /// Create a gate that is already `Ready`
    pub fn ready() -> Self {
        let gate = Self::new();
        gate.mark_ready();
        gate
    }

    /// Transition to `Ready`. Idempotent.
    pub fn mark_ready(&self) {
        self.tx.send_replace(Readiness::Ready);
    }

    /// Current state
    pub fn state(&self) -> Readiness {
        *self.tx.borrow()
    }

    /// Whether the gate is `Ready`
    pub fn is_ready(&self) -> bool {
        self.state() == Readiness::Ready
    }

    /// Wait until the gate is `Ready`
    ///
    /// Returns immediately if it already is. The sender lives as long as
    /// `self`, so the wait cannot observe a closed channel.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // `wait_for` only fails once every sender is dropped; we hold one.
        let _ = rx.wait_for(|state| *state == Readiness::Ready).await;
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}
