//! Pass outcome reporting

use std::fmt;

use crate::traits::Timestamp;

/// One of the two reconciled sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The Primary Store
    Primary,
    /// The Secondary Service
    Secondary,
}

impl Side {
    /// The opposite side
    pub fn other(self) -> Side {
        match self {
            Side::Primary => Side::Secondary,
            Side::Secondary => Side::Primary,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Primary => f.write_str("primary"),
            Side::Secondary => f.write_str("secondary"),
        }
    }
}

/// Where in the pass a record-level failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Creating the counterpart of an unpaired record
    CreateCounterpart,
    /// Writing the pairing row for a freshly created counterpart
    PersistPairing,
    /// Deleting a record whose counterpart vanished
    DeleteOrphan,
    /// Deleting a pairing row
    RemovePairing,
    /// Pushing the winning side's data
    ResolveConflict,
    /// Advancing the pairing watermark
    TouchPairing,
}

/// A record the pass could not finish
///
/// The next pass retries it; nothing here needs manual action except an
/// `orphaned_counterpart`, which names a record that exists without a pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// Side the record being processed lives on
    pub side: Side,
    /// Id of the record being processed
    pub record_id: String,
    /// Step that failed
    pub stage: Stage,
    /// Error text
    pub error: String,
    /// Counterpart created this pass whose pairing could not be written
    pub orphaned_counterpart: Option<String>,
}

/// Whether a pass finished everything it set out to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every record was handled
    Complete,
    /// Some records failed and will be retried next pass
    Partial,
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Service the pass ran for
    pub service_name: String,
    /// Pass start time
    pub started_at: Timestamp,
    /// Pass end time
    pub finished_at: Timestamp,
    /// Counterparts created in the Primary Store
    pub created_in_primary: usize,
    /// Counterparts created in the Secondary Service
    pub created_in_secondary: usize,
    /// Orphans deleted from the Primary Store
    pub deleted_from_primary: usize,
    /// Orphans deleted from the Secondary Service
    pub deleted_from_secondary: usize,
    /// Primary records overwritten with Secondary data
    pub updated_in_primary: usize,
    /// Secondary records overwritten with Primary data
    pub updated_in_secondary: usize,
    /// Paired records already reconciled
    pub unchanged: usize,
    /// Pairings whose both records were gone
    pub dangling_pairings_removed: usize,
    /// Pending pairs whose pairing disappeared during the pass
    pub skipped: usize,
    /// Record-level failures
    pub failures: Vec<RecordFailure>,
}

impl PassReport {
    pub(crate) fn new(service_name: impl Into<String>, started_at: Timestamp) -> Self {
        Self {
            service_name: service_name.into(),
            started_at,
            finished_at: started_at,
            created_in_primary: 0,
            created_in_secondary: 0,
            deleted_from_primary: 0,
            deleted_from_secondary: 0,
            updated_in_primary: 0,
            updated_in_secondary: 0,
            unchanged: 0,
            dangling_pairings_removed: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    pub(crate) fn record_created(&mut self, on: Side) {
        match on {
            Side::Primary => self.created_in_primary += 1,
            Side::Secondary => self.created_in_secondary += 1,
        }
    }

    pub(crate) fn record_deleted(&mut self, from: Side) {
        match from {
            Side::Primary => self.deleted_from_primary += 1,
            Side::Secondary => self.deleted_from_secondary += 1,
        }
    }

    pub(crate) fn record_updated(&mut self, on: Side) {
        match on {
            Side::Primary => self.updated_in_primary += 1,
            Side::Secondary => self.updated_in_secondary += 1,
        }
    }

    /// Whether every record was handled
    pub fn outcome(&self) -> PassOutcome {
        if self.failures.is_empty() {
            PassOutcome::Complete
        } else {
            PassOutcome::Partial
        }
    }

    /// Records created, updated or deleted on either side
    pub fn record_mutations(&self) -> usize {
        self.created_in_primary
            + self.created_in_secondary
            + self.deleted_from_primary
            + self.deleted_from_secondary
            + self.updated_in_primary
            + self.updated_in_secondary
    }

    /// Pass duration in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.finished_at - self.started_at
    }
}
