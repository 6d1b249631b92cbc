//! Core reconciliation engine
//!
//! The Reconciler is responsible for:
//! - Taking consistent snapshots of both stores and the pairing table
//! - Creating counterparts for unpaired records
//! - Deleting records whose counterpart disappeared
//! - Resolving conflicting edits with last-write-wins
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐      ┌──────────────┐      ┌──────────────┐
//! │   Primary   │      │  Secondary   │      │ PairingTable │
//! │   Store     │      │   Service    │      │ (service_name│
//! └─────────────┘      └──────────────┘      └──────────────┘
//!        │                    │                     │
//!        └──────── snapshot (concurrent) ───────────┘
//!                             │
//!                             ▼
//!                     ┌──────────────┐
//!                     │  Reconciler  │──── EngineEvent ───▶ monitoring
//!                     └──────────────┘
//!                             │
//!      Phase A: Primary scan  │  create / delete orphan / pend
//!      Phase B: Secondary scan│  create / delete orphan / pend
//!      Sweep: dangling rows   │
//!      Phase C: conflicts     ▼  update loser, touch pairing
//! ```
//!
//! ## Pass Flow
//!
//! 1. Claim the service (one pass per service at a time)
//! 2. Wait for both stores and the pairing table to be Ready
//! 3. Fetch the three snapshots concurrently; validate the pairings
//! 4. Scan Primary, then Secondary, collecting paired records
//! 5. Delete pairings whose records are both gone
//! 6. Resolve every collected pair and advance its watermark
//!
//! Failures on a single record never stop the pass; they are collected in
//! the [`PassReport`] and the next pass picks the record up again.

mod guard;
mod index;
mod report;

pub use guard::{PassGuard, ServiceLocks};
pub use report::{PassOutcome, PassReport, RecordFailure, Side, Stage};

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, TieBreak, validate_service_name};
use crate::engine::index::{PairingIndex, id_on};
use crate::error::{Error, ErrorClass, Result};
use crate::traits::{NewPairing, Pairing, PairingTable, Record, Store, Timestamp, now_millis};

/// Events emitted by the Reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A pass claimed its service and is about to snapshot
    PassStarted {
        service_name: String,
    },

    /// An unpaired record got a counterpart and a pairing
    CounterpartCreated {
        source: Side,
        source_id: String,
        counterpart_id: String,
    },

    /// A record whose counterpart disappeared was deleted
    OrphanRemoved {
        side: Side,
        record_id: String,
    },

    /// A pairing row was deleted
    PairingRemoved {
        pairing_id: String,
    },

    /// A pair was brought back in sync
    ConflictResolved {
        winner: Side,
        primary_id: String,
        secondary_id: String,
    },

    /// Work on one record failed; the pass continues
    RecordFailed {
        side: Side,
        record_id: String,
        error: String,
    },

    /// A pass ran to the end
    PassFinished {
        service_name: String,
        outcome: PassOutcome,
        mutations: usize,
    },

    /// A pass could not run at all
    PassFailed {
        service_name: String,
        error: String,
    },

    /// Engine stopped
    Stopped {
        reason: String,
    },
}

/// Paired records awaiting conflict resolution, keyed by (primary id, secondary id)
type PendingPairs<'a, T> = BTreeMap<(String, String), (&'a Record<T>, &'a Record<T>)>;

/// Snapshot records keyed by id
type ById<'a, T> = HashMap<&'a str, &'a Record<T>>;

/// Core reconciliation engine
///
/// Reconciles one Primary store with one Secondary store for a single
/// service name. The engine keeps no state between passes other than what
/// it writes to the pairing table.
///
/// ## Lifecycle
///
/// 1. Create with [`Reconciler::new()`]
/// 2. Either call [`Reconciler::reconcile()`] from your own scheduler, or
///    start the built-in poll loop with [`Reconciler::run()`]
/// 3. The loop runs until a shutdown signal is received
///
/// ## Threading
///
/// `reconcile()` takes `&self` and may be called from several tasks; the
/// service lock turns overlapping calls into [`Error::PassInProgress`].
///
/// ## Retries
///
/// Stores never retry. The engine bounds every call with the operation
/// timeout and retries idempotent calls on transient errors. Record creates
/// are attempted once: a create that timed out may still have landed.
pub struct Reconciler<T> {
    /// Integration this engine reconciles
    service_name: String,

    /// Local system of record
    primary: Arc<dyn Store<T>>,

    /// Remote side
    secondary: Arc<dyn Store<T>>,

    /// Persistent join table
    pairings: Arc<dyn PairingTable>,

    /// Retry, timeout and scheduling settings
    settings: EngineConfig,

    /// One-pass-per-service guard, possibly shared with other engines
    locks: Arc<ServiceLocks>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl<T> Reconciler<T>
where
    T: Send + Sync + 'static,
{
    /// Create a new reconciler
    ///
    /// # Parameters
    ///
    /// - `service_name`: Scope of the pairing rows this engine owns
    /// - `primary`: Primary Store
    /// - `secondary`: Secondary Service
    /// - `pairings`: Pairing table (may be shared across services)
    /// - `settings`: Engine configuration
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        service_name: impl Into<String>,
        primary: Arc<dyn Store<T>>,
        secondary: Arc<dyn Store<T>>,
        pairings: Arc<dyn PairingTable>,
        settings: EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        let service_name = service_name.into();
        validate_service_name(&service_name)?;
        settings.validate()?;

        let (tx, rx) = mpsc::channel(settings.event_channel_capacity);

        let engine = Self {
            service_name,
            primary,
            secondary,
            pairings,
            settings,
            locks: Arc::new(ServiceLocks::new()),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Share a lock set with other engines
    ///
    /// Engines for the same service name that share locks never run
    /// overlapping passes.
    pub fn with_locks(mut self, locks: Arc<ServiceLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// The service this engine reconciles
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Engine settings
    pub fn settings(&self) -> &EngineConfig {
        &self.settings
    }

    /// Run one reconciliation pass
    ///
    /// # Returns
    ///
    /// - `Ok(PassReport)`: The pass ran; check [`PassReport::outcome`] for
    ///   records that failed
    /// - `Err(Error::PassInProgress)`: Another pass for this service is running
    /// - `Err(Error::NotReady)`: A store or the pairing table did not become
    ///   Ready within the ready timeout
    /// - `Err(Error::InvariantViolation)`: The pairing table is inconsistent;
    ///   nothing was modified
    /// - `Err(_)`: A snapshot could not be taken; nothing was modified
    pub async fn reconcile(&self) -> Result<PassReport> {
        let _guard = self.locks.try_acquire(&self.service_name)?;

        self.emit_event(EngineEvent::PassStarted {
            service_name: self.service_name.clone(),
        });

        match self.pass().await {
            Ok(report) => {
                self.emit_event(EngineEvent::PassFinished {
                    service_name: self.service_name.clone(),
                    outcome: report.outcome(),
                    mutations: report.record_mutations(),
                });
                Ok(report)
            }
            Err(e) => {
                self.emit_event(EngineEvent::PassFailed {
                    service_name: self.service_name.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Body of a pass, run while holding the service lock
    async fn pass(&self) -> Result<PassReport> {
        self.await_ready().await?;

        let started_at = now_millis();
        let (primary_records, secondary_records, pairing_rows) = tokio::try_join!(
            self.attempt("list primary", || self.primary.list()),
            self.attempt("list secondary", || self.secondary.list()),
            self.attempt("list pairings", || self.pairings.list(&self.service_name)),
        )?;
        debug!(
            "Snapshot for {}: {} primary, {} secondary, {} pairings",
            self.service_name,
            primary_records.len(),
            secondary_records.len(),
            pairing_rows.len()
        );

        let mut index = PairingIndex::build(&self.service_name, pairing_rows)?;
        let primary_by_id = by_id(&primary_records);
        let secondary_by_id = by_id(&secondary_records);

        let mut report = PassReport::new(&self.service_name, started_at);
        let mut pending: PendingPairs<'_, T> = BTreeMap::new();

        // Phase A
        self.scan(
            Side::Primary,
            &primary_records,
            &secondary_by_id,
            &mut index,
            &mut pending,
            &mut report,
        )
        .await;

        // Phase B
        self.scan(
            Side::Secondary,
            &secondary_records,
            &primary_by_id,
            &mut index,
            &mut pending,
            &mut report,
        )
        .await;

        self.sweep_dangling(&primary_by_id, &secondary_by_id, &mut index, &mut report)
            .await;

        // Phase C
        self.resolve_conflicts(pending, &index, &mut report).await;

        report.finished_at = now_millis();
        info!(
            "Pass for {} finished in {}ms: +{}/+{} created, -{}/-{} deleted, {}/{} updated, {} unchanged, {} failed",
            self.service_name,
            report.duration_ms(),
            report.created_in_primary,
            report.created_in_secondary,
            report.deleted_from_primary,
            report.deleted_from_secondary,
            report.updated_in_primary,
            report.updated_in_secondary,
            report.unchanged,
            report.failures.len()
        );

        Ok(report)
    }

    /// Wait for all three participants, bounded by the ready timeout
    ///
    /// A store that is still loading must not be read as an empty
    /// collection: that would look like every record was deleted.
    async fn await_ready(&self) -> Result<()> {
        let all_ready = async {
            tokio::try_join!(
                self.primary.ready(),
                self.secondary.ready(),
                self.pairings.ready(),
            )
        };

        match tokio::time::timeout(self.settings.ready_timeout(), all_ready).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(Error::not_ready(format!(
                "stores for service '{}' not ready after {:?}",
                self.service_name,
                self.settings.ready_timeout()
            ))),
        }
    }

    /// Scan one side's snapshot (Phase A for Primary, Phase B for Secondary)
    async fn scan<'a>(
        &self,
        side: Side,
        own: &'a [Record<T>],
        other: &ById<'a, T>,
        index: &mut PairingIndex,
        pending: &mut PendingPairs<'a, T>,
        report: &mut PassReport,
    ) {
        for record in own {
            let Some(row) = index.lookup(side, &record.id).cloned() else {
                self.create_counterpart(side, record, report).await;
                continue;
            };

            if index.is_removed(&row.id) {
                debug!("Pairing {} already removed this pass, skipping {} record {}", row.id, side, record.id);
                continue;
            }

            match other.get(id_on(&row, side.other())) {
                Some(&counterpart) => {
                    let (p, s) = match side {
                        Side::Primary => (record, counterpart),
                        Side::Secondary => (counterpart, record),
                    };
                    pending
                        .entry((p.id.clone(), s.id.clone()))
                        .or_insert((p, s));
                }
                None => self.remove_orphan(side, record, &row, index, report).await,
            }
        }
    }

    /// Create the counterpart of an unpaired record, then pair the two
    async fn create_counterpart(&self, side: Side, record: &Record<T>, report: &mut PassReport) {
        let target = side.other();

        let created = self
            .timed("create counterpart", self.store(target).create(&record.data))
            .await;
        let counterpart_id = match created {
            Ok(id) => id,
            Err(e) => {
                self.fail(report, side, &record.id, Stage::CreateCounterpart, &e, None);
                return;
            }
        };
        report.record_created(target);
        info!(
            "Created {} counterpart {} for {} record {}",
            target, counterpart_id, side, record.id
        );

        let new_pairing = match side {
            Side::Primary => NewPairing::new(&self.service_name, &record.id, &counterpart_id),
            Side::Secondary => NewPairing::new(&self.service_name, &counterpart_id, &record.id),
        };

        match self
            .attempt("create pairing", || self.pairings.create(new_pairing.clone()))
            .await
        {
            Ok(row) => {
                debug!("Paired {} <-> {} as {}", row.id_in_primary, row.id_in_secondary, row.id);
                self.emit_event(EngineEvent::CounterpartCreated {
                    source: side,
                    source_id: record.id.clone(),
                    counterpart_id,
                });
            }
            Err(e) => {
                error!(
                    "{} record {} exists without a pairing (counterpart of {} record {}): {}",
                    target, counterpart_id, side, record.id, e
                );
                self.fail(
                    report,
                    side,
                    &record.id,
                    Stage::PersistPairing,
                    &e,
                    Some(counterpart_id),
                );
            }
        }
    }

    /// Delete a record whose counterpart is gone, then its pairing
    async fn remove_orphan(
        &self,
        side: Side,
        record: &Record<T>,
        row: &Pairing,
        index: &mut PairingIndex,
        report: &mut PassReport,
    ) {
        let store = self.store(side);
        if let Err(e) = self.attempt("delete orphan", || store.delete(&record.id)).await {
            self.fail(report, side, &record.id, Stage::DeleteOrphan, &e, None);
            return;
        }
        report.record_deleted(side);
        info!(
            "Deleted {} record {}: counterpart {} is gone",
            side,
            record.id,
            id_on(row, side.other())
        );
        self.emit_event(EngineEvent::OrphanRemoved {
            side,
            record_id: record.id.clone(),
        });

        if let Err(e) = self.remove_pairing(row, index).await {
            self.fail(report, side, &record.id, Stage::RemovePairing, &e, None);
        }
    }

    /// Delete pairings neither of whose records exists any more
    async fn sweep_dangling(
        &self,
        primary: &ById<'_, T>,
        secondary: &ById<'_, T>,
        index: &mut PairingIndex,
        report: &mut PassReport,
    ) {
        let dangling: Vec<Pairing> = index
            .rows()
            .iter()
            .filter(|row| !index.is_removed(&row.id))
            .filter(|row| {
                !primary.contains_key(row.id_in_primary.as_str())
                    && !secondary.contains_key(row.id_in_secondary.as_str())
            })
            .cloned()
            .collect();

        for row in dangling {
            match self.remove_pairing(&row, index).await {
                Ok(()) => {
                    report.dangling_pairings_removed += 1;
                    debug!(
                        "Removed dangling pairing {} ({} <-> {})",
                        row.id, row.id_in_primary, row.id_in_secondary
                    );
                }
                Err(e) => {
                    self.fail(report, Side::Primary, &row.id_in_primary, Stage::RemovePairing, &e, None);
                }
            }
        }
    }

    /// Resolve every pending pair (Phase C)
    async fn resolve_conflicts(
        &self,
        pending: PendingPairs<'_, T>,
        index: &PairingIndex,
        report: &mut PassReport,
    ) {
        for ((primary_id, secondary_id), (p, s)) in pending {
            let Some(row) = index.find_link(&primary_id, &secondary_id) else {
                debug!("Pairing {} <-> {} removed this pass, skipping", primary_id, secondary_id);
                report.skipped += 1;
                continue;
            };

            if row.covers(p.updated_at, s.updated_at) {
                report.unchanged += 1;
                continue;
            }

            let winner = self.winner(p.updated_at, s.updated_at);
            let (loser_id, data) = match winner {
                Side::Primary => (&s.id, &p.data),
                Side::Secondary => (&p.id, &s.data),
            };
            let loser = self.store(winner.other());

            if let Err(e) = self.attempt("resolve conflict", || loser.update(loser_id, data)).await {
                self.fail(report, winner.other(), loser_id, Stage::ResolveConflict, &e, None);
                continue;
            }
            report.record_updated(winner.other());
            info!(
                "Resolved {} <-> {}: {} wins ({} vs {}, watermark {})",
                primary_id, secondary_id, winner, p.updated_at, s.updated_at, row.updated_at
            );
            self.emit_event(EngineEvent::ConflictResolved {
                winner,
                primary_id: primary_id.clone(),
                secondary_id: secondary_id.clone(),
            });

            if let Err(e) = self.attempt("touch pairing", || self.pairings.touch(&row.id)).await {
                self.fail(report, Side::Primary, &primary_id, Stage::TouchPairing, &e, None);
            }
        }
    }

    /// Pick the side whose data survives
    fn winner(&self, primary_updated_at: Timestamp, secondary_updated_at: Timestamp) -> Side {
        match primary_updated_at.cmp(&secondary_updated_at) {
            Ordering::Greater => Side::Primary,
            Ordering::Less => Side::Secondary,
            Ordering::Equal => match self.settings.tie_break {
                TieBreak::PrimaryWins => Side::Primary,
                TieBreak::SecondaryWins => Side::Secondary,
            },
        }
    }

    async fn remove_pairing(&self, row: &Pairing, index: &mut PairingIndex) -> Result<()> {
        self.attempt("delete pairing", || self.pairings.delete(&row.id))
            .await?;
        index.mark_removed(&row.id);
        self.emit_event(EngineEvent::PairingRemoved {
            pairing_id: row.id.clone(),
        });
        Ok(())
    }

    fn store(&self, side: Side) -> &Arc<dyn Store<T>> {
        match side {
            Side::Primary => &self.primary,
            Side::Secondary => &self.secondary,
        }
    }

    /// Record a per-record failure and move on
    fn fail(
        &self,
        report: &mut PassReport,
        side: Side,
        record_id: &str,
        stage: Stage,
        error: &Error,
        orphaned_counterpart: Option<String>,
    ) {
        warn!("{:?} failed for {} record {}: {}", stage, side, record_id, error);
        self.emit_event(EngineEvent::RecordFailed {
            side,
            record_id: record_id.to_string(),
            error: error.to_string(),
        });
        report.failures.push(RecordFailure {
            side,
            record_id: record_id.to_string(),
            stage,
            error: error.to_string(),
            orphaned_counterpart,
        });
    }

    /// Run a single call bounded by the operation timeout
    async fn timed<R>(&self, op: &str, call: impl Future<Output = Result<R>>) -> Result<R> {
        let limit = self.settings.operation_timeout();
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!("{} exceeded {:?}", op, limit))),
        }
    }

    /// Run an idempotent call, retrying transient failures
    async fn attempt<R, F, Fut>(&self, op: &str, call: F) -> Result<R>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let mut attempt = 0;
        loop {
            match self.timed(op, call()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    warn!(
                        "{} failed for {} (attempt {}/{}): {}",
                        op, self.service_name, attempt, self.settings.max_retries, e
                    );
                    tokio::time::sleep(self.settings.retry_delay()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run the engine
    ///
    /// Starts a pass immediately, then one per poll interval, until SIGINT
    /// or SIGTERM is received. A pass that outlives the interval delays the
    /// next tick instead of overlapping it.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: The pairing table could not be flushed
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Internal run implementation that accepts an optional shutdown signal
    ///
    /// # Parameters
    ///
    /// - `shutdown_rx`: Optional oneshot receiver to trigger shutdown (for testing)
    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let mut interval = tokio::time::interval(self.settings.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval);

        info!(
            "Reconciling {} every {:?} ({} -> {})",
            self.service_name,
            self.settings.poll_interval(),
            self.primary.name(),
            self.secondary.name()
        );

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                    "Shutdown signal"
                }
                None => wait_for_signal().await,
            }
        };
        tokio::pin!(shutdown);

        // Main event loop
        loop {
            tokio::select! {
                reason = &mut shutdown => {
                    info!("Shutdown signal received ({})", reason);
                    self.emit_event(EngineEvent::Stopped {
                        reason: reason.to_string(),
                    });
                    break;
                }

                Some(_) = ticks.next() => {
                    self.scheduled_pass().await;
                }
            }
        }

        // Flush pairings before exiting
        self.pairings.flush().await?;
        info!("Pairing table flushed, engine stopped");

        Ok(())
    }

    /// One scheduled pass; errors are logged and the loop continues
    async fn scheduled_pass(&self) {
        match self.reconcile().await {
            Ok(report) if report.outcome() == PassOutcome::Partial => {
                warn!(
                    "Pass for {} left {} record(s) for the next pass",
                    self.service_name,
                    report.failures.len()
                );
            }
            Ok(_) => {}
            Err(Error::PassInProgress(_)) => {
                debug!("Pass for {} still running, skipping tick", self.service_name);
            }
            Err(e) if e.class() == ErrorClass::InvariantViolation => {
                error!(
                    "Pairing table for {} is inconsistent, nothing was changed: {}",
                    self.service_name, e
                );
            }
            Err(e) => {
                warn!("Pass for {} did not run: {}", self.service_name, e);
            }
        }
    }

    /// Emit an engine event
    ///
    /// # Parameters
    ///
    /// - `event`: The event to emit
    fn emit_event(&self, event: EngineEvent) {
        // Never block a pass on a slow consumer; nobody listening is fine
        if let Err(mpsc::error::TrySendError::Full(_)) = self.event_tx.try_send(event) {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }

    /// Test-only helper to run the engine with a controlled shutdown signal
    ///
    /// # Visibility
    ///
    /// This is `pub` for testing purposes only.
    ///
    /// **TESTING ONLY**: Contract tests require controlled shutdown.
    /// Production code should use `run()` instead, which manages shutdown
    /// via OS signals (SIGTERM/SIGINT) rather than programmatic channels.
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }
}

fn by_id<T>(records: &[Record<T>]) -> ById<'_, T> {
    records.iter().map(|r| (r.id.as_str(), r)).collect()
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT",
                    _ = term.recv() => "SIGTERM",
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl-C"
    }
}
