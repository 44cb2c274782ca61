//! Unit of work: the transaction boundary repositories stage writes on.
//!
//! # Responsibility
//! - Collect staged inserts/updates/deletes from any number of repositories.
//! - Commit them atomically on `flush`, then write identities back and reset
//!   dirty state on the staged entities.
//!
//! # Invariants
//! - Staged operations apply in staging order inside one IMMEDIATE transaction.
//! - A failed flush is rolled back completely and keeps the stage intact.
//! - When rollback itself fails the unit of work is `Failed` and rejects
//!   every further call.
//! - Dropping a unit of work with pending operations follows its configured
//!   `DisposePolicy`.
//! - One unit of work serves one caller; it is neither `Send` nor `Sync`.

use crate::cache::CacheHandle;
use crate::config::{DisposePolicy, EngineConfig};
use crate::diagnostics::DiagnosticsHandle;
use crate::model::entity::{Entity, EntityHandle, EntityId};
use crate::query::Query;
use crate::repo::{RepoError, RepoResult};
use rusqlite::limits::Limit;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::cell::{Cell, RefCell};
use std::time::Instant;
use uuid::Uuid;

mod provider;
pub(crate) mod stage;

pub use provider::UnitOfWorkProvider;
pub use stage::OperationKind;

use stage::{StageKey, StagedOperation};

const MODULE: &str = "uow";

/// Lifecycle state of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkState {
    Open,
    /// Completed or discarded; only observable while dropping.
    Closed,
    /// Storage was left in an unknown transaction state.
    Failed,
}

/// Rows written by one successful flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn record(&mut self, kind: OperationKind) {
        match kind {
            OperationKind::Insert => self.inserted += 1,
            OperationKind::Update => self.updated += 1,
            OperationKind::Delete => self.deleted += 1,
        }
    }
}

/// What the stage knows about one persisted identity.
pub(crate) enum StagedEntry<E> {
    Deleted,
    Pending(EntityHandle<E>),
}

/// One logical transaction over an exclusively borrowed connection.
pub struct UnitOfWork<'conn> {
    id: Uuid,
    conn: &'conn mut Connection,
    config: EngineConfig,
    cache: CacheHandle,
    diagnostics: DiagnosticsHandle,
    staged: RefCell<Vec<Box<dyn StagedOperation>>>,
    state: Cell<UnitOfWorkState>,
}

impl<'conn> UnitOfWork<'conn> {
    /// Creates a unit of work over a migrated connection.
    pub fn new(
        conn: &'conn mut Connection,
        config: EngineConfig,
        cache: CacheHandle,
        diagnostics: DiagnosticsHandle,
    ) -> Self {
        let id = Uuid::new_v4();
        diagnostics.debug("uow_open", MODULE, &format!("status=ok uow_id={id}"));
        Self {
            id,
            conn,
            config,
            cache,
            diagnostics,
            staged: RefCell::new(Vec::new()),
            state: Cell::new(UnitOfWorkState::Open),
        }
    }

    /// Instance id used to correlate diagnostic events.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> UnitOfWorkState {
        self.state.get()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cache handle repositories default to when built from this unit of work.
    pub fn cache(&self) -> CacheHandle {
        self.cache.clone()
    }

    pub fn diagnostics(&self) -> DiagnosticsHandle {
        self.diagnostics.clone()
    }

    /// Number of operations waiting for the next flush.
    pub fn pending_operations(&self) -> usize {
        self.staged.borrow().len()
    }

    /// Values one statement may bind: `max_query_parameters`, capped by the
    /// connection's `SQLITE_LIMIT_VARIABLE_NUMBER`.
    pub fn parameter_budget(&self) -> usize {
        let configured = self.config.max_query_parameters;
        match usize::try_from(self.conn.limit(Limit::SQLITE_LIMIT_VARIABLE_NUMBER)) {
            Ok(backend) if backend > 0 => configured.min(backend),
            _ => configured,
        }
    }

    /// Starts a query over entities of type `E`.
    pub fn query<E: Entity>(&self) -> Query<E> {
        Query::all()
    }

    /// Commits every staged operation as one transaction.
    ///
    /// Calling it with nothing staged is a no-op that opens no transaction.
    /// A `write` borrow of a staged entity held across this call fails the
    /// flush with `Conflict`. A `read` borrow skips that entity's identity
    /// write-back after commit and reports it to diagnostics.
    ///
    /// # Errors
    /// - Storage failures, `NotFound` and `Conflict` roll back the transaction
    ///   and leave the stage untouched, so the caller may fix and retry.
    /// - `Unrecoverable` when the rollback fails; the unit of work is unusable.
    pub fn flush(&self) -> RepoResult<FlushReport> {
        self.ensure_usable()?;

        let staged = self.staged.borrow();
        if staged.is_empty() {
            return Ok(FlushReport::default());
        }

        let started_at = Instant::now();
        self.diagnostics.debug(
            "uow_flush",
            MODULE,
            &format!("status=start uow_id={} pending={}", self.id, staged.len()),
        );

        let tx = Transaction::new_unchecked(&*self.conn, TransactionBehavior::Immediate)
            .map_err(|err| self.flush_failed(err.into(), started_at))?;

        let mut assigned = Vec::with_capacity(staged.len());
        for operation in staged.iter() {
            match operation.apply(&tx) {
                Ok(id) => assigned.push(id),
                Err(err) => return Err(self.abort(tx, err, started_at)),
            }
        }

        if let Err(err) = tx.commit() {
            return Err(self.commit_failed(err.into(), started_at));
        }
        drop(staged);

        let operations = std::mem::take(&mut *self.staged.borrow_mut());
        let mut report = FlushReport::default();
        for (operation, id) in operations.iter().zip(assigned) {
            report.record(operation.kind());
            operation.committed(id, self.diagnostics.as_ref());
        }

        self.diagnostics.info(
            "uow_flush",
            MODULE,
            &format!(
                "status=ok uow_id={} inserted={} updated={} deleted={} duration_ms={}",
                self.id,
                report.inserted,
                report.updated,
                report.deleted,
                started_at.elapsed().as_millis()
            ),
        );
        Ok(report)
    }

    /// Flushes pending work and closes the unit of work.
    pub fn complete(self) -> RepoResult<FlushReport> {
        let result = self.flush();
        if self.state.get() == UnitOfWorkState::Open {
            self.state.set(UnitOfWorkState::Closed);
        }
        result
    }

    /// Drops pending work without any storage effect.
    pub fn discard(self) {
        let pending = self.staged.borrow_mut().drain(..).count();
        self.state.set(UnitOfWorkState::Closed);
        self.diagnostics.debug(
            "uow_discard",
            MODULE,
            &format!("status=ok uow_id={} dropped={pending}", self.id),
        );
    }

    pub(crate) fn ensure_usable(&self) -> RepoResult<()> {
        match self.state.get() {
            UnitOfWorkState::Open => Ok(()),
            UnitOfWorkState::Closed => Err(RepoError::Unrecoverable(format!(
                "unit of work {} is closed",
                self.id
            ))),
            UnitOfWorkState::Failed => Err(RepoError::Unrecoverable(format!(
                "unit of work {} failed; discard it and open a new one",
                self.id
            ))),
        }
    }

    /// Connection for reads; rejected once the unit of work failed.
    pub(crate) fn connection(&self) -> RepoResult<&Connection> {
        self.ensure_usable()?;
        Ok(&*self.conn)
    }

    /// Records an operation; an entity keeps at most one staged operation.
    ///
    /// A delete of a never-flushed insert removes the insert instead.
    pub(crate) fn stage(&self, operation: Box<dyn StagedOperation>) -> RepoResult<()> {
        self.ensure_usable()?;

        let mut staged = self.staged.borrow_mut();
        let key = operation.key();
        match staged.iter().position(|existing| existing.key() == key) {
            Some(index)
                if operation.kind() == OperationKind::Delete
                    && staged[index].kind() == OperationKind::Insert =>
            {
                staged.remove(index);
            }
            Some(index) => staged[index] = operation,
            None => staged.push(operation),
        }
        Ok(())
    }

    /// Looks up a staged write for a persisted identity.
    pub(crate) fn staged_entry<E: Entity>(&self, id: EntityId) -> Option<StagedEntry<E>> {
        let key = StageKey::persisted(E::ENTITY_TYPE, id);
        let staged = self.staged.borrow();
        let operation = staged.iter().find(|operation| operation.key() == key)?;
        if operation.kind() == OperationKind::Delete {
            return Some(StagedEntry::Deleted);
        }
        operation
            .entity_any()
            .downcast_ref::<EntityHandle<E>>()
            .cloned()
            .map(StagedEntry::Pending)
    }

    /// Staged inserts of type `E`, in staging order.
    pub(crate) fn staged_inserts<E: Entity>(&self) -> Vec<EntityHandle<E>> {
        self.staged
            .borrow()
            .iter()
            .filter(|operation| {
                operation.kind() == OperationKind::Insert
                    && operation.key().entity_type == E::ENTITY_TYPE
            })
            .filter_map(|operation| {
                operation
                    .entity_any()
                    .downcast_ref::<EntityHandle<E>>()
                    .cloned()
            })
            .collect()
    }

    fn abort(&self, tx: Transaction<'_>, err: RepoError, started_at: Instant) -> RepoError {
        if self.conn.is_autocommit() {
            // SQLite already rolled the transaction back.
            drop(tx);
            return self.flush_failed(err, started_at);
        }

        match tx.rollback() {
            Ok(()) => self.flush_failed(err, started_at),
            Err(rollback_err) => self.mark_failed(err, rollback_err, started_at),
        }
    }

    fn commit_failed(&self, err: RepoError, started_at: Instant) -> RepoError {
        if self.conn.is_autocommit() {
            return self.flush_failed(err, started_at);
        }

        match self.conn.execute_batch("ROLLBACK;") {
            Ok(()) => self.flush_failed(err, started_at),
            Err(rollback_err) => self.mark_failed(err, rollback_err, started_at),
        }
    }

    fn flush_failed(&self, err: RepoError, started_at: Instant) -> RepoError {
        self.diagnostics.error(
            "uow_flush",
            MODULE,
            &format!(
                "status=error uow_id={} duration_ms={} rolled_back=true error={}",
                self.id,
                started_at.elapsed().as_millis(),
                err
            ),
        );
        err
    }

    fn mark_failed(
        &self,
        err: RepoError,
        rollback_err: rusqlite::Error,
        started_at: Instant,
    ) -> RepoError {
        self.state.set(UnitOfWorkState::Failed);
        self.diagnostics.error(
            "uow_flush",
            MODULE,
            &format!(
                "status=error uow_id={} duration_ms={} rolled_back=false error={} rollback_error={}",
                self.id,
                started_at.elapsed().as_millis(),
                err,
                rollback_err
            ),
        );
        RepoError::Unrecoverable(format!(
            "rollback failed after `{err}`: {rollback_err}"
        ))
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        let pending = self.staged.get_mut().len();
        if pending == 0 {
            return;
        }

        match (self.state.get(), self.config.dispose_policy) {
            (UnitOfWorkState::Open, DisposePolicy::Flush) => {
                if let Err(err) = self.flush() {
                    self.diagnostics.error(
                        "uow_dispose",
                        MODULE,
                        &format!(
                            "status=error uow_id={} pending={pending} error={err}",
                            self.id
                        ),
                    );
                }
            }
            _ => self.diagnostics.info(
                "uow_dispose",
                MODULE,
                &format!("status=discarded uow_id={} pending={pending}", self.id),
            ),
        }
    }
}
