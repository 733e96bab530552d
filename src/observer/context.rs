use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::observer::change_log::ChangeLog;
use crate::observer::entity::{same_entity, Entity};
use crate::observer::error::ObserverError;
use crate::observer::operation::OperationRecord;

/// Lifecycle of one transaction as seen by the observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Active,
    Committed,
    RolledBack,
}

/// How the caller resolved the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Committed,
    RolledBack,
}

impl From<TransactionOutcome> for TransactionState {
    fn from(outcome: TransactionOutcome) -> Self {
        match outcome {
            TransactionOutcome::Committed => TransactionState::Committed,
            TransactionOutcome::RolledBack => TransactionState::RolledBack,
        }
    }
}

/// Mutable state of one transaction, owned by whoever drives it.
///
/// The context is passed into every observer hook instead of being keyed by
/// thread, so a transaction may move between threads with its context. It can
/// be reused for consecutive transactions: ending a transaction always leaves
/// it `Idle` with an empty change log and no in-flight markers.
#[derive(Debug)]
pub struct TransactionContext {
    transaction_id: Uuid,
    state: TransactionState,
    change_log: ChangeLog,
    in_flight: Vec<Arc<dyn Entity>>,
    started_at: Instant,
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionContext {
    pub fn new() -> Self {
        Self {
            transaction_id: Uuid::nil(),
            state: TransactionState::Idle,
            change_log: ChangeLog::new(),
            in_flight: Vec::new(),
            started_at: Instant::now(),
        }
    }

    /// Identifier of the current (or last) transaction; nil before the first begin
    pub fn transaction_id(&self) -> Uuid {
        self.transaction_id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn change_log(&self) -> &ChangeLog {
        &self.change_log
    }

    /// Whether `entity` is being saved in this transaction
    pub fn is_in_flight(&self, entity: &Arc<dyn Entity>) -> bool {
        self.in_flight.iter().any(|marked| same_entity(marked, entity))
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) fn begin(&mut self) -> Result<Uuid, ObserverError> {
        if self.state != TransactionState::Idle {
            return Err(ObserverError::InvalidState {
                hook: "begin_transaction",
                state: self.state,
            });
        }

        self.transaction_id = Uuid::new_v4();
        self.state = TransactionState::Active;
        self.change_log.clear();
        self.in_flight.clear();
        self.started_at = Instant::now();
        Ok(self.transaction_id)
    }

    pub(crate) fn ensure_active(&self, hook: &'static str) -> Result<(), ObserverError> {
        if self.state != TransactionState::Active {
            return Err(ObserverError::InvalidState {
                hook,
                state: self.state,
            });
        }
        Ok(())
    }

    pub(crate) fn record(&mut self, record: OperationRecord) {
        self.change_log.push(record);
    }

    pub(crate) fn mark_in_flight(&mut self, entity: Arc<dyn Entity>) {
        if !self.is_in_flight(&entity) {
            self.in_flight.push(entity);
        }
    }

    /// Move the transaction to its outcome and detach its change log.
    ///
    /// The context is already clean when this returns; it goes back to `Idle`
    /// when the returned guard drops, even if dispatch unwinds.
    pub(crate) fn resolve(&mut self, outcome: TransactionOutcome) -> Result<ResolvedTransaction<'_>, ObserverError> {
        self.ensure_active("end_transaction")?;

        self.state = outcome.into();
        let change_log = std::mem::take(&mut self.change_log);
        self.in_flight.clear();

        tracing::debug!(
            "Transaction {} resolved as {:?} after {:?} with {} operations",
            self.transaction_id,
            outcome,
            self.started_at.elapsed(),
            change_log.len()
        );

        Ok(ResolvedTransaction {
            ctx: self,
            outcome,
            change_log,
        })
    }
}

/// A transaction between its outcome and the return to `Idle`
pub(crate) struct ResolvedTransaction<'a> {
    ctx: &'a mut TransactionContext,
    outcome: TransactionOutcome,
    change_log: ChangeLog,
}

impl ResolvedTransaction<'_> {
    pub(crate) fn transaction_id(&self) -> Uuid {
        self.ctx.transaction_id
    }

    pub(crate) fn outcome(&self) -> TransactionOutcome {
        self.outcome
    }

    pub(crate) fn change_log(&self) -> &ChangeLog {
        &self.change_log
    }
}

impl Drop for ResolvedTransaction<'_> {
    fn drop(&mut self) {
        self.ctx.state = TransactionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::User;

    #[test]
    fn begin_requires_idle() {
        let mut ctx = TransactionContext::new();
        ctx.begin().unwrap();
        assert!(ctx.is_active());

        let err = ctx.begin().unwrap_err();
        assert!(matches!(
            err,
            ObserverError::InvalidState { hook: "begin_transaction", state: TransactionState::Active }
        ));
    }

    #[test]
    fn each_begin_gets_a_fresh_id() {
        let mut ctx = TransactionContext::new();
        let first = ctx.begin().unwrap();
        drop(ctx.resolve(TransactionOutcome::RolledBack).unwrap());
        let second = ctx.begin().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn resolve_clears_and_returns_to_idle() {
        let mut ctx = TransactionContext::new();
        ctx.begin().unwrap();

        let user: Arc<dyn Entity> = Arc::new(User::new("alice"));
        ctx.mark_in_flight(user.clone());
        ctx.record(OperationRecord::insert(user.clone(), None));

        {
            let resolved = ctx.resolve(TransactionOutcome::Committed).unwrap();
            assert_eq!(resolved.change_log().len(), 1);
            assert_eq!(resolved.outcome(), TransactionOutcome::Committed);
        }

        assert_eq!(ctx.state(), TransactionState::Idle);
        assert!(ctx.change_log().is_empty());
        assert!(!ctx.is_in_flight(&user));
    }

    #[test]
    fn resolve_requires_active() {
        let mut ctx = TransactionContext::new();
        assert!(ctx.resolve(TransactionOutcome::Committed).is_err());
        assert_eq!(ctx.state(), TransactionState::Idle);
    }

    #[test]
    fn in_flight_markers_are_deduplicated() {
        let mut ctx = TransactionContext::new();
        ctx.begin().unwrap();
        let user: Arc<dyn Entity> = Arc::new(User::new("alice"));
        ctx.mark_in_flight(user.clone());
        ctx.mark_in_flight(user.clone());
        assert_eq!(ctx.in_flight_count(), 1);
    }
}
