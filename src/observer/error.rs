use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::observer::context::{TransactionOutcome, TransactionState};
use crate::observer::entity::EntityType;
use crate::observer::snapshot::SnapshotError;

/// Observer errors surfaced to the persistence engine integration
#[derive(Debug, Error, Clone)]
pub enum ObserverError {
    #[error("Invalid transaction state: {hook} called while {state:?}")]
    InvalidState {
        hook: &'static str,
        state: TransactionState,
    },

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Failure of a single application callback; never propagated past dispatch
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CallbackError {
    #[error("Callback {callback} failed: {message}")]
    Failed { callback: String, message: String },

    #[error("Callback {callback} panicked: {message}")]
    Panicked { callback: String, message: String },
}

/// Outcome of one callback invocation
#[derive(Debug, Clone)]
pub struct CallbackInvocation {
    pub callback: String,
    /// Entity type the operations belonged to (None for after-begin)
    pub entity_type: Option<EntityType>,
    pub operations: usize,
    pub result: Result<(), CallbackError>,
    pub execution_time: Duration,
}

impl CallbackInvocation {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Results from running after-begin callbacks
#[derive(Debug, Clone)]
pub struct BeginReport {
    pub transaction_id: Uuid,
    pub invocations: Vec<CallbackInvocation>,
    pub execution_time: Duration,
}

impl BeginReport {
    pub fn failures(&self) -> impl Iterator<Item = &CallbackError> {
        self.invocations.iter().filter_map(|i| i.result.as_ref().err())
    }
}

/// Results from ending a transaction
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub transaction_id: Uuid,
    pub outcome: TransactionOutcome,
    /// Whether after-commit dispatch ran at all
    pub dispatched: bool,
    /// Operations in the change log when the transaction ended
    pub operations: usize,
    /// Entity types in dispatch order
    pub groups: Vec<EntityType>,
    pub invocations: Vec<CallbackInvocation>,
    pub execution_time: Duration,
}

impl DispatchReport {
    pub(crate) fn skipped(transaction_id: Uuid, outcome: TransactionOutcome, operations: usize) -> Self {
        Self {
            transaction_id,
            outcome,
            dispatched: false,
            operations,
            groups: Vec::new(),
            invocations: Vec::new(),
            execution_time: Duration::ZERO,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &CallbackError> {
        self.invocations.iter().filter_map(|i| i.result.as_ref().err())
    }

    pub fn success(&self) -> bool {
        self.invocations.iter().all(CallbackInvocation::succeeded)
    }
}
