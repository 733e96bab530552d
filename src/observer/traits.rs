use serde_json::Value;
use std::sync::Arc;

use crate::observer::context::{TransactionContext, TransactionOutcome};
use crate::observer::entity::{CollectionRef, Entity};
use crate::observer::error::{BeginReport, DispatchReport, ObserverError};
use crate::observer::operation::OperationRecord;
use crate::types::EntityId;

/// Application procedure run synchronously right after a transaction begins
pub trait AfterBeginCallback: Send + Sync {
    /// Callback name for logging and reports
    fn name(&self) -> &str;

    fn execute(&self) -> anyhow::Result<()>;
}

/// Application procedure run after commit with the operations it declared
/// interest in, for one entity type. Records are read-only.
pub trait AfterCommitCallback: Send + Sync {
    /// Callback name for logging and reports
    fn name(&self) -> &str;

    fn execute(&self, operations: &[&OperationRecord]) -> anyhow::Result<()>;
}

/// Closure wrapper for after-begin callbacks
pub struct ClosureAfterBegin<F>
where
    F: Fn() -> anyhow::Result<()> + Send + Sync,
{
    name: String,
    closure: F,
}

impl<F> ClosureAfterBegin<F>
where
    F: Fn() -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, closure: F) -> Self {
        Self {
            name: name.into(),
            closure,
        }
    }
}

impl<F> AfterBeginCallback for ClosureAfterBegin<F>
where
    F: Fn() -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self) -> anyhow::Result<()> {
        (self.closure)()
    }
}

/// Closure wrapper for after-commit callbacks
pub struct ClosureAfterCommit<F>
where
    F: Fn(&[&OperationRecord]) -> anyhow::Result<()> + Send + Sync,
{
    name: String,
    closure: F,
}

impl<F> ClosureAfterCommit<F>
where
    F: Fn(&[&OperationRecord]) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, closure: F) -> Self {
        Self {
            name: name.into(),
            closure,
        }
    }
}

impl<F> AfterCommitCallback for ClosureAfterCommit<F>
where
    F: Fn(&[&OperationRecord]) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, operations: &[&OperationRecord]) -> anyhow::Result<()> {
        (self.closure)(operations)
    }
}

/// Helper function to create a shared closure after-begin callback
pub fn after_begin<F>(name: impl Into<String>, f: F) -> Arc<dyn AfterBeginCallback>
where
    F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(ClosureAfterBegin::new(name, f))
}

/// Helper function to create a shared closure after-commit callback
pub fn after_commit<F>(name: impl Into<String>, f: F) -> Arc<dyn AfterCommitCallback>
where
    F: Fn(&[&OperationRecord]) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(ClosureAfterCommit::new(name, f))
}

/// Property values of an entity being flushed, as parallel arrays
#[derive(Debug, Clone, Copy)]
pub struct FlushedState<'a> {
    pub property_names: &'a [String],
    pub current: &'a [Value],
    pub previous: &'a [Value],
}

/// Answer to the engine's dirty check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyCheck {
    /// Report no dirty properties; the entity is not flushed
    Clean,
    /// Use the engine's own dirty detection
    EngineDefault,
}

/// Hooks the persistence engine calls while driving one transaction.
///
/// Call order per transaction: `begin_transaction`, any number of observe
/// and collection hooks, then exactly one `end_transaction`. Every hook runs
/// synchronously on the caller's thread.
pub trait EntityInterceptor: Send + Sync {
    fn begin_transaction(&self, ctx: &mut TransactionContext) -> Result<BeginReport, ObserverError>;

    fn observe_insert(
        &self,
        _ctx: &mut TransactionContext,
        _entity: Arc<dyn Entity>,
        _id: Option<EntityId>,
    ) -> Result<(), ObserverError> {
        Ok(())
    }

    fn observe_update(
        &self,
        _ctx: &mut TransactionContext,
        _entity: Arc<dyn Entity>,
        _id: Option<EntityId>,
        _state: FlushedState<'_>,
    ) -> Result<(), ObserverError> {
        Ok(())
    }

    fn observe_delete(
        &self,
        _ctx: &mut TransactionContext,
        _entity: Arc<dyn Entity>,
        _id: Option<EntityId>,
    ) -> Result<(), ObserverError> {
        Ok(())
    }

    /// Whether an update of an owned collection may be persisted
    fn on_collection_update(&self, _ctx: &TransactionContext, _collection: &CollectionRef) -> bool {
        true
    }

    /// Whether a recreated owned collection may be persisted
    fn on_collection_recreate(&self, _ctx: &TransactionContext, _collection: &CollectionRef) -> bool {
        true
    }

    /// Whether removal of an owned collection may be persisted
    fn on_collection_remove(&self, _ctx: &TransactionContext, _collection: &CollectionRef) -> bool {
        true
    }

    fn find_dirty(&self, _entity: &dyn Entity) -> DirtyCheck {
        DirtyCheck::EngineDefault
    }

    fn end_transaction(
        &self,
        ctx: &mut TransactionContext,
        outcome: TransactionOutcome,
    ) -> Result<DispatchReport, ObserverError>;
}
