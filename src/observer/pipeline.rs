// Transaction observer: records entity operations per transaction and
// dispatches them to declared callbacks once the transaction commits

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::ObserverConfig;
use crate::observer::context::{ResolvedTransaction, TransactionContext, TransactionOutcome};
use crate::observer::entity::{CollectionRef, Entity, EntityType};
use crate::observer::error::{BeginReport, CallbackError, CallbackInvocation, DispatchReport, ObserverError};
use crate::observer::operation::{field_changes, OperationRecord};
use crate::observer::registry::{global_registry, RegistryHandle};
use crate::observer::snapshot::reconstruct_previous;
use crate::observer::traits::{DirtyCheck, EntityInterceptor, FlushedState};
use crate::types::{EntityId, OperationKind};

/// The persistence-engine interceptor.
///
/// Holds no per-transaction state itself; all of it lives in the
/// `TransactionContext` the engine passes to each hook, so one observer can
/// serve any number of concurrent transactions.
pub struct TransactionObserver {
    registry: Arc<RegistryHandle>,
    config: ObserverConfig,
}

impl TransactionObserver {
    /// Observer over `registry` using the process-wide configuration
    pub fn new(registry: Arc<RegistryHandle>) -> Self {
        Self::with_config(registry, crate::config::config().clone())
    }

    pub fn with_config(registry: Arc<RegistryHandle>, config: ObserverConfig) -> Self {
        Self { registry, config }
    }

    /// Observer over the process-wide registry and configuration
    pub fn global() -> Self {
        Self::new(global_registry())
    }

    pub fn registry(&self) -> &Arc<RegistryHandle> {
        &self.registry
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    /// Move `ctx` from Idle to Active without running any callbacks
    pub(crate) fn open(&self, ctx: &mut TransactionContext) -> Result<Uuid, ObserverError> {
        let transaction_id = ctx.begin()?;
        tracing::debug!("Transaction {} begun", transaction_id);
        Ok(transaction_id)
    }

    /// Run the after-begin callbacks of an already active transaction.
    ///
    /// Takes no context so a caller holding one behind a cell can release it
    /// first; callbacks may then observe writes into the same transaction.
    pub(crate) fn run_after_begin(&self, transaction_id: Uuid, start_time: Instant) -> BeginReport {
        let registry = self.registry.current();
        let callbacks = registry.after_begin_callbacks();

        tracing::debug!(
            "Transaction {}: running {} after-begin callbacks",
            transaction_id,
            callbacks.len()
        );

        let invocations = callbacks
            .iter()
            .map(|callback| self.invoke(callback.name(), None, 0, || callback.execute()))
            .collect();

        BeginReport {
            transaction_id,
            invocations,
            execution_time: start_time.elapsed(),
        }
    }

    /// Build the record for a flushed update, reconstructing its previous
    /// state if configured. Calls into `Entity::reconstruct`.
    pub(crate) fn update_record(
        &self,
        entity: Arc<dyn Entity>,
        id: Option<EntityId>,
        state: FlushedState<'_>,
    ) -> Result<OperationRecord, ObserverError> {
        tracing::trace!("Observed update of {} {:?}", entity.entity_type(), id);

        let changes = field_changes(state.property_names, state.current, state.previous);

        let previous = if self.config.snapshot.reconstruct_previous {
            match reconstruct_previous(&*entity, state.property_names, state.previous) {
                Ok(snapshot) => Some(snapshot),
                Err(error) if self.config.snapshot.strict => {
                    tracing::warn!(
                        "Rejecting update of {} {:?}: previous state could not be reconstructed: {}",
                        entity.entity_type(),
                        id,
                        error
                    );
                    return Err(ObserverError::Snapshot(error));
                }
                Err(error) => {
                    tracing::warn!(
                        "Previous state of {} {:?} could not be reconstructed, recording update without it: {}",
                        entity.entity_type(),
                        id,
                        error
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(OperationRecord::update(entity, id, previous, changes))
    }

    /// Collection guard shared by the three collection hooks.
    ///
    /// Permits the write when the owner is flagged for save or is itself
    /// being saved in this transaction (identity match against the in-flight
    /// markers). A flagged entity elsewhere in the transaction does NOT
    /// cascade to collections of unflagged owners that are not in flight.
    fn permit_collection_write(&self, ctx: &TransactionContext, collection: &CollectionRef, hook: &'static str) -> bool {
        let owner = match collection.owner() {
            Some(owner) => owner,
            None => {
                tracing::warn!(
                    "{}: collection '{}' reported without an owner, deferring to engine default",
                    hook,
                    collection.role()
                );
                return true;
            }
        };

        let will_be_saved = match owner.will_be_saved() {
            Some(flag) => flag,
            None => return true,
        };

        let permitted = will_be_saved || ctx.is_in_flight(owner);
        if !permitted {
            tracing::debug!(
                "{}: suppressing write of {}.{} - owner neither in flight nor flagged for save",
                hook,
                owner.entity_type(),
                collection.role()
            );
        }
        permitted
    }

    /// Dispatch a committed change log to matching after-commit callbacks
    fn dispatch(&self, resolved: &ResolvedTransaction<'_>) -> DispatchReport {
        let start_time = Instant::now();
        let change_log = resolved.change_log();
        let registry = self.registry.current();
        let groups = change_log.group_by_entity_type();

        tracing::info!(
            "Dispatching transaction {}: {} operations across {} entity types",
            resolved.transaction_id(),
            change_log.len(),
            groups.len()
        );

        let mut invocations = Vec::new();

        for group in &groups {
            let entries = registry.callbacks_for(&group.entity_type);
            if entries.is_empty() {
                tracing::trace!("No after-commit callbacks registered for {}", group.entity_type);
                continue;
            }

            tracing::debug!(
                "Dispatching {} {} operations to {} declarations",
                group.operations.len(),
                group.entity_type,
                entries.len()
            );

            for entry in entries {
                let callback = entry.callback();

                if entry.kinds().is_empty() {
                    tracing::debug!(
                        "Callback {} declares interest in no operation kinds - skipped",
                        callback.name()
                    );
                    continue;
                }

                let operations: Vec<&OperationRecord> = group
                    .operations
                    .iter()
                    .copied()
                    .filter(|op| entry.interested_in(op.kind()))
                    .collect();

                if operations.is_empty() {
                    tracing::trace!(
                        "Callback {} skipped - no {:?} operations on {}",
                        callback.name(),
                        entry.kinds(),
                        group.entity_type
                    );
                    continue;
                }

                if self.config.dispatch.log_payloads {
                    tracing::debug!(
                        "Callback {} receives {}",
                        callback.name(),
                        describe_operations(&operations)
                    );
                }

                invocations.push(self.invoke(callback.name(), Some(group.entity_type), operations.len(), || {
                    callback.execute(&operations)
                }));
            }
        }

        let execution_time = start_time.elapsed();
        let failures = invocations.iter().filter(|i| !i.succeeded()).count();

        tracing::info!(
            "Transaction {} dispatch finished in {:?}: {} callbacks invoked, {} failed",
            resolved.transaction_id(),
            execution_time,
            invocations.len(),
            failures
        );

        DispatchReport {
            transaction_id: resolved.transaction_id(),
            outcome: resolved.outcome(),
            dispatched: true,
            operations: change_log.len(),
            groups: groups.iter().map(|g| g.entity_type).collect(),
            invocations,
            execution_time,
        }
    }

    /// Run one callback, capturing failure or panic instead of propagating it
    fn invoke<F>(&self, name: &str, entity_type: Option<EntityType>, operations: usize, f: F) -> CallbackInvocation
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let callback_start = Instant::now();

        let result = if self.config.dispatch.catch_panics {
            match catch_unwind(AssertUnwindSafe(f)) {
                Ok(result) => result.map_err(|e| failed(name, &e)),
                Err(payload) => Err(CallbackError::Panicked {
                    callback: name.to_string(),
                    message: panic_message(&*payload),
                }),
            }
        } else {
            f().map_err(|e| failed(name, &e))
        };

        let execution_time = callback_start.elapsed();

        match &result {
            Ok(()) => {
                tracing::debug!("Callback: {} completed successfully in {:?}", name, execution_time);
            }
            Err(error @ CallbackError::Failed { .. }) => {
                tracing::warn!("Callback: {} failed in {:?}: {}", name, execution_time, error);
            }
            Err(error @ CallbackError::Panicked { .. }) => {
                tracing::error!("Callback: {} panicked in {:?}: {}", name, execution_time, error);
            }
        }

        let threshold = Duration::from_millis(self.config.dispatch.slow_callback_ms);
        if execution_time > threshold {
            tracing::warn!(
                "Callback: {} took {:?}, over the {:?} slow-callback threshold",
                name,
                execution_time,
                threshold
            );
        }

        CallbackInvocation {
            callback: name.to_string(),
            entity_type,
            operations,
            result,
            execution_time,
        }
    }
}

impl EntityInterceptor for TransactionObserver {
    /// Start a transaction and run every after-begin callback in order
    fn begin_transaction(&self, ctx: &mut TransactionContext) -> Result<BeginReport, ObserverError> {
        let start_time = Instant::now();
        let transaction_id = self.open(ctx)?;
        Ok(self.run_after_begin(transaction_id, start_time))
    }

    fn observe_insert(
        &self,
        ctx: &mut TransactionContext,
        entity: Arc<dyn Entity>,
        id: Option<EntityId>,
    ) -> Result<(), ObserverError> {
        ctx.ensure_active("observe_insert")?;

        tracing::trace!("Observed insert of {} {:?}", entity.entity_type(), id);

        ctx.mark_in_flight(Arc::clone(&entity));
        ctx.record(OperationRecord::insert(entity, id));
        Ok(())
    }

    fn observe_update(
        &self,
        ctx: &mut TransactionContext,
        entity: Arc<dyn Entity>,
        id: Option<EntityId>,
        state: FlushedState<'_>,
    ) -> Result<(), ObserverError> {
        ctx.ensure_active("observe_update")?;
        let record = self.update_record(entity, id, state)?;
        ctx.record(record);
        Ok(())
    }

    fn observe_delete(
        &self,
        ctx: &mut TransactionContext,
        entity: Arc<dyn Entity>,
        id: Option<EntityId>,
    ) -> Result<(), ObserverError> {
        ctx.ensure_active("observe_delete")?;

        tracing::trace!("Observed delete of {} {:?}", entity.entity_type(), id);

        ctx.record(OperationRecord::delete(entity, id));
        Ok(())
    }

    fn on_collection_update(&self, ctx: &TransactionContext, collection: &CollectionRef) -> bool {
        self.permit_collection_write(ctx, collection, "on_collection_update")
    }

    fn on_collection_recreate(&self, ctx: &TransactionContext, collection: &CollectionRef) -> bool {
        self.permit_collection_write(ctx, collection, "on_collection_recreate")
    }

    fn on_collection_remove(&self, ctx: &TransactionContext, collection: &CollectionRef) -> bool {
        self.permit_collection_write(ctx, collection, "on_collection_remove")
    }

    /// Entities loaded without an explicit save request report nothing dirty
    fn find_dirty(&self, entity: &dyn Entity) -> DirtyCheck {
        match entity.will_be_saved() {
            Some(false) => DirtyCheck::Clean,
            _ => DirtyCheck::EngineDefault,
        }
    }

    /// Resolve the transaction and, on commit, dispatch its change log.
    ///
    /// The context is cleared and back to `Idle` afterwards whatever the
    /// outcome; callback failures are reported, never returned as errors.
    fn end_transaction(
        &self,
        ctx: &mut TransactionContext,
        outcome: TransactionOutcome,
    ) -> Result<DispatchReport, ObserverError> {
        let resolved = ctx.resolve(outcome)?;
        let operations = resolved.change_log().len();

        let report = match outcome {
            TransactionOutcome::Committed if operations > 0 => self.dispatch(&resolved),
            TransactionOutcome::Committed => {
                tracing::debug!("Transaction {} committed with no operations", resolved.transaction_id());
                DispatchReport::skipped(resolved.transaction_id(), outcome, operations)
            }
            TransactionOutcome::RolledBack => {
                tracing::debug!(
                    "Transaction {} rolled back, discarding {} operations",
                    resolved.transaction_id(),
                    operations
                );
                DispatchReport::skipped(resolved.transaction_id(), outcome, operations)
            }
        };

        Ok(report)
    }
}

fn failed(name: &str, error: &anyhow::Error) -> CallbackError {
    CallbackError::Failed {
        callback: name.to_string(),
        message: format!("{:#}", error),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn describe_operations(operations: &[&OperationRecord]) -> String {
    operations
        .iter()
        .map(|op| match op.id() {
            Some(id) => format!("{}({})", op.kind(), id),
            None => op.kind().to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
