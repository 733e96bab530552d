// Thread-confined transaction state for hosts whose hooks cannot carry a
// context value. A transaction must then begin and end on the same thread;
// hosts that move transactions between threads should pass an explicit
// `TransactionContext` to `TransactionObserver` instead.
//
// The thread-local cell is not borrowed while callbacks or
// `Entity::reconstruct` run, so they may call back into the observer. The
// collection guard holds a shared borrow while it asks
// `Entity::will_be_saved`; from there only `state` and `pending_operations`
// may be called.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Instant;

use crate::observer::context::{TransactionContext, TransactionOutcome, TransactionState};
use crate::observer::entity::{CollectionRef, Entity};
use crate::observer::error::{BeginReport, DispatchReport, ObserverError};
use crate::observer::pipeline::TransactionObserver;
use crate::observer::traits::{DirtyCheck, EntityInterceptor, FlushedState};
use crate::types::EntityId;

thread_local! {
    static CONTEXT: RefCell<TransactionContext> = RefCell::new(TransactionContext::new());
}

fn with_context<R>(f: impl FnOnce(&mut TransactionContext) -> R) -> R {
    CONTEXT.with(|cell| f(&mut cell.borrow_mut()))
}

fn with_context_ref<R>(f: impl FnOnce(&TransactionContext) -> R) -> R {
    CONTEXT.with(|cell| f(&cell.borrow()))
}

/// Run `f` on this thread's context while the thread-local slot holds a
/// fresh one, so callbacks invoked by `f` can drive their own transactions
fn with_detached_context<R>(f: impl FnOnce(&mut TransactionContext) -> R) -> R {
    let mut ctx = CONTEXT.with(|cell| cell.replace(TransactionContext::new()));
    let result = f(&mut ctx);
    CONTEXT.with(|cell| *cell.borrow_mut() = ctx);
    result
}

/// `TransactionObserver` with one implicit context per OS thread
pub struct ThreadScopedObserver {
    observer: Arc<TransactionObserver>,
}

impl ThreadScopedObserver {
    pub fn new(observer: Arc<TransactionObserver>) -> Self {
        Self { observer }
    }

    pub fn observer(&self) -> &Arc<TransactionObserver> {
        &self.observer
    }

    /// Begin this thread's transaction, then run the after-begin callbacks
    /// against it; writes they observe join the transaction
    pub fn begin_transaction(&self) -> Result<BeginReport, ObserverError> {
        let start_time = Instant::now();
        let transaction_id = with_context(|ctx| self.observer.open(ctx))?;
        Ok(self.observer.run_after_begin(transaction_id, start_time))
    }

    pub fn observe_insert(&self, entity: Arc<dyn Entity>, id: Option<EntityId>) -> Result<(), ObserverError> {
        with_context(|ctx| self.observer.observe_insert(ctx, entity, id))
    }

    pub fn observe_update(
        &self,
        entity: Arc<dyn Entity>,
        id: Option<EntityId>,
        state: FlushedState<'_>,
    ) -> Result<(), ObserverError> {
        with_context_ref(|ctx| ctx.ensure_active("observe_update"))?;
        let record = self.observer.update_record(entity, id, state)?;
        with_context(|ctx| {
            ctx.ensure_active("observe_update")?;
            ctx.record(record);
            Ok(())
        })
    }

    pub fn observe_delete(&self, entity: Arc<dyn Entity>, id: Option<EntityId>) -> Result<(), ObserverError> {
        with_context(|ctx| self.observer.observe_delete(ctx, entity, id))
    }

    pub fn on_collection_update(&self, collection: &CollectionRef) -> bool {
        with_context_ref(|ctx| self.observer.on_collection_update(ctx, collection))
    }

    pub fn on_collection_recreate(&self, collection: &CollectionRef) -> bool {
        with_context_ref(|ctx| self.observer.on_collection_recreate(ctx, collection))
    }

    pub fn on_collection_remove(&self, collection: &CollectionRef) -> bool {
        with_context_ref(|ctx| self.observer.on_collection_remove(ctx, collection))
    }

    pub fn find_dirty(&self, entity: &dyn Entity) -> DirtyCheck {
        self.observer.find_dirty(entity)
    }

    pub fn end_transaction(&self, outcome: TransactionOutcome) -> Result<DispatchReport, ObserverError> {
        with_detached_context(|ctx| self.observer.end_transaction(ctx, outcome))
    }

    /// State of this thread's transaction
    pub fn state(&self) -> TransactionState {
        with_context_ref(|ctx| ctx.state())
    }

    /// Operations recorded so far by this thread's transaction
    pub fn pending_operations(&self) -> usize {
        with_context_ref(|ctx| ctx.change_log().len())
    }
}
