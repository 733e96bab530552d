#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use monk_tx_hooks::config::ObserverConfig;
use monk_tx_hooks::observer::{
    after_commit, restore, AfterCommitCallback, CallbackRegistry, Entity, FlushedState, RegistryHandle,
    SnapshotError, TransactionObserver,
};
use monk_tx_hooks::types::OperationKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shop order with the explicit-save flag
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    pub reference: String,
    pub total_cents: i64,
    pub status: String,
    #[serde(skip)]
    pub save_requested: bool,
}

impl Order {
    pub fn new(reference: &str, total_cents: i64) -> Self {
        Self {
            reference: reference.to_string(),
            total_cents,
            status: "open".to_string(),
            save_requested: false,
        }
    }

    pub fn requested(mut self) -> Self {
        self.save_requested = true;
        self
    }
}

impl Entity for Order {
    fn will_be_saved(&self) -> Option<bool> {
        Some(self.save_requested)
    }

    fn reconstruct(&self, fields: &Map<String, Value>) -> Result<Arc<dyn Entity>, SnapshotError> {
        Ok(Arc::new(restore::<Order>(fields)?))
    }
}

/// Line item without the explicit-save flag
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(sku: &str, quantity: u32) -> Self {
        Self {
            sku: sku.to_string(),
            quantity,
        }
    }
}

impl Entity for LineItem {
    fn reconstruct(&self, fields: &Map<String, Value>) -> Result<Arc<dyn Entity>, SnapshotError> {
        Ok(Arc::new(restore::<LineItem>(fields)?))
    }
}

/// Entity type with no registered callbacks and no snapshot support
#[derive(Debug, Default)]
pub struct Shipment {
    pub carrier: String,
}

impl Entity for Shipment {}

pub type Call = (String, Vec<(OperationKind, i64)>);

/// Collects after-commit invocations in the order they happen
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn callback(&self, name: &str) -> Arc<dyn AfterCommitCallback> {
        let calls = Arc::clone(&self.calls);
        let label = name.to_string();
        after_commit(name, move |operations| {
            let seen = operations
                .iter()
                .map(|op| (op.kind(), op.id().and_then(|id| id.as_i64()).unwrap_or(-1)))
                .collect();
            calls.lock().unwrap().push((label.clone(), seen));
            Ok(())
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(name, _)| name).collect()
    }
}

pub fn observer(registry: CallbackRegistry) -> TransactionObserver {
    observer_with(registry, ObserverConfig::development())
}

pub fn observer_with(registry: CallbackRegistry, config: ObserverConfig) -> TransactionObserver {
    let _ = monk_tx_hooks::logging::init_tracing_with("monk_tx_hooks=debug");
    TransactionObserver::with_config(Arc::new(RegistryHandle::new(registry)), config)
}

/// Owned parallel arrays for a flush, borrowed as `FlushedState`
pub struct Flush {
    names: Vec<String>,
    current: Vec<Value>,
    previous: Vec<Value>,
}

impl Flush {
    pub fn of(fields: &[(&str, Value, Value)]) -> Self {
        Self {
            names: fields.iter().map(|(name, _, _)| name.to_string()).collect(),
            current: fields.iter().map(|(_, current, _)| current.clone()).collect(),
            previous: fields.iter().map(|(_, _, previous)| previous.clone()).collect(),
        }
    }

    pub fn state(&self) -> FlushedState<'_> {
        FlushedState {
            property_names: &self.names,
            current: &self.current,
            previous: &self.previous,
        }
    }
}
