use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

use crate::observer::{restore, AfterCommitCallback, Entity, SnapshotError};
use crate::types::OperationKind;

/// Model using the explicit-save flag
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub email: Option<String>,
    #[serde(skip)]
    pub marked_for_save: bool,
}

impl User {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl Entity for User {
    fn will_be_saved(&self) -> Option<bool> {
        Some(self.marked_for_save)
    }

    fn reconstruct(&self, fields: &Map<String, Value>) -> Result<Arc<dyn Entity>, SnapshotError> {
        Ok(Arc::new(restore::<User>(fields)?))
    }
}

/// Plain entity with a transient field outside the persisted properties
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Comment {
    pub body: String,
    #[serde(skip)]
    pub rendered: Option<String>,
}

impl Comment {
    pub fn new(body: &str) -> Self {
        Self {
            body: body.to_string(),
            rendered: None,
        }
    }
}

impl Entity for Comment {
    fn reconstruct(&self, fields: &Map<String, Value>) -> Result<Arc<dyn Entity>, SnapshotError> {
        Ok(Arc::new(restore::<Comment>(fields)?))
    }
}

/// Entity without previous-state support
#[derive(Debug, Default)]
pub struct AuditEntry {
    pub message: String,
}

impl Entity for AuditEntry {}

type Call = (String, Vec<(OperationKind, i64)>);

/// Records every after-commit invocation as (callback, [(kind, id)])
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Recorder {
    pub fn after_commit(&self, name: &str) -> Arc<dyn AfterCommitCallback> {
        let calls = Arc::clone(&self.calls);
        let label = name.to_string();
        crate::observer::after_commit(name, move |operations| {
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
}

/// Engine-style parallel arrays from (name, current, previous) triples
pub fn flushed(fields: &[(&str, Value, Value)]) -> (Vec<String>, Vec<Value>, Vec<Value>) {
    let names = fields.iter().map(|(name, _, _)| name.to_string()).collect();
    let current = fields.iter().map(|(_, current, _)| current.clone()).collect();
    let previous = fields.iter().map(|(_, _, previous)| previous.clone()).collect();
    (names, current, previous)
}
