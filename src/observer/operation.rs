use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::observer::entity::{Entity, EntityType};
use crate::observer::snapshot::EntitySnapshot;
use crate::types::{EntityId, OperationKind};

/// Information about a specific field change on an update
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
}

/// Fields whose previous and current flushed values differ
pub fn field_changes(names: &[String], current: &[Value], previous: &[Value]) -> Vec<FieldChange> {
    names
        .iter()
        .zip(current.iter().zip(previous.iter()))
        .filter(|(_, (new_value, old_value))| new_value != old_value)
        .map(|(field, (new_value, old_value))| FieldChange {
            field: field.clone(),
            old_value: old_value.clone(),
            new_value: new_value.clone(),
        })
        .collect()
}

/// State of an entity before the observed operation
#[derive(Debug, Clone)]
pub enum PreviousState {
    /// Deleted entity; its in-memory instance still holds the prior state
    Entity(Arc<dyn Entity>),
    /// Best-effort reconstruction for an update
    Snapshot(EntitySnapshot),
}

impl PreviousState {
    pub fn entity(&self) -> &Arc<dyn Entity> {
        match self {
            PreviousState::Entity(entity) => entity,
            PreviousState::Snapshot(snapshot) => snapshot.entity(),
        }
    }

    pub fn snapshot(&self) -> Option<&EntitySnapshot> {
        match self {
            PreviousState::Snapshot(snapshot) => Some(snapshot),
            PreviousState::Entity(_) => None,
        }
    }
}

/// One entity mutation observed during a transaction.
///
/// Immutable after construction. Inserts carry only the current state,
/// deletes only the previous state; updates carry the current state and,
/// when reconstruction succeeded, a previous-state snapshot.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    kind: OperationKind,
    entity_type: EntityType,
    id: Option<EntityId>,
    current: Option<Arc<dyn Entity>>,
    previous: Option<PreviousState>,
    changes: Vec<FieldChange>,
    observed_at: DateTime<Utc>,
}

impl OperationRecord {
    pub fn insert(entity: Arc<dyn Entity>, id: Option<EntityId>) -> Self {
        Self {
            kind: OperationKind::Insert,
            entity_type: entity.entity_type(),
            id,
            current: Some(entity),
            previous: None,
            changes: Vec::new(),
            observed_at: Utc::now(),
        }
    }

    pub fn update(
        entity: Arc<dyn Entity>,
        id: Option<EntityId>,
        previous: Option<EntitySnapshot>,
        changes: Vec<FieldChange>,
    ) -> Self {
        Self {
            kind: OperationKind::Update,
            entity_type: entity.entity_type(),
            id,
            current: Some(entity),
            previous: previous.map(PreviousState::Snapshot),
            changes,
            observed_at: Utc::now(),
        }
    }

    pub fn delete(entity: Arc<dyn Entity>, id: Option<EntityId>) -> Self {
        Self {
            kind: OperationKind::Delete,
            entity_type: entity.entity_type(),
            id,
            current: None,
            previous: Some(PreviousState::Entity(entity)),
            changes: Vec::new(),
            observed_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    pub fn current_state(&self) -> Option<&Arc<dyn Entity>> {
        self.current.as_ref()
    }

    pub fn previous_state(&self) -> Option<&PreviousState> {
        self.previous.as_ref()
    }

    /// Current state downcast to its concrete type
    pub fn current<T: Entity>(&self) -> Option<&T> {
        self.current.as_ref().and_then(|entity| entity.downcast_ref::<T>())
    }

    /// Previous state (deleted entity or snapshot) downcast to its concrete type
    pub fn previous<T: Entity>(&self) -> Option<&T> {
        self.previous
            .as_ref()
            .and_then(|state| state.entity().downcast_ref::<T>())
    }

    /// Field-level changes; empty for inserts and deletes
    pub fn changes(&self) -> &[FieldChange] {
        &self.changes
    }

    pub fn changed(&self, field: &str) -> bool {
        self.changes.iter().any(|change| change.field == field)
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}
