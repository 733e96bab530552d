// Previous-state reconstruction for flushed updates
//
// The engine reports an update as parallel arrays of property names and
// their previous values. A snapshot is a fresh instance of the entity's type
// with those properties overwritten. Anything outside the engine's property
// list (serde-skipped transient fields, lazily resolved relations) keeps its
// `Default` value and is NOT historical; `EntitySnapshot::fields` is the
// authoritative part.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::observer::entity::Entity;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("Entity type {entity} does not support previous-state reconstruction")]
    Unsupported { entity: &'static str },

    #[error("Could not instantiate {entity}: {reason}")]
    Instantiate { entity: &'static str, reason: String },

    #[error("Field '{field}' not found on {entity}")]
    FieldNotFound { entity: &'static str, field: String },

    #[error("Fields could not be set on {entity}: {reason}")]
    FieldNotSettable { entity: &'static str, reason: String },

    #[error("Property arrays disagree: {names} names, {values} values")]
    LengthMismatch { names: usize, values: usize },

    #[error("Reconstruction of {expected} produced a {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Pair the engine's parallel name/value arrays into a field map
pub fn collect_fields(names: &[String], values: &[Value]) -> Result<Map<String, Value>, SnapshotError> {
    if names.len() != values.len() {
        return Err(SnapshotError::LengthMismatch {
            names: names.len(),
            values: values.len(),
        });
    }

    Ok(names.iter().cloned().zip(values.iter().cloned()).collect())
}

/// Build a `T` from its default with the given fields overwritten.
///
/// Every field name must already exist in `T`'s serialized form; unknown
/// names fail with `FieldNotFound` instead of being ignored.
pub fn restore<T>(fields: &Map<String, Value>) -> Result<T, SnapshotError>
where
    T: Default + Serialize + DeserializeOwned,
{
    let entity = std::any::type_name::<T>();

    let mut base = serde_json::to_value(T::default()).map_err(|e| SnapshotError::Instantiate {
        entity,
        reason: e.to_string(),
    })?;

    let object = match base.as_object_mut() {
        Some(object) => object,
        None => {
            return Err(SnapshotError::Instantiate {
                entity,
                reason: "default value does not serialize to an object".to_string(),
            })
        }
    };

    for (field, value) in fields {
        match object.get_mut(field) {
            Some(slot) => *slot = value.clone(),
            None => {
                return Err(SnapshotError::FieldNotFound {
                    entity,
                    field: field.clone(),
                })
            }
        }
    }

    serde_json::from_value(base).map_err(|e| SnapshotError::FieldNotSettable {
        entity,
        reason: e.to_string(),
    })
}

/// Reconstructed pre-update state of an entity
#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    entity: Arc<dyn Entity>,
    fields: Map<String, Value>,
}

impl EntitySnapshot {
    /// Typed instance; only `fields` were restored, the rest are defaults
    pub fn entity(&self) -> &Arc<dyn Entity> {
        &self.entity
    }

    /// Field values restored from the engine's previous state
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Whether a field carries a historical value rather than a default
    pub fn is_restored(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

/// Materialize the previous state of `entity` from flushed property values
pub fn reconstruct_previous(
    entity: &dyn Entity,
    names: &[String],
    previous: &[Value],
) -> Result<EntitySnapshot, SnapshotError> {
    let fields = collect_fields(names, previous)?;
    let restored = entity.reconstruct(&fields)?;

    let expected = entity.entity_type();
    let actual = restored.entity_type();
    if expected != actual {
        return Err(SnapshotError::TypeMismatch {
            expected: expected.name(),
            actual: actual.name(),
        });
    }

    Ok(EntitySnapshot {
        entity: restored,
        fields,
    })
}
