use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::observer::snapshot::SnapshotError;

/// Runtime identity of an entity type, used as the grouping key for dispatch
/// and the lookup key for after-commit callbacks
#[derive(Clone, Copy)]
pub struct EntityType {
    id: TypeId,
    name: &'static str,
}

impl EntityType {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name, for log lines
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EntityType {}

impl Hash for EntityType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Upcast helper so `dyn Entity` can be downcast to its concrete type
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A persistent domain object as seen by the transaction observer.
///
/// Only `Debug` is required of application types; the remaining methods have
/// defaults. Implement `will_be_saved` for types that use the explicit-save
/// model, and `reconstruct` (usually via [`crate::observer::snapshot::restore`])
/// for types that should carry a previous-state snapshot on update.
pub trait Entity: AsAny + Send + Sync + fmt::Debug {
    /// Grouping key. Proxy types should report the type they stand in for.
    fn entity_type(&self) -> EntityType {
        EntityType::of::<Self>()
    }

    /// Explicit "will be persisted" flag.
    ///
    /// `None` means the type does not take part in the explicit-save model
    /// and the engine's own dirty detection applies unchanged.
    fn will_be_saved(&self) -> Option<bool> {
        None
    }

    /// Build a new instance of the same type with the given fields set.
    fn reconstruct(&self, _fields: &Map<String, Value>) -> Result<Arc<dyn Entity>, SnapshotError> {
        Err(SnapshotError::Unsupported {
            entity: self.entity_type().name(),
        })
    }
}

impl dyn Entity {
    pub fn is<T: Entity>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Entity>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Identity comparison of two shared entity handles (same allocation)
pub fn same_entity(a: &Arc<dyn Entity>, b: &Arc<dyn Entity>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// An owned collection as reported by the persistence engine
#[derive(Debug, Clone)]
pub struct CollectionRef {
    owner: Option<Arc<dyn Entity>>,
    role: String,
}

impl CollectionRef {
    pub fn owned_by(owner: Arc<dyn Entity>, role: impl Into<String>) -> Self {
        Self {
            owner: Some(owner),
            role: role.into(),
        }
    }

    /// Collection whose owner the engine could not report
    pub fn unowned(role: impl Into<String>) -> Self {
        Self {
            owner: None,
            role: role.into(),
        }
    }

    pub fn owner(&self) -> Option<&Arc<dyn Entity>> {
        self.owner.as_ref()
    }

    pub fn role(&self) -> &str {
        &self.role
    }
}
