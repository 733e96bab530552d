// Callback registry: built once, read-only afterwards, replaced wholesale on reload

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::observer::entity::{Entity, EntityType};
use crate::observer::traits::{AfterBeginCallback, AfterCommitCallback};
use crate::types::OperationKind;

/// One after-commit declaration: a callback plus the operation kinds it wants
#[derive(Clone)]
pub struct AfterCommitEntry {
    callback: Arc<dyn AfterCommitCallback>,
    kinds: Vec<OperationKind>,
}

impl AfterCommitEntry {
    pub fn new(callback: Arc<dyn AfterCommitCallback>, kinds: &[OperationKind]) -> Self {
        let mut unique = Vec::with_capacity(kinds.len());
        for kind in kinds {
            if !unique.contains(kind) {
                unique.push(*kind);
            }
        }
        Self {
            callback,
            kinds: unique,
        }
    }

    pub fn callback(&self) -> &Arc<dyn AfterCommitCallback> {
        &self.callback
    }

    pub fn kinds(&self) -> &[OperationKind] {
        &self.kinds
    }

    pub fn interested_in(&self, kind: OperationKind) -> bool {
        self.kinds.contains(&kind)
    }
}

impl std::fmt::Debug for AfterCommitEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AfterCommitEntry")
            .field("callback", &self.callback.name())
            .field("kinds", &self.kinds)
            .finish()
    }
}

/// Index of declared transaction callbacks
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    after_commit: HashMap<EntityType, Vec<AfterCommitEntry>>,
    after_begin: Vec<Arc<dyn AfterBeginCallback>>,
}

impl CallbackRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a registry by scanning every module's declarations
    pub fn discover<'a, I>(modules: I) -> Self
    where
        I: IntoIterator<Item = &'a dyn CallbackModule>,
    {
        modules
            .into_iter()
            .fold(Self::builder(), |builder, module| builder.module(module))
            .build()
    }

    /// After-commit declarations for an entity type, in registration order
    pub fn callbacks_for(&self, entity_type: &EntityType) -> &[AfterCommitEntry] {
        self.after_commit
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// After-begin callbacks, in registration order
    pub fn after_begin_callbacks(&self) -> &[Arc<dyn AfterBeginCallback>] {
        &self.after_begin
    }

    /// Entity types with at least one after-commit declaration
    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.after_commit.keys()
    }

    /// Total number of declarations
    pub fn len(&self) -> usize {
        self.after_begin.len() + self.after_commit.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let after_begin: Vec<&str> = self.after_begin.iter().map(|c| c.name()).collect();
        f.debug_struct("CallbackRegistry")
            .field("after_commit", &self.after_commit)
            .field("after_begin", &after_begin)
            .finish()
    }
}

/// Explicit registration API for the callback registry
#[derive(Default)]
pub struct RegistryBuilder {
    after_commit: HashMap<EntityType, Vec<AfterCommitEntry>>,
    after_begin: Vec<Arc<dyn AfterBeginCallback>>,
}

impl RegistryBuilder {
    pub fn after_begin(mut self, callback: Arc<dyn AfterBeginCallback>) -> Self {
        tracing::debug!("Registered after-begin callback '{}'", callback.name());
        self.after_begin.push(callback);
        self
    }

    /// Register interest in `kinds` of operations on entity type `E`
    pub fn after_commit<E: Entity>(self, kinds: &[OperationKind], callback: Arc<dyn AfterCommitCallback>) -> Self {
        self.after_commit_for(EntityType::of::<E>(), kinds, callback)
    }

    /// Register interest in every operation kind on entity type `E`
    pub fn after_commit_all<E: Entity>(self, callback: Arc<dyn AfterCommitCallback>) -> Self {
        self.after_commit_for(EntityType::of::<E>(), &OperationKind::ALL, callback)
    }

    pub fn after_commit_for(
        mut self,
        entity_type: EntityType,
        kinds: &[OperationKind],
        callback: Arc<dyn AfterCommitCallback>,
    ) -> Self {
        tracing::debug!(
            "Registered after-commit callback '{}' for {} on {:?}",
            callback.name(),
            entity_type,
            kinds
        );
        self.after_commit
            .entry(entity_type)
            .or_default()
            .push(AfterCommitEntry::new(callback, kinds));
        self
    }

    /// Register every qualifying declaration of a module.
    ///
    /// A marker whose method has the wrong shape does not qualify and is
    /// skipped without error.
    pub fn module(mut self, module: &dyn CallbackModule) -> Self {
        let owner = module.owner();

        for method in module.methods() {
            let mut begin_registered = false;

            for marker in &method.markers {
                match (marker, &method.handler) {
                    (Marker::AfterTransactionBegin, Handler::NoArgs(callback)) => {
                        if !begin_registered {
                            begin_registered = true;
                            self = self.after_begin(callback.clone());
                        }
                    }
                    (Marker::PostTransaction { kinds }, Handler::Operations(callback)) => {
                        let kinds = kinds.as_deref().unwrap_or(&OperationKind::ALL);
                        self = self.after_commit_for(owner, kinds, callback.clone());
                    }
                    (marker, handler) => {
                        tracing::debug!(
                            "Skipping {}::{} - {:?} marker does not fit a {} handler",
                            owner,
                            handler.name(),
                            marker,
                            handler.shape()
                        );
                    }
                }
            }
        }

        self
    }

    pub fn build(self) -> CallbackRegistry {
        CallbackRegistry {
            after_commit: self.after_commit,
            after_begin: self.after_begin,
        }
    }
}

/// Declarative marker on a module method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    AfterTransactionBegin,
    /// `None` means every operation kind
    PostTransaction { kinds: Option<Vec<OperationKind>> },
}

/// Invocable shape of a declared method
#[derive(Clone)]
pub enum Handler {
    /// Takes no arguments
    NoArgs(Arc<dyn AfterBeginCallback>),
    /// Takes the ordered operations of one entity type
    Operations(Arc<dyn AfterCommitCallback>),
}

impl Handler {
    pub fn name(&self) -> &str {
        match self {
            Handler::NoArgs(callback) => callback.name(),
            Handler::Operations(callback) => callback.name(),
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Handler::NoArgs(_) => "zero-argument",
            Handler::Operations(_) => "operations",
        }
    }
}

/// A method of a module together with its markers
#[derive(Clone)]
pub struct MethodDeclaration {
    pub markers: Vec<Marker>,
    pub handler: Handler,
}

impl MethodDeclaration {
    pub fn new(handler: Handler) -> Self {
        Self {
            markers: Vec::new(),
            handler,
        }
    }

    pub fn marked(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    pub fn after_begin(callback: Arc<dyn AfterBeginCallback>) -> Self {
        Self::new(Handler::NoArgs(callback)).marked(Marker::AfterTransactionBegin)
    }

    pub fn post_transaction(callback: Arc<dyn AfterCommitCallback>, kinds: Option<&[OperationKind]>) -> Self {
        Self::new(Handler::Operations(callback)).marked(Marker::PostTransaction {
            kinds: kinds.map(<[OperationKind]>::to_vec),
        })
    }
}

/// Application code that declares transaction callbacks.
///
/// `owner` is the entity type the module's after-commit declarations are
/// grouped under.
pub trait CallbackModule: Send + Sync {
    fn owner(&self) -> EntityType;

    fn methods(&self) -> Vec<MethodDeclaration>;
}

struct Installed {
    registry: Arc<CallbackRegistry>,
    generation: u64,
}

/// Shared slot holding the current registry.
///
/// Readers take a reference-counted snapshot; `install` swaps in a whole new
/// registry, so a reader sees either the old or the new one, never a mix.
///
/// `current` takes the read lock only long enough to clone the `Arc`, so
/// lookups are not lock-free: a reader may briefly wait behind an `install`.
/// Lookups on the returned registry take no lock at all.
pub struct RegistryHandle {
    current: RwLock<Installed>,
}

impl RegistryHandle {
    pub fn new(registry: CallbackRegistry) -> Self {
        Self {
            current: RwLock::new(Installed {
                registry: Arc::new(registry),
                generation: 0,
            }),
        }
    }

    pub fn current(&self) -> Arc<CallbackRegistry> {
        let installed = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&installed.registry)
    }

    /// Replace the registry, returning the new generation
    pub fn install(&self, registry: CallbackRegistry) -> u64 {
        let registry = Arc::new(registry);
        let declarations = registry.len();

        let mut installed = self.current.write().unwrap_or_else(PoisonError::into_inner);
        installed.registry = registry;
        installed.generation += 1;

        tracing::info!(
            "Installed callback registry generation {} with {} declarations",
            installed.generation,
            declarations
        );
        installed.generation
    }

    pub fn generation(&self) -> u64 {
        self.current.read().unwrap_or_else(PoisonError::into_inner).generation
    }
}

impl Default for RegistryHandle {
    fn default() -> Self {
        Self::new(CallbackRegistry::empty())
    }
}

// Process-wide registry - empty until the application installs one
pub static REGISTRY: Lazy<Arc<RegistryHandle>> = Lazy::new(|| Arc::new(RegistryHandle::default()));

// Convenience function for accessing the process-wide registry
pub fn global_registry() -> Arc<RegistryHandle> {
    Arc::clone(&REGISTRY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::traits::{after_begin, after_commit};
    use crate::testing::{Comment, User};

    struct UserCallbacks;

    impl CallbackModule for UserCallbacks {
        fn owner(&self) -> EntityType {
            EntityType::of::<User>()
        }

        fn methods(&self) -> Vec<MethodDeclaration> {
            vec![
                MethodDeclaration::post_transaction(after_commit("on_user_change", |_| Ok(())), None),
                MethodDeclaration::post_transaction(
                    after_commit("on_user_update", |_| Ok(())),
                    Some(&[OperationKind::Update]),
                ),
                MethodDeclaration::after_begin(after_begin("reset_cache", || Ok(()))),
                // wrong shape: zero-argument method marked as post-transaction
                MethodDeclaration::new(Handler::NoArgs(after_begin("not_a_listener", || Ok(()))))
                    .marked(Marker::PostTransaction { kinds: None }),
                // wrong shape: operations method marked as after-begin
                MethodDeclaration::new(Handler::Operations(after_commit("not_a_hook", |_| Ok(()))))
                    .marked(Marker::AfterTransactionBegin),
            ]
        }
    }

    #[test]
    fn discovery_keeps_well_shaped_declarations() {
        let registry = CallbackRegistry::discover([&UserCallbacks as &dyn CallbackModule]);

        let entries = registry.callbacks_for(&EntityType::of::<User>());
        let names: Vec<&str> = entries.iter().map(|e| e.callback().name()).collect();
        assert_eq!(names, vec!["on_user_change", "on_user_update"]);
        assert_eq!(entries[0].kinds(), &OperationKind::ALL);
        assert_eq!(entries[1].kinds(), &[OperationKind::Update]);

        let begin: Vec<&str> = registry.after_begin_callbacks().iter().map(|c| c.name()).collect();
        assert_eq!(begin, vec!["reset_cache"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn repeated_markers_become_separate_entries() {
        struct Repeated;
        impl CallbackModule for Repeated {
            fn owner(&self) -> EntityType {
                EntityType::of::<Comment>()
            }
            fn methods(&self) -> Vec<MethodDeclaration> {
                vec![MethodDeclaration::new(Handler::Operations(after_commit("audit", |_| Ok(()))))
                    .marked(Marker::PostTransaction { kinds: Some(vec![OperationKind::Insert]) })
                    .marked(Marker::PostTransaction { kinds: Some(vec![OperationKind::Delete]) })]
            }
        }

        let registry = CallbackRegistry::discover([&Repeated as &dyn CallbackModule]);
        let entries = registry.callbacks_for(&EntityType::of::<Comment>());
        assert_eq!(entries.len(), 2);
        assert!(Arc::ptr_eq(entries[0].callback(), entries[1].callback()));
    }

    #[test]
    fn lookup_for_unknown_type_is_empty() {
        let registry = CallbackRegistry::builder()
            .after_commit_all::<User>(after_commit("any", |_| Ok(())))
            .build();
        assert!(registry.callbacks_for(&EntityType::of::<Comment>()).is_empty());
        assert_eq!(registry.entity_types().count(), 1);
    }

    #[test]
    fn entry_kinds_are_deduplicated() {
        let entry = AfterCommitEntry::new(
            after_commit("x", |_| Ok(())),
            &[OperationKind::Update, OperationKind::Update, OperationKind::Delete],
        );
        assert_eq!(entry.kinds(), &[OperationKind::Update, OperationKind::Delete]);
        assert!(!entry.interested_in(OperationKind::Insert));
    }

    #[test]
    fn install_swaps_whole_registry() {
        let handle = RegistryHandle::default();
        let before = handle.current();
        assert!(before.is_empty());

        let generation = handle.install(
            CallbackRegistry::builder()
                .after_begin(after_begin("warm", || Ok(())))
                .build(),
        );

        assert_eq!(generation, 1);
        assert_eq!(handle.generation(), 1);
        assert!(before.is_empty());
        assert_eq!(handle.current().after_begin_callbacks().len(), 1);
    }
}
