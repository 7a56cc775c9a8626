//! Record type registry used to rebuild records from the transaction log.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use durabletx_common::RecordType;
use durabletx_participant::ResourceDirectory;
use durabletx_store::ObjectStore;

use crate::record::{AbstractRecord, LastResourceRecord, PersistenceRecord, TwoPhaseRecord};

/// Builds an empty record of one kind, to be filled by `restore_state`.
pub type RecordFactory = Arc<dyn Fn() -> Box<dyn AbstractRecord> + Send + Sync>;

/// Maps record type tags to factories.
///
/// Only records that save state need a factory. A log entry whose tag has no
/// factory is restored as an unreadable placeholder and the transaction is
/// reported as a heuristic hazard.
#[derive(Default)]
pub struct RecordTypeRegistry {
    factories: DashMap<RecordType, RecordFactory>,
}

impl RecordTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with factories for the built-in record kinds that save
    /// state.
    pub fn with_builtin(
        store: Arc<dyn ObjectStore>,
        directory: Arc<ResourceDirectory>,
        max_log_state_size: usize,
    ) -> Self {
        let registry = Self::new();
        let resources = directory.clone();
        registry.register(RecordType::TWO_PHASE, move || {
            Box::new(TwoPhaseRecord::for_recovery(resources.clone()))
        });
        registry.register(RecordType::LAST_RESOURCE, move || {
            Box::new(LastResourceRecord::for_recovery(directory.clone()))
        });
        registry.register(RecordType::PERSISTENCE, move || {
            Box::new(PersistenceRecord::for_recovery(
                store.clone(),
                max_log_state_size,
            ))
        });
        registry
    }

    /// Register a factory, replacing any previous one for `tag`.
    pub fn register<F>(&self, tag: RecordType, factory: F)
    where
        F: Fn() -> Box<dyn AbstractRecord> + Send + Sync + 'static,
    {
        if self.factories.insert(tag, Arc::new(factory)).is_some() {
            warn!(record_type = %tag, "Replaced record factory");
        } else {
            debug!(record_type = %tag, "Record factory registered");
        }
    }

    /// Build an empty record for `tag`.
    pub fn create(&self, tag: RecordType) -> Option<Box<dyn AbstractRecord>> {
        let factory = self.factories.get(&tag).map(|f| Arc::clone(f.value()))?;
        Some(factory())
    }

    pub fn is_registered(&self, tag: RecordType) -> bool {
        self.factories.contains_key(&tag)
    }
}

impl std::fmt::Debug for RecordTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<RecordType> = self.factories.iter().map(|e| *e.key()).collect();
        tags.sort();
        f.debug_struct("RecordTypeRegistry")
            .field("tags", &tags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::testing::TestRecord;
    use durabletx_store::VolatileObjectStore;

    #[test]
    fn test_builtin_factories() {
        let registry = RecordTypeRegistry::with_builtin(
            Arc::new(VolatileObjectStore::new()),
            Arc::new(ResourceDirectory::new()),
            4096,
        );

        let record = registry.create(RecordType::TWO_PHASE).unwrap();
        assert_eq!(record.record_type(), RecordType::TWO_PHASE);
        let record = registry.create(RecordType::PERSISTENCE).unwrap();
        assert_eq!(record.record_type(), RecordType::PERSISTENCE);
        let record = registry.create(RecordType::LAST_RESOURCE).unwrap();
        assert_eq!(record.record_type(), RecordType::LAST_RESOURCE);

        assert!(!registry.is_registered(RecordType::LOCK));
        assert!(registry.create(RecordType(42)).is_none());
    }

    #[test]
    fn test_user_factory() {
        let registry = RecordTypeRegistry::new();
        registry.register(RecordType(99), || Box::new(TestRecord::new()));

        let record = registry.create(RecordType(99)).unwrap();
        assert_eq!(record.record_type(), RecordType(99));
        assert!(format!("{registry:?}").contains("99"));
    }
}
