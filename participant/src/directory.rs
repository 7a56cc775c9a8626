//! Registry of resources by name.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::resource::Resource;

/// Resources known to this process, keyed by [`Resource::name`].
///
/// Recovery restores a participant from the resource name saved in the
/// transaction log, so every resource that may hold prepared work must be
/// registered before the recovery manager runs.
#[derive(Debug, Default)]
pub struct ResourceDirectory {
    resources: DashMap<String, Arc<dyn Resource>>,
}

impl ResourceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource, replacing any previous one with the same name.
    pub fn register(&self, resource: Arc<dyn Resource>) {
        let name = resource.name().to_string();
        if self.resources.insert(name.clone(), resource).is_some() {
            warn!(resource = %name, "Replaced registered resource");
        } else {
            info!(resource = %name, "Resource registered");
        }
    }

    /// Remove a resource.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Resource>> {
        self.resources.remove(name).map(|(_, resource)| resource)
    }

    /// Look up a resource by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Resource>> {
        self.resources.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Names of all registered resources, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedResource;
    use crate::Vote;
    use durabletx_common::Uid;

    #[test]
    fn test_register_and_lookup() {
        let directory = ResourceDirectory::new();
        assert!(directory.is_empty());

        directory.register(Arc::new(ScriptedResource::new("db-a")));
        directory.register(Arc::new(ScriptedResource::new("db-b")));

        assert_eq!(directory.len(), 2);
        assert_eq!(directory.names(), vec!["db-a", "db-b"]);
        assert!(directory.get("db-a").is_some());
        assert!(directory.get("db-c").is_none());

        assert!(directory.unregister("db-a").is_some());
        assert!(directory.get("db-a").is_none());
    }

    #[test]
    fn test_lookup_returns_shared_resource() {
        let directory = ResourceDirectory::new();
        let resource = Arc::new(ScriptedResource::new("queue"));
        directory.register(resource.clone());

        let found = directory.get("queue").unwrap();
        let xid = Uid::new();
        let vote = tokio_test::block_on(found.prepare(xid)).unwrap();

        assert_eq!(vote, Vote::Commit);
        assert_eq!(resource.calls().prepare, 1);
    }
}
