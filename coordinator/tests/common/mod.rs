//! Shared fixtures for coordinator integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use durabletx_common::{InputObjectState, OutputObjectState, Result, TxError, Uid};
use durabletx_coordinator::{CoordinatorConfig, TransactionManager};
use durabletx_participant::ScriptedResource;
use durabletx_store::{ObjectStore, StateKind, StoreState};

/// Store wrapper that fails writes and removals for one type on demand.
#[derive(Debug)]
pub struct FaultyStore {
    inner: Arc<dyn ObjectStore>,
    failing_type: Mutex<Option<String>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            failing_type: Mutex::new(None),
        }
    }

    pub fn fail_type(&self, type_name: Option<&str>) {
        *self.failing_type.lock() = type_name.map(str::to_string);
    }

    fn check(&self, type_name: &str) -> Result<()> {
        match self.failing_type.lock().as_deref() {
            Some(failing) if failing == type_name => Err(TxError::store_io(
                type_name,
                std::io::Error::new(std::io::ErrorKind::Other, "injected failure"),
            )),
            _ => Ok(()),
        }
    }
}

impl ObjectStore for FaultyStore {
    fn name(&self) -> &str {
        "faulty"
    }

    fn write(
        &self,
        uid: Uid,
        type_name: &str,
        state: &OutputObjectState,
        kind: StateKind,
    ) -> Result<bool> {
        self.check(type_name)?;
        self.inner.write(uid, type_name, state, kind)
    }

    fn read(&self, uid: Uid, type_name: &str) -> Result<Option<InputObjectState>> {
        self.inner.read(uid, type_name)
    }

    fn read_shadow(&self, uid: Uid, type_name: &str) -> Result<Option<InputObjectState>> {
        self.inner.read_shadow(uid, type_name)
    }

    fn commit(&self, uid: Uid, type_name: &str) -> Result<bool> {
        self.check(type_name)?;
        self.inner.commit(uid, type_name)
    }

    fn hide(&self, uid: Uid, type_name: &str) -> Result<bool> {
        self.inner.hide(uid, type_name)
    }

    fn reveal(&self, uid: Uid, type_name: &str) -> Result<bool> {
        self.inner.reveal(uid, type_name)
    }

    fn remove(&self, uid: Uid, type_name: &str, kind: StateKind) -> Result<bool> {
        self.check(type_name)?;
        self.inner.remove(uid, type_name, kind)
    }

    fn all_ids(&self, type_name: &str) -> Result<Vec<Uid>> {
        self.inner.all_ids(type_name)
    }

    fn all_types(&self) -> Result<Vec<String>> {
        self.inner.all_types()
    }

    fn current_state(&self, uid: Uid, type_name: &str) -> Result<StoreState> {
        self.inner.current_state(uid, type_name)
    }
}

pub fn create_test_manager(store: Arc<dyn ObjectStore>) -> TransactionManager {
    TransactionManager::with_store(CoordinatorConfig::in_memory(), store)
}

pub fn create_test_resources(names: &[&str]) -> Vec<Arc<ScriptedResource>> {
    names
        .iter()
        .map(|name| Arc::new(ScriptedResource::new(*name)))
        .collect()
}
