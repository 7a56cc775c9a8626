//! In-memory object store.

use dashmap::DashMap;
use tracing::debug;

use durabletx_common::{InputObjectState, OutputObjectState, Result, Uid};

use crate::store::{ObjectStore, StateKind, StoreState};

#[derive(Debug, Default, Clone)]
struct Entry {
    committed: Option<Vec<u8>>,
    shadow: Option<Vec<u8>>,
    hidden: Option<Vec<u8>>,
}

impl Entry {
    fn is_vacant(&self) -> bool {
        self.committed.is_none() && self.shadow.is_none() && self.hidden.is_none()
    }
}

/// Object store held entirely in memory.
///
/// Survives nothing but a dropped coordinator: share one instance between a
/// "crashed" and a "restarted" coordinator to simulate recovery.
#[derive(Debug, Default)]
pub struct VolatileObjectStore {
    entries: DashMap<(Uid, String), Entry>,
}

impl VolatileObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects across all types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(uid: Uid, type_name: &str) -> (Uid, String) {
        (uid, type_name.to_string())
    }

    fn update<F>(&self, uid: Uid, type_name: &str, f: F) -> bool
    where
        F: FnOnce(&mut Entry) -> bool,
    {
        let key = Self::key(uid, type_name);
        let changed = match self.entries.get_mut(&key) {
            Some(mut entry) => f(entry.value_mut()),
            None => return false,
        };
        self.entries.remove_if(&key, |_, entry| entry.is_vacant());
        changed
    }

    fn load(
        &self,
        uid: Uid,
        type_name: &str,
        pick: impl FnOnce(&Entry) -> Option<&Vec<u8>>,
    ) -> Option<InputObjectState> {
        self.entries
            .get(&Self::key(uid, type_name))
            .and_then(|entry| pick(entry.value()).cloned())
            .map(|bytes| InputObjectState::from_bytes(uid, type_name, bytes))
    }
}

impl ObjectStore for VolatileObjectStore {
    fn name(&self) -> &str {
        "volatile"
    }

    fn write(
        &self,
        uid: Uid,
        type_name: &str,
        state: &OutputObjectState,
        kind: StateKind,
    ) -> Result<bool> {
        let mut entry = self.entries.entry(Self::key(uid, type_name)).or_default();
        let bytes = state.buffer().to_vec();
        match kind {
            StateKind::Shadow => entry.shadow = Some(bytes),
            StateKind::Committed if entry.hidden.is_some() => return Ok(false),
            StateKind::Committed => entry.committed = Some(bytes),
        }
        debug!(uid = %uid, type_name, kind = %kind, bytes = state.size(), "State written");
        Ok(true)
    }

    fn read(&self, uid: Uid, type_name: &str) -> Result<Option<InputObjectState>> {
        Ok(self.load(uid, type_name, |e| e.committed.as_ref()))
    }

    fn read_shadow(&self, uid: Uid, type_name: &str) -> Result<Option<InputObjectState>> {
        Ok(self.load(uid, type_name, |e| e.shadow.as_ref()))
    }

    fn commit(&self, uid: Uid, type_name: &str) -> Result<bool> {
        Ok(self.update(uid, type_name, |entry| match entry.shadow.take() {
            Some(shadow) => {
                entry.committed = Some(shadow);
                true
            }
            None => false,
        }))
    }

    fn hide(&self, uid: Uid, type_name: &str) -> Result<bool> {
        Ok(self.update(uid, type_name, |entry| match entry.committed.take() {
            Some(committed) => {
                entry.hidden = Some(committed);
                true
            }
            None => false,
        }))
    }

    fn reveal(&self, uid: Uid, type_name: &str) -> Result<bool> {
        Ok(self.update(uid, type_name, |entry| match entry.hidden.take() {
            Some(hidden) => {
                entry.committed = Some(hidden);
                true
            }
            None => false,
        }))
    }

    fn remove(&self, uid: Uid, type_name: &str, kind: StateKind) -> Result<bool> {
        Ok(self.update(uid, type_name, |entry| match kind {
            StateKind::Shadow => entry.shadow.take().is_some(),
            StateKind::Committed => entry.committed.take().is_some(),
        }))
    }

    fn all_ids(&self, type_name: &str) -> Result<Vec<Uid>> {
        let mut ids: Vec<Uid> = self
            .entries
            .iter()
            .filter(|e| e.key().1 == type_name && e.value().committed.is_some())
            .map(|e| e.key().0)
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn all_types(&self) -> Result<Vec<String>> {
        let mut types: Vec<String> = self.entries.iter().map(|e| e.key().1.clone()).collect();
        types.sort();
        types.dedup();
        Ok(types)
    }

    fn current_state(&self, uid: Uid, type_name: &str) -> Result<StoreState> {
        let Some(entry) = self.entries.get(&Self::key(uid, type_name)) else {
            return Ok(StoreState::Unknown);
        };
        let state = match (entry.shadow.is_some(), entry.hidden.is_some()) {
            (true, true) => StoreState::UncommittedHidden,
            (true, false) => StoreState::Uncommitted,
            (false, true) => StoreState::Hidden,
            (false, false) if entry.committed.is_some() => StoreState::Committed,
            (false, false) => StoreState::Unknown,
        };
        Ok(state)
    }
}
