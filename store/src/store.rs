//! The object store interface.

use std::fmt;

use durabletx_common::{InputObjectState, OutputObjectState, Result, Uid};

/// Which copy of an object an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Uncommitted copy written ahead of a commit.
    Shadow,
    /// The canonical copy returned by `read`.
    Committed,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKind::Shadow => write!(f, "shadow"),
            StateKind::Committed => write!(f, "committed"),
        }
    }
}

/// What the store currently holds for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreState {
    /// Nothing is stored.
    Unknown,
    /// A shadow exists, with or without a committed copy.
    Uncommitted,
    /// Only a committed copy exists.
    Committed,
    /// The committed copy is hidden.
    Hidden,
    /// A shadow exists alongside a hidden committed copy.
    UncommittedHidden,
}

/// Durable storage for object states keyed by `(uid, type name)`.
///
/// Implementations must guarantee that a crash between a shadow write and its
/// promotion by [`ObjectStore::commit`] leaves the previously committed copy
/// readable and the shadow ignorable. Operations on the same key are sequenced
/// by the caller.
pub trait ObjectStore: Send + Sync + fmt::Debug {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Write a shadow or committed copy.
    ///
    /// Returns `false` if a committed write is refused because the committed
    /// copy is hidden.
    fn write(
        &self,
        uid: Uid,
        type_name: &str,
        state: &OutputObjectState,
        kind: StateKind,
    ) -> Result<bool>;

    /// Read the committed copy. Hidden copies are not visible.
    fn read(&self, uid: Uid, type_name: &str) -> Result<Option<InputObjectState>>;

    /// Read the shadow copy.
    fn read_shadow(&self, uid: Uid, type_name: &str) -> Result<Option<InputObjectState>>;

    /// Promote the shadow to committed, replacing any previous committed copy.
    ///
    /// Returns `false` if there is no shadow.
    fn commit(&self, uid: Uid, type_name: &str) -> Result<bool>;

    /// Mask the committed copy without deleting it.
    fn hide(&self, uid: Uid, type_name: &str) -> Result<bool>;

    /// Restore a hidden committed copy.
    fn reveal(&self, uid: Uid, type_name: &str) -> Result<bool>;

    /// Delete a copy. Returns `false` if it does not exist.
    fn remove(&self, uid: Uid, type_name: &str, kind: StateKind) -> Result<bool>;

    /// Identifiers of every visible committed object of a type.
    ///
    /// Each call rescans the store.
    fn all_ids(&self, type_name: &str) -> Result<Vec<Uid>>;

    /// Every type name with at least one stored object.
    fn all_types(&self) -> Result<Vec<String>>;

    /// Current state of an object.
    fn current_state(&self, uid: Uid, type_name: &str) -> Result<StoreState>;
}
