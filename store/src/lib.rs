//! durabletx Object Store
//!
//! Key-value durable storage keyed by `(uid, type name)`. Every backend
//! supports shadow (uncommitted) and committed writes so that a crash can never
//! leave a half-written object where a committed one is expected.

pub mod store;
pub mod seal;
pub mod file;
pub mod volatile;

pub use store::{ObjectStore, StateKind, StoreState};
pub use file::{FileObjectStore, FileStoreOptions};
pub use volatile::VolatileObjectStore;
