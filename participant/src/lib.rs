//! durabletx Participant Library
//!
//! The interface external resource managers implement to take part in a
//! two-phase commit, the directory the coordinator uses to find them again
//! after a restart, and a scripted resource for tests and simulation.

pub mod directory;
pub mod resource;
pub mod scripted;

pub use directory::ResourceDirectory;
pub use resource::{Resource, ResourceError, Vote};
pub use scripted::{CallCounts, ScriptedResource};
