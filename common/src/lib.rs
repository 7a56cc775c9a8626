//! durabletx Common Types
//!
//! Shared types used across the durabletx transaction manager: identifiers,
//! status and outcome codes, the durable object state codec and the error
//! taxonomy.

pub mod identifiers;
pub mod status;
pub mod state;
pub mod error;

pub use identifiers::*;
pub use status::*;
pub use state::{InputObjectState, OutputObjectState};
pub use error::*;
