//! In-memory state of the dispatcher: model metadata and dispatch completion.
//!
//! Everything here is volatile and lives for the process lifetime.

pub mod completion;
pub mod registry;

pub use completion::{CompletionTracker, TrackerError};
pub use registry::{ModelRegistry, RegistryError};
