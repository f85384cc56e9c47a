//! Process-wide state
//!
//! Thread-safe management of the running per-user supervisors.

mod supervisor_registry;

pub use supervisor_registry::SupervisorRegistry;
