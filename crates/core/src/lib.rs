//! downsync core library.
//!
//! This crate keeps a downstream fork of an upstream git project in sync:
//! configuration, release discovery, file filters, the step pipeline, the
//! repository / forge / generator capabilities and the sync orchestrator.

pub mod config;
pub mod errors;
pub mod files;
pub mod forge;
pub mod generator;
pub mod git;
pub mod release;
pub mod state;
pub mod steps;
pub mod sync;

// Re-exports for convenience.
pub use config::{Config, Project};
pub use errors::SyncError;
pub use release::Release;
pub use state::{CancelFlag, State};
pub use sync::{Operation, SyncStats};
