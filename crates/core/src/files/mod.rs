//! Working-tree file selection: glob filters and filter-driven deletion.

pub mod delete;
pub mod filters;

pub use delete::delete_files;
pub use filters::{Filters, Glob, Matcher};
