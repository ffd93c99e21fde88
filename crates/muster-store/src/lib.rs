//! Definition and execution storage for Muster.
//!
//! Two backends implement the [`DefinitionStore`](muster_types::DefinitionStore)
//! and [`ExecutionStore`](muster_types::ExecutionStore) contracts:
//!
//! - [`FileStore`]: TOML/YAML documents in a directory tree, cached in memory
//!   and optionally kept in sync by a file watcher
//! - [`MemoryStore`]: process-local maps
//!
//! Both validate definitions on write, including dependency cycle checks
//! across the service classes of a scope. [`open_store`] picks a backend
//! from configuration.

pub mod document;
pub mod error;
pub mod factory;
pub mod file;
pub mod memory;
mod validate;

pub use document::{DocumentFormat, parse_document, read_definition_file, render_document};
pub use error::{Result, StoreError};
pub use factory::{OpenedStore, open_store};
pub use file::{DefinitionEvent, FileStore, WatcherHandle};
pub use memory::MemoryStore;
