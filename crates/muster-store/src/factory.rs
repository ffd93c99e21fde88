//! Backend selection from configuration.

use std::path::Path;
use std::sync::Arc;

use muster_config::{StoreBackend, StoreConfig};
use muster_types::{DefinitionStore, ExecutionStore};
use tracing::{info, warn};

use crate::error::Result;
use crate::file::{DefinitionEvent, FileStore};
use crate::memory::MemoryStore;

/// The stores a process runs against.
#[derive(Clone)]
pub struct OpenedStore {
    /// The backend actually in use: `File` or `Memory`, never `Auto`.
    pub backend: StoreBackend,
    pub definitions: Arc<dyn DefinitionStore>,
    pub executions: Arc<dyn ExecutionStore>,
    /// The file store, when that backend was chosen (for watching).
    pub file: Option<Arc<FileStore>>,
}

impl OpenedStore {
    /// A fresh in-memory store.
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            backend: StoreBackend::Memory,
            definitions: store.clone(),
            executions: store,
            file: None,
        }
    }

    fn from_file(store: FileStore) -> Self {
        let store = Arc::new(store);
        Self {
            backend: StoreBackend::File,
            definitions: store.clone(),
            executions: store.clone(),
            file: Some(store),
        }
    }
}

/// Open the configured backend and load any existing definitions.
///
/// `auto` tries the file backend first and falls back to memory with a
/// warning when the definitions directory cannot be written.
pub fn open_store(config: &StoreConfig, config_dir: &Path) -> Result<OpenedStore> {
    let dir = config.definitions_dir_in(config_dir);

    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory definition store");
            Ok(OpenedStore::memory())
        }
        StoreBackend::File => {
            FileStore::check_writable(&dir)?;
            let store = FileStore::open(&dir)?;
            log_load_errors(&store.load_all());
            Ok(OpenedStore::from_file(store))
        }
        StoreBackend::Auto => {
            let opened = FileStore::check_writable(&dir).and_then(|()| FileStore::open(&dir));
            match opened {
                Ok(store) => {
                    log_load_errors(&store.load_all());
                    Ok(OpenedStore::from_file(store))
                }
                Err(e) => {
                    warn!(
                        "Definitions directory {} is not usable ({}); falling back to in-memory store",
                        dir.display(),
                        e
                    );
                    Ok(OpenedStore::memory())
                }
            }
        }
    }
}

fn log_load_errors(events: &[DefinitionEvent]) {
    let failed = events
        .iter()
        .filter(|e| matches!(e, DefinitionEvent::Error { .. }))
        .count();
    if failed > 0 {
        warn!("{} definition file(s) failed to load", failed);
    }
}
