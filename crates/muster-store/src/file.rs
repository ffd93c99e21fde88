//! Directory-backed definition and execution store with hot reload.
//!
//! Layout under the store root:
//!
//! ```text
//! serviceclasses/<name>.toml                 default scope
//! workflows/<name>.toml
//! scopes/<scope>/serviceclasses/<name>.toml  any other scope
//! scopes/<scope>/workflows/<name>.toml
//! executions/<workflow>/<execution-id>.json
//! ```
//!
//! Definition documents may also be written by hand as `.yaml`/`.yml`. Every
//! document is loaded into an in-memory cache on startup; the optional watcher
//! keeps the cache in sync with edits made outside the process.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use muster_types::{
    DEFAULT_SCOPE, Definition, DefinitionKind, DefinitionStore, ExecutionStore, MusterError,
    ServiceClassDefinition, WorkflowExecution,
};
use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};
use parking_lot::RwLock;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use crate::document::{DocumentFormat, read_definition_file, render_document};
use crate::error::{Result, StoreError};
use crate::validate::validate_for_write;

const SCOPES_DIR: &str = "scopes";
const EXECUTIONS_DIR: &str = "executions";
const WRITE_CHECK_FILE: &str = ".muster-write-check";

/// Event emitted when definition files change.
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionEvent {
    /// A definition was loaded or reloaded.
    Loaded {
        kind: DefinitionKind,
        scope: String,
        name: String,
        path: PathBuf,
    },
    /// A definition's file was removed.
    Removed {
        kind: DefinitionKind,
        scope: String,
        name: String,
        path: PathBuf,
    },
    /// A file failed to parse or validate. The previous version, if any, stays loaded.
    Error { path: PathBuf, error: String },
}

type DefinitionKey = (DefinitionKind, String, String);

#[derive(Debug, Clone)]
struct CachedDefinition {
    definition: Definition,
    path: PathBuf,
}

#[derive(Debug, Default)]
struct DefinitionCache {
    entries: BTreeMap<DefinitionKey, CachedDefinition>,
    /// Reverse map: file path → key (for delete handling).
    path_to_key: HashMap<PathBuf, DefinitionKey>,
}

/// Cache plus root, shared with the watcher thread.
#[derive(Clone)]
struct CacheView {
    root: PathBuf,
    cache: Arc<RwLock<DefinitionCache>>,
}

impl CacheView {
    /// Map a document path to the kind and scope its directory implies.
    fn locate(&self, path: &Path) -> Option<(DefinitionKind, String)> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = rel.components().filter_map(|c| c.as_os_str().to_str()).collect();
        let (scope, dir) = match parts.as_slice() {
            [dir, _file] => (DEFAULT_SCOPE.to_string(), *dir),
            [SCOPES_DIR, scope, dir, _file] => (scope.to_string(), *dir),
            _ => return None,
        };
        kind_for_dir(dir).map(|kind| (kind, scope))
    }

    /// Load or reload a single document.
    fn load_file(&self, path: &Path) -> DefinitionEvent {
        debug!("Loading definition file: {}", path.display());

        let Some((kind, scope)) = self.locate(path) else {
            return DefinitionEvent::Error {
                path: path.to_path_buf(),
                error: "file is not inside a serviceclasses or workflows directory".into(),
            };
        };

        let definition = match read_definition_file(path) {
            Ok(d) => d,
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                return DefinitionEvent::Error {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                };
            }
        };

        if definition.kind() != kind {
            let error = format!(
                "{} document found in the {} directory",
                definition.kind(),
                kind.dir_name()
            );
            warn!("Skipping {}: {}", path.display(), error);
            return DefinitionEvent::Error {
                path: path.to_path_buf(),
                error,
            };
        }

        // Classes loaded so far in this scope, so a file closing a cycle is rejected
        if let Err(e) = validate_for_write(&definition, &self.scope_classes(&scope)) {
            warn!("Invalid definition in {}: {}", path.display(), e);
            return DefinitionEvent::Error {
                path: path.to_path_buf(),
                error: e.to_string(),
            };
        }

        let name = definition.name().to_string();
        let key = (kind, scope.clone(), name.clone());
        self.insert(key, definition, path.to_path_buf());

        info!("{} loaded: {}/{} (from {})", kind, scope, name, path.display());

        DefinitionEvent::Loaded {
            kind,
            scope,
            name,
            path: path.to_path_buf(),
        }
    }

    fn scope_classes(&self, scope: &str) -> Vec<ServiceClassDefinition> {
        self.cache
            .read()
            .entries
            .iter()
            .filter(|((k, s, _), _)| *k == DefinitionKind::ServiceClass && s == scope)
            .filter_map(|(_, e)| match &e.definition {
                Definition::ServiceClass(c) => Some(c.clone()),
                Definition::Workflow(_) => None,
            })
            .collect()
    }

    /// Handle a document being removed.
    fn remove_file(&self, path: &Path) -> Option<DefinitionEvent> {
        let mut cache = self.cache.write();
        let key = cache.path_to_key.remove(path)?;
        if cache.entries.get(&key).is_some_and(|e| e.path == path) {
            cache.entries.remove(&key);
        }
        let (kind, scope, name) = key;
        info!("{} removed: {}/{} (was {})", kind, scope, name, path.display());
        Some(DefinitionEvent::Removed {
            kind,
            scope,
            name,
            path: path.to_path_buf(),
        })
    }

    fn insert(&self, key: DefinitionKey, definition: Definition, path: PathBuf) {
        let mut cache = self.cache.write();

        // The file used to hold a different definition (renamed in place)
        if let Some(old_key) = cache.path_to_key.get(&path).cloned() {
            if old_key != key && cache.entries.get(&old_key).is_some_and(|e| e.path == path) {
                cache.entries.remove(&old_key);
            }
        }

        let previous = cache.entries.get(&key).map(|e| e.path.clone());
        if let Some(prev) = previous.filter(|p| *p != path) {
            warn!(
                "{} {}/{} in {} replaces the copy in {}",
                key.0,
                key.1,
                key.2,
                path.display(),
                prev.display()
            );
            cache.path_to_key.remove(&prev);
        }

        cache.path_to_key.insert(path.clone(), key.clone());
        cache.entries.insert(key, CachedDefinition { definition, path });
    }

    fn remove(&self, key: &DefinitionKey) -> Option<CachedDefinition> {
        let mut cache = self.cache.write();
        let removed = cache.entries.remove(key)?;
        cache.path_to_key.remove(&removed.path);
        Some(removed)
    }
}

fn kind_for_dir(dir: &str) -> Option<DefinitionKind> {
    [DefinitionKind::ServiceClass, DefinitionKind::Workflow]
        .into_iter()
        .find(|k| k.dir_name() == dir)
}

fn is_definition_file(path: &Path) -> bool {
    DocumentFormat::from_path(path).is_some()
}

/// Names become file names, so they must stay a single path component.
fn check_file_name(kind: DefinitionKind, name: &str) -> muster_types::Result<()> {
    if name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(MusterError::invalid(
            kind,
            name,
            "name must not contain path separators or start with '.'",
        ));
    }
    Ok(())
}

/// Definition and execution store rooted at a directory.
pub struct FileStore {
    view: CacheView,
    /// Execution id → record path, filled as records are saved or found.
    executions: RwLock<HashMap<String, PathBuf>>,
    /// Serializes create/update/delete so existence checks and writes agree.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open a store at `root`, creating the directory layout if needed.
    ///
    /// Nothing is loaded until [`FileStore::load_all`] is called.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for kind in [DefinitionKind::ServiceClass, DefinitionKind::Workflow] {
            let dir = root.join(kind.dir_name());
            std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }
        let executions = root.join(EXECUTIONS_DIR);
        std::fs::create_dir_all(&executions).map_err(|e| StoreError::io(&executions, e))?;

        // The watcher reports canonical paths
        let root = std::fs::canonicalize(&root).map_err(|e| StoreError::io(&root, e))?;

        Ok(Self {
            view: CacheView {
                root,
                cache: Arc::new(RwLock::new(DefinitionCache::default())),
            },
            executions: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        })
    }

    /// Check that `root` can be created and written to.
    pub fn check_writable(root: &Path) -> Result<()> {
        std::fs::create_dir_all(root).map_err(|e| StoreError::io(root, e))?;
        let marker = root.join(WRITE_CHECK_FILE);
        std::fs::write(&marker, b"ok").map_err(|e| StoreError::io(&marker, e))?;
        std::fs::remove_file(&marker).map_err(|e| StoreError::io(&marker, e))?;
        Ok(())
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.view.root
    }

    /// Load every definition document under the root.
    ///
    /// Returns one event per file processed. Invalid files are logged but
    /// don't prevent other files from loading.
    pub fn load_all(&self) -> Vec<DefinitionEvent> {
        let mut dirs: Vec<PathBuf> = [DefinitionKind::ServiceClass, DefinitionKind::Workflow]
            .iter()
            .map(|k| self.view.root.join(k.dir_name()))
            .collect();

        let scopes_root = self.view.root.join(SCOPES_DIR);
        if let Ok(entries) = std::fs::read_dir(&scopes_root) {
            let mut scopes: Vec<PathBuf> = entries.flatten().map(|e| e.path()).filter(|p| p.is_dir()).collect();
            scopes.sort();
            for scope in scopes {
                dirs.push(scope.join(DefinitionKind::ServiceClass.dir_name()));
                dirs.push(scope.join(DefinitionKind::Workflow.dir_name()));
            }
        }

        let mut events = Vec::new();
        for dir in dirs {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    error!("Failed to read definition directory {}: {}", dir.display(), e);
                    continue;
                }
            };
            let mut files: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| is_definition_file(p))
                .collect();
            files.sort();
            for path in files {
                events.push(self.view.load_file(&path));
            }
        }

        info!(
            "Loaded {} definitions from {}",
            self.len(),
            self.view.root.display()
        );
        events
    }

    /// Number of cached definitions across all kinds and scopes.
    pub fn len(&self) -> usize {
        self.view.cache.read().entries.len()
    }

    /// Whether no definitions are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The file a cached definition was loaded from.
    pub fn path_of(&self, kind: DefinitionKind, scope: &str, name: &str) -> Option<PathBuf> {
        let key = (kind, scope.to_string(), name.to_string());
        self.view.cache.read().entries.get(&key).map(|e| e.path.clone())
    }

    /// Start watching the root for changes.
    ///
    /// Returns a channel receiver that emits [`DefinitionEvent`]s as files
    /// change, plus a handle that must be kept alive for as long as watching
    /// should continue. Events are debounced over a 300ms window to absorb
    /// editor save patterns.
    pub fn watch(&self) -> Result<(mpsc::Receiver<DefinitionEvent>, WatcherHandle)> {
        let root = self.view.root.clone();
        let (event_tx, event_rx) = mpsc::channel(64);
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut debouncer = new_debouncer(Duration::from_millis(300), notify_tx).map_err(|e| StoreError::Watch {
            path: root.clone(),
            message: format!("failed to create file watcher: {}", e),
        })?;

        debouncer
            .watcher()
            .watch(&root, notify::RecursiveMode::Recursive)
            .map_err(|e| StoreError::Watch {
                path: root.clone(),
                message: e.to_string(),
            })?;

        let view = self.view.clone();
        let executions_dir = root.join(EXECUTIONS_DIR);

        // The notify receiver is std::sync, so it gets its own thread
        let thread = std::thread::Builder::new()
            .name("muster-store-watch".into())
            .spawn(move || {
                // Keep debouncer alive in this thread
                let _debouncer = debouncer;

                while let Ok(Ok(events)) = notify_rx.recv() {
                    for event in events {
                        let path = event.path;
                        if event.kind != DebouncedEventKind::Any
                            || !is_definition_file(&path)
                            || path.starts_with(&executions_dir)
                        {
                            continue;
                        }

                        let store_event = if path.exists() {
                            Some(view.load_file(&path))
                        } else {
                            view.remove_file(&path)
                        };

                        if let Some(evt) = store_event {
                            if event_tx.blocking_send(evt).is_err() {
                                debug!("Definition event receiver dropped; stopping watcher");
                                return;
                            }
                        }
                    }
                }
            })
            .map_err(|e| StoreError::io(&root, e))?;

        info!("Watching {} for definition changes", root.display());
        Ok((event_rx, WatcherHandle { _thread: thread }))
    }

    fn kind_dir(&self, kind: DefinitionKind, scope: &str) -> PathBuf {
        if scope == DEFAULT_SCOPE {
            self.view.root.join(kind.dir_name())
        } else {
            self.view.root.join(SCOPES_DIR).join(scope).join(kind.dir_name())
        }
    }

    fn scope_classes(&self, scope: &str) -> Vec<ServiceClassDefinition> {
        self.view.scope_classes(scope)
    }

    fn cached(&self, key: &DefinitionKey) -> Option<CachedDefinition> {
        self.view.cache.read().entries.get(key).cloned()
    }

    async fn write_document(&self, path: &Path, definition: &Definition) -> Result<()> {
        let format = DocumentFormat::from_path(path).unwrap_or(DocumentFormat::Toml);
        let text = render_document(definition, format)?;
        write_atomic(path, text.as_bytes()).await
    }

    fn execution_path(&self, workflow: &str, execution_id: &str) -> PathBuf {
        self.view
            .root
            .join(EXECUTIONS_DIR)
            .join(workflow)
            .join(format!("{}.json", execution_id))
    }

    async fn find_execution(&self, execution_id: &str) -> Result<Option<PathBuf>> {
        if let Some(path) = self.executions.read().get(execution_id).cloned() {
            return Ok(Some(path));
        }

        let file_name = format!("{}.json", execution_id);
        for dir in self.execution_dirs(None).await? {
            let candidate = dir.join(&file_name);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                self.executions
                    .write()
                    .insert(execution_id.to_string(), candidate.clone());
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    async fn execution_dirs(&self, workflow: Option<&str>) -> Result<Vec<PathBuf>> {
        let base = self.view.root.join(EXECUTIONS_DIR);
        if let Some(w) = workflow {
            return Ok(vec![base.join(w)]);
        }

        let mut dirs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&base).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(StoreError::io(&base, e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::io(&base, e))? {
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("document");
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

async fn read_execution(path: &Path) -> Result<Option<WorkflowExecution>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_str(&text).map(Some).map_err(|e| StoreError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[async_trait]
impl DefinitionStore for FileStore {
    async fn get(&self, kind: DefinitionKind, scope: &str, name: &str) -> muster_types::Result<Definition> {
        self.cached(&(kind, scope.to_string(), name.to_string()))
            .map(|e| e.definition)
            .ok_or_else(|| MusterError::not_found(kind, scope, name))
    }

    async fn list(&self, kind: DefinitionKind, scope: &str) -> muster_types::Result<Vec<Definition>> {
        Ok(self
            .view
            .cache
            .read()
            .entries
            .iter()
            .filter(|((k, s, _), _)| *k == kind && s == scope)
            .map(|(_, e)| e.definition.clone())
            .collect())
    }

    async fn create(&self, scope: &str, definition: Definition) -> muster_types::Result<()> {
        let _guard = self.write_lock.lock().await;
        let kind = definition.kind();
        let name = definition.name().to_string();
        check_file_name(kind, &name)?;

        let key = (kind, scope.to_string(), name.clone());
        if self.cached(&key).is_some() {
            return Err(MusterError::already_exists(kind, scope, name));
        }
        validate_for_write(&definition, &self.scope_classes(scope))?;

        let path = self.kind_dir(kind, scope).join(format!("{}.toml", name));
        self.write_document(&path, &definition).await?;
        self.view.insert(key, definition, path);

        info!("{} created: {}/{}", kind, scope, name);
        Ok(())
    }

    async fn update(&self, scope: &str, definition: Definition) -> muster_types::Result<()> {
        let _guard = self.write_lock.lock().await;
        let kind = definition.kind();
        let name = definition.name().to_string();

        let key = (kind, scope.to_string(), name.clone());
        let Some(existing) = self.cached(&key) else {
            return Err(MusterError::not_found(kind, scope, name));
        };
        validate_for_write(&definition, &self.scope_classes(scope))?;

        self.write_document(&existing.path, &definition).await?;
        self.view.insert(key, definition, existing.path);

        info!("{} updated: {}/{}", kind, scope, name);
        Ok(())
    }

    async fn delete(&self, kind: DefinitionKind, scope: &str, name: &str) -> muster_types::Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = (kind, scope.to_string(), name.to_string());
        let Some(existing) = self.view.remove(&key) else {
            return Err(MusterError::not_found(kind, scope, name));
        };

        match tokio::fs::remove_file(&existing.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&existing.path, e).into()),
        }

        info!("{} deleted: {}/{}", kind, scope, name);
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for FileStore {
    async fn save_execution(&self, execution: &WorkflowExecution) -> muster_types::Result<()> {
        let path = self.execution_path(&execution.workflow_name, &execution.execution_id);

        if let Some(existing) = read_execution(&path).await? {
            if existing.outcome.is_terminal() {
                return Err(MusterError::store(format!(
                    "execution '{}' is already {} and cannot be overwritten",
                    execution.execution_id, existing.outcome
                )));
            }
        }

        let json = serde_json::to_vec_pretty(execution)
            .map_err(|e| StoreError::Serialize(format!("execution {}: {}", execution.execution_id, e)))?;
        write_atomic(&path, &json).await?;
        self.executions
            .write()
            .insert(execution.execution_id.clone(), path);

        debug!(
            execution_id = %execution.execution_id,
            workflow = %execution.workflow_name,
            outcome = %execution.outcome,
            "Saved execution record"
        );
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> muster_types::Result<WorkflowExecution> {
        let Some(path) = self.find_execution(execution_id).await? else {
            return Err(MusterError::ExecutionNotFound(execution_id.to_string()));
        };
        read_execution(&path)
            .await?
            .ok_or_else(|| MusterError::ExecutionNotFound(execution_id.to_string()))
    }

    async fn list_executions(&self, workflow: Option<&str>) -> muster_types::Result<Vec<WorkflowExecution>> {
        let mut records = Vec::new();
        for dir in self.execution_dirs(workflow).await? {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(&dir, e).into()),
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::io(&dir, e))? {
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                match read_execution(&path).await {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {}
                    Err(e) => warn!("Skipping unreadable execution record: {}", e),
                }
            }
        }
        Ok(records)
    }
}

/// Handle that keeps the file watcher alive.
///
/// Drop this to stop watching.
pub struct WatcherHandle {
    _thread: std::thread::JoinHandle<()>,
}
