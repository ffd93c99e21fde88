//! The orchestrator handle: service classes, instance registry and the
//! public lifecycle operations.
//!
//! Every state-changing operation on an instance holds that instance's
//! operation lock for its whole duration, so start/stop/restart/delete on
//! the same instance never interleave. Health ticks only try the lock and
//! skip the tick when it is held.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use muster_events::{EventData, EventEmitter, ReasonCode};
use muster_template::{ExecutionContext, RenderMode, render_str};
use muster_types::{
    DEFAULT_SCOPE, Definition, DefinitionKind, DefinitionStore, DefinitionStoreExt, MusterError,
    Result, ServiceClassDefinition, ServiceInstance, ToolInvoker, validate_args,
};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::availability::{ClassAvailability, describe, find_unmet};
use crate::settings::OrchestratorSettings;

pub(crate) type InstanceKey = (String, String);

// ─────────────────────────────────────────────────────────────────────────────
// Instance entries
// ─────────────────────────────────────────────────────────────────────────────

/// Registry slot for one instance.
pub(crate) struct InstanceEntry {
    pub record: Mutex<ServiceInstance>,
    /// Class as last seen; used by stop and delete when the class was removed.
    pub class: Mutex<ServiceClassDefinition>,
    /// Serializes lifecycle operations on this instance.
    pub op_lock: tokio::sync::Mutex<()>,
    pub monitor: Mutex<Option<CancellationToken>>,
}

impl InstanceEntry {
    fn new(record: ServiceInstance, class: ServiceClassDefinition) -> Self {
        Self {
            record: Mutex::new(record),
            class: Mutex::new(class),
            op_lock: tokio::sync::Mutex::new(()),
            monitor: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> ServiceInstance {
        self.record.lock().clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut ServiceInstance) -> R) -> R {
        f(&mut self.record.lock())
    }

    pub fn stop_monitor(&self) {
        if let Some(token) = self.monitor.lock().take() {
            token.cancel();
        }
    }

    /// Wait for the operation lock, or give up when `cancel` fires first.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
        operation: &str,
    ) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let name = self.record.lock().name.clone();
                Err(MusterError::cancelled(name, operation))
            }
            guard = self.op_lock.lock() => Ok(guard),
        }
    }
}

/// Event payload identifying an instance.
pub(crate) fn instance_event(instance: &ServiceInstance) -> EventData {
    EventData::new(&instance.scope, &instance.name).service_class(&instance.service_class_name)
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct Inner {
    pub store: Arc<dyn DefinitionStore>,
    pub invoker: Arc<dyn ToolInvoker>,
    pub events: EventEmitter,
    pub settings: OrchestratorSettings,
    pub instances: RwLock<BTreeMap<InstanceKey, Arc<InstanceEntry>>>,
    /// Last reported availability per (scope, class).
    pub availability: Mutex<HashMap<InstanceKey, bool>>,
    /// Parent of every health monitor token.
    pub shutdown: CancellationToken,
}

impl Inner {
    pub fn entry(&self, scope: &str, name: &str) -> Result<Arc<InstanceEntry>> {
        self.instances
            .read()
            .get(&(scope.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| MusterError::InstanceNotFound {
                scope: scope.to_string(),
                name: name.to_string(),
            })
    }

    pub async fn class_index(&self, scope: &str) -> Result<HashMap<String, ServiceClassDefinition>> {
        Ok(self
            .store
            .list_service_classes(scope)
            .await?
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect())
    }

    /// Current class of an instance.
    ///
    /// With `allow_snapshot`, a class that has since been deleted falls back
    /// to the copy taken at the last successful lookup.
    pub async fn resolve_class(&self, entry: &InstanceEntry, allow_snapshot: bool) -> Result<ServiceClassDefinition> {
        let (scope, class_name) = {
            let record = entry.record.lock();
            (record.scope.clone(), record.service_class_name.clone())
        };
        match self.store.get_service_class(&scope, &class_name).await {
            Ok(class) => {
                *entry.class.lock() = class.clone();
                Ok(class)
            }
            Err(MusterError::DefinitionNotFound { .. }) if allow_snapshot => {
                debug!(class = %class_name, scope = %scope, "Service class gone, using last known definition");
                Ok(entry.class.lock().clone())
            }
            Err(e) => Err(e),
        }
    }

    /// Fail with `DependencyUnavailable` unless `class` and its whole
    /// dependency chain can be served by the current tool set.
    pub async fn gate(&self, scope: &str, class: &ServiceClassDefinition, subject: &str, operation: &str) -> Result<()> {
        let classes = self.class_index(scope).await?;
        let tools = self.invoker.available_tool_names();
        match find_unmet(class, &classes, &tools) {
            None => Ok(()),
            Some(unmet) => {
                debug!(
                    subject,
                    operation,
                    class = %class.name,
                    unmet = %unmet.class,
                    missing = ?unmet.missing_tools,
                    "Dependency gate closed"
                );
                Err(MusterError::DependencyUnavailable {
                    subject: subject.to_string(),
                    operation: operation.to_string(),
                    class: class.name.clone(),
                    unmet: unmet.class,
                    missing_tools: unmet.missing_tools,
                })
            }
        }
    }

    /// Move the instance to `Failed`, record `error` and announce it.
    pub fn fail(&self, entry: &InstanceEntry, operation: &str, error: MusterError) -> MusterError {
        let snapshot = entry.update(|i| {
            i.fail(error.to_string());
            i.clone()
        });
        warn!(
            instance = %snapshot.name,
            scope = %snapshot.scope,
            operation,
            error = %error,
            "Service instance operation failed"
        );
        self.events.emit(
            ReasonCode::ServiceInstanceFailed,
            instance_event(&snapshot).operation(operation).error(&error),
        );
        error
    }

    fn class_write_failed(&self, scope: &str, name: &str, error: MusterError) -> MusterError {
        if matches!(error, MusterError::DefinitionInvalid { .. }) {
            self.events.emit(
                ReasonCode::ServiceClassValidationFailed,
                EventData::new(scope, name).error(&error),
            );
        }
        error
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public handle
// ─────────────────────────────────────────────────────────────────────────────

/// Request to create (and start) a service instance.
#[derive(Debug, Clone)]
pub struct CreateInstance {
    pub scope: String,
    /// Instance name; derived from the class when unset.
    pub name: Option<String>,
    pub service_class: String,
    pub args: Map<String, Value>,
}

impl CreateInstance {
    pub fn new(service_class: impl Into<String>) -> Self {
        Self {
            scope: DEFAULT_SCOPE.to_string(),
            name: None,
            service_class: service_class.into(),
            args: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Service lifecycle orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        invoker: Arc<dyn ToolInvoker>,
        events: EventEmitter,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                invoker,
                events,
                settings,
                instances: RwLock::new(BTreeMap::new()),
                availability: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    pub fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    pub fn store(&self) -> &Arc<dyn DefinitionStore> {
        &self.inner.store
    }

    pub fn invoker(&self) -> &Arc<dyn ToolInvoker> {
        &self.inner.invoker
    }

    // ── Service classes ─────────────────────────────────────────────────────

    pub async fn create_class(&self, scope: &str, class: ServiceClassDefinition) -> Result<()> {
        let name = class.name.clone();
        if let Err(e) = self.inner.store.create(scope, Definition::ServiceClass(class)).await {
            return Err(self.inner.class_write_failed(scope, &name, e));
        }
        info!(class = %name, scope, "Service class created");
        self.inner
            .events
            .emit(ReasonCode::ServiceClassCreated, EventData::new(scope, &name));
        Ok(())
    }

    pub async fn update_class(&self, scope: &str, class: ServiceClassDefinition) -> Result<()> {
        let name = class.name.clone();
        if let Err(e) = self.inner.store.update(scope, Definition::ServiceClass(class)).await {
            return Err(self.inner.class_write_failed(scope, &name, e));
        }
        info!(class = %name, scope, "Service class updated");
        self.inner
            .events
            .emit(ReasonCode::ServiceClassUpdated, EventData::new(scope, &name));
        Ok(())
    }

    /// Remove a class definition. Existing instances keep running.
    pub async fn delete_class(&self, scope: &str, name: &str) -> Result<()> {
        self.inner.store.delete(DefinitionKind::ServiceClass, scope, name).await?;
        self.inner
            .availability
            .lock()
            .remove(&(scope.to_string(), name.to_string()));
        info!(class = %name, scope, "Service class deleted");
        self.inner
            .events
            .emit(ReasonCode::ServiceClassDeleted, EventData::new(scope, name));
        Ok(())
    }

    pub async fn get_class(&self, scope: &str, name: &str) -> Result<ServiceClassDefinition> {
        self.inner.store.get_service_class(scope, name).await
    }

    pub async fn list_classes(&self, scope: &str) -> Result<Vec<ServiceClassDefinition>> {
        self.inner.store.list_service_classes(scope).await
    }

    /// Whether `name` and every class it depends on can be served right now.
    /// A class that does not exist is unavailable.
    pub async fn is_available(&self, scope: &str, name: &str) -> Result<bool> {
        let classes = self.inner.class_index(scope).await?;
        let Some(class) = classes.get(name) else {
            return Ok(false);
        };
        let tools = self.inner.invoker.available_tool_names();
        Ok(find_unmet(class, &classes, &tools).is_none())
    }

    pub async fn class_availability(&self, scope: &str, name: &str) -> Result<ClassAvailability> {
        let classes = self.inner.class_index(scope).await?;
        let class = classes
            .get(name)
            .ok_or_else(|| MusterError::not_found(DefinitionKind::ServiceClass, scope, name))?;
        let tools = self.inner.invoker.available_tool_names();
        Ok(describe(class, &classes, &tools))
    }

    /// Availability of every class in `scope`, ordered by name.
    pub async fn availability_report(&self, scope: &str) -> Result<Vec<ClassAvailability>> {
        let classes = self.inner.class_index(scope).await?;
        let tools = self.inner.invoker.available_tool_names();
        let mut report: Vec<_> = classes.values().map(|c| describe(c, &classes, &tools)).collect();
        report.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(report)
    }

    /// Re-evaluate availability for every known scope and emit
    /// `ServiceClassAvailable`/`ServiceClassUnavailable` on changes.
    pub async fn refresh_availability(&self) {
        let mut scopes: BTreeSet<String> = self.inner.instances.read().keys().map(|(s, _)| s.clone()).collect();
        scopes.insert(DEFAULT_SCOPE.to_string());

        for scope in scopes {
            let report = match self.availability_report(&scope).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(scope = %scope, error = %e, "Failed to evaluate class availability");
                    continue;
                }
            };
            for class in report {
                let previous = self
                    .inner
                    .availability
                    .lock()
                    .insert((scope.clone(), class.name.clone()), class.available);
                let data = EventData::new(&scope, &class.name);
                match (previous, class.available) {
                    (Some(false), true) => {
                        info!(class = %class.name, scope = %scope, "Service class available");
                        self.inner.events.emit(ReasonCode::ServiceClassAvailable, data);
                    }
                    (Some(true), false) | (None, false) => {
                        let mut data = data.tools(class.missing_tools.clone());
                        if let Some(dep) = &class.unmet_dependency {
                            data = data.detail(format!("dependency '{}' unavailable", dep));
                        }
                        info!(class = %class.name, scope = %scope, missing = ?class.missing_tools, "Service class unavailable");
                        self.inner.events.emit(ReasonCode::ServiceClassUnavailable, data);
                    }
                    _ => {}
                }
            }
        }
    }

    // ── Service instances ───────────────────────────────────────────────────

    /// Validate, gate, register and start a new instance.
    ///
    /// A start failure leaves the instance registered in `Failed` and returns
    /// the error.
    pub async fn create_instance(&self, request: CreateInstance, cancel: &CancellationToken) -> Result<ServiceInstance> {
        let scope = request.scope;
        let class = self.inner.store.get_service_class(&scope, &request.service_class).await?;
        let subject = request.name.as_deref().unwrap_or(&class.name).to_string();
        let args = validate_args(&class.arg_schema, &request.args, &subject)?;
        let name = match request.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => default_instance_name(&class, &args)?,
        };

        self.inner.gate(&scope, &class, &name, "create").await?;

        let entry = Arc::new(InstanceEntry::new(
            ServiceInstance::new(&scope, &name, &class.name, args),
            class.clone(),
        ));
        // Held before the entry is visible, so nothing can run against it mid-start.
        let _guard = entry.op_lock.lock().await;
        {
            let mut instances = self.inner.instances.write();
            let key = (scope.clone(), name.clone());
            if instances.contains_key(&key) {
                return Err(MusterError::InstanceAlreadyExists { scope, name });
            }
            instances.insert(key, entry.clone());
        }
        info!(instance = %name, class = %class.name, scope = %scope, "Service instance created");
        self.inner
            .events
            .emit(ReasonCode::ServiceInstanceCreated, instance_event(&entry.snapshot()));

        self.inner.start_locked(&entry, &class, cancel).await?;
        Ok(entry.snapshot())
    }

    /// Start an existing instance. Already running instances are left alone.
    pub async fn start_instance(&self, scope: &str, name: &str, cancel: &CancellationToken) -> Result<ServiceInstance> {
        let entry = self.inner.entry(scope, name)?;
        let _guard = entry.acquire(cancel, "start").await?;
        if entry.snapshot().state.is_up() {
            return Ok(entry.snapshot());
        }
        let class = self.inner.resolve_class(&entry, false).await?;
        self.inner.gate(scope, &class, name, "start").await?;
        self.inner.start_locked(&entry, &class, cancel).await?;
        Ok(entry.snapshot())
    }

    /// Stop an instance and keep its record in `Stopped`.
    pub async fn stop_instance(&self, scope: &str, name: &str, cancel: &CancellationToken) -> Result<ServiceInstance> {
        let entry = self.inner.entry(scope, name)?;
        let _guard = entry.acquire(cancel, "stop").await?;
        let class = self.inner.resolve_class(&entry, true).await?;
        self.inner.stop_locked(&entry, &class, cancel).await?;
        Ok(entry.snapshot())
    }

    /// Restart through the class's restart tool, or stop then start.
    pub async fn restart_instance(&self, scope: &str, name: &str, cancel: &CancellationToken) -> Result<ServiceInstance> {
        let entry = self.inner.entry(scope, name)?;
        let _guard = entry.acquire(cancel, "restart").await?;
        let class = self.inner.resolve_class(&entry, false).await?;
        self.inner.gate(scope, &class, name, "restart").await?;
        self.inner.restart_locked(&entry, &class, cancel).await?;
        Ok(entry.snapshot())
    }

    /// Stop the instance if it is up, then drop its record.
    ///
    /// The record is removed even when the stop tool fails; that error is
    /// returned afterwards.
    pub async fn delete_instance(&self, scope: &str, name: &str, cancel: &CancellationToken) -> Result<()> {
        let entry = self.inner.entry(scope, name)?;
        let _guard = entry.acquire(cancel, "delete").await?;

        let mut stop_error = None;
        if entry.snapshot().state.is_up() {
            let class = self.inner.resolve_class(&entry, true).await?;
            match self.inner.stop_locked(&entry, &class, cancel).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => stop_error = Some(e),
            }
        }
        entry.stop_monitor();
        self.inner
            .instances
            .write()
            .remove(&(scope.to_string(), name.to_string()));

        let snapshot = entry.snapshot();
        info!(instance = %name, scope, "Service instance deleted");
        let mut data = instance_event(&snapshot);
        if let Some(e) = &stop_error {
            data = data.error(e);
        }
        self.inner.events.emit(ReasonCode::ServiceInstanceDeleted, data);

        match stop_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn get_instance(&self, scope: &str, name: &str) -> Result<ServiceInstance> {
        Ok(self.inner.entry(scope, name)?.snapshot())
    }

    /// Instances ordered by (scope, name), optionally limited to one scope.
    pub fn list_instances(&self, scope: Option<&str>) -> Vec<ServiceInstance> {
        self.inner
            .instances
            .read()
            .iter()
            .filter(|((s, _), _)| scope.is_none_or(|want| s == want))
            .map(|(_, e)| e.snapshot())
            .collect()
    }

    /// Run one health check now.
    ///
    /// `Ok(None)` means the check was skipped: the instance is busy, not up,
    /// backing off or has no health check.
    pub async fn check_health(&self, scope: &str, name: &str) -> Result<Option<bool>> {
        let entry = self.inner.entry(scope, name)?;
        self.inner.health_tick(&entry).await
    }

    /// Stop every instance that is up. Returns the errors by instance name.
    pub async fn stop_all(&self, cancel: &CancellationToken) -> Vec<(String, MusterError)> {
        let entries: Vec<Arc<InstanceEntry>> = self.inner.instances.read().values().cloned().collect();
        let mut errors = Vec::new();
        for entry in entries {
            let snapshot = entry.snapshot();
            if !snapshot.state.is_up() {
                continue;
            }
            if let Err(e) = self.stop_instance(&snapshot.scope, &snapshot.name, cancel).await {
                errors.push((snapshot.name, e));
            }
        }
        errors
    }

    /// Cancel every health monitor. Instances are left as they are.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        for entry in self.inner.instances.read().values() {
            entry.stop_monitor();
        }
    }
}

/// Name for an instance created without one: the class's name template when
/// it has one, `<class>-<8 hex chars>` otherwise.
fn default_instance_name(class: &ServiceClassDefinition, args: &Map<String, Value>) -> Result<String> {
    let Some(template) = class.service_config.default_name_template.as_deref() else {
        let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
        return Ok(format!("{}-{}", class.name, suffix));
    };
    let mut ctx = ExecutionContext::from_map(args.clone());
    ctx.insert("args", Value::Object(args.clone()));
    ctx.insert("serviceClassName", Value::String(class.name.clone()));
    let name = render_str(template, ctx.as_value(), RenderMode::Strict).map_err(|e| e.for_subject(&class.name))?;
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(MusterError::InputValidation {
            subject: class.name.clone(),
            message: "default name template rendered an empty name".into(),
        });
    }
    Ok(name)
}
