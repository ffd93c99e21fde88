//! Service lifecycle orchestration for Muster.
//!
//! The [`Orchestrator`] owns service class CRUD, tool-availability gating,
//! the per-instance state machine, health monitoring and infrastructure
//! backoff with recovery. Tools are reached through a
//! [`muster_types::ToolInvoker`]; definitions come from a
//! [`muster_types::DefinitionStore`].
//!
//! ```rust,ignore
//! let orchestrator = Orchestrator::new(store, invoker, events, OrchestratorSettings::default());
//! let cancel = CancellationToken::new();
//! let instance = orchestrator
//!     .create_instance(CreateInstance::new("port-forward").with_arg("port", 8080), &cancel)
//!     .await?;
//! assert_eq!(instance.state, ServiceState::Running);
//! ```

mod availability;
mod backoff;
mod context;
mod health;
mod invoke;
mod ops;
mod orchestrator;
mod recovery;
mod settings;

pub use availability::ClassAvailability;
pub use backoff::BackoffPolicy;
pub use orchestrator::{CreateInstance, Orchestrator};
pub use settings::OrchestratorSettings;
