//! Serve command - run the orchestrator until interrupted.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use muster_orchestrator::CreateInstance;
use muster_store::DefinitionEvent;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::Context;
use crate::runtime::Runtime;

/// How often MCP servers are re-listed and dropped ones reconnected.
const TOOL_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Do not start the instances declared in config
    #[arg(long)]
    pub no_instances: bool,

    /// Do not watch the definitions directory for changes
    #[arg(long)]
    pub no_watch: bool,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    let config = &ctx.loaded.config;
    let runtime = Runtime::open(&ctx.loaded)?;
    info!(backend = ?runtime.store.backend, "Definition store opened");

    runtime.connect().await;

    let shutdown = CancellationToken::new();

    if !args.no_instances {
        start_configured(&runtime, ctx, &shutdown).await;
    }

    // Re-publish availability whenever the tool set changes.
    let mut tool_changes = runtime.tools.subscribe();
    let orchestrator = runtime.orchestrator.clone();
    let token = shutdown.child_token();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = tool_changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    orchestrator.refresh_availability().await;
                }
            }
        }
    });

    let tools = runtime.tools.clone();
    let token = shutdown.child_token();
    tokio::spawn(async move { tools.run_refresh(TOOL_REFRESH_INTERVAL, token).await });

    let orchestrator = runtime.orchestrator.clone();
    let token = shutdown.child_token();
    tokio::spawn(async move { orchestrator.run_recovery(token).await });

    // The handle must outlive the loop below.
    let _watcher = match runtime.store.file {
        Some(ref file) if config.store().watch && !args.no_watch => match file.watch() {
            Ok((mut events, handle)) => {
                info!(root = %file.root().display(), "Watching definitions");
                let orchestrator = runtime.orchestrator.clone();
                let token = shutdown.child_token();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            event = events.recv() => {
                                let Some(event) = event else { break };
                                log_definition_event(&event);
                                orchestrator.refresh_availability().await;
                            }
                        }
                    }
                });
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "Definition watcher unavailable");
                None
            }
        },
        _ => None,
    };

    if !ctx.json_output {
        println!(
            "muster serving {} instance(s) with {} tool(s); press Ctrl-C to stop",
            runtime.orchestrator.list_instances(None).len(),
            runtime.tools.tool_names().len()
        );
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown.cancel();

    let failures = runtime.orchestrator.stop_all(&CancellationToken::new()).await;
    for (instance, err) in &failures {
        error!(instance = %instance, error = %err, "Instance did not stop cleanly");
    }
    runtime.close().await;

    info!(failures = failures.len(), "Muster stopped");
    Ok(())
}

/// Create every `[[instances]]` entry. Failures are logged; recovery retries
/// the ones that failed for infrastructure reasons.
async fn start_configured(runtime: &Runtime, ctx: &Context, shutdown: &CancellationToken) {
    for entry in &ctx.loaded.config.instances {
        let mut request = CreateInstance::new(&entry.class).with_name(&entry.name);
        if let Some(ref scope) = entry.scope {
            request = request.with_scope(scope);
        }
        request.args = entry.args.clone();

        match runtime.orchestrator.create_instance(request, shutdown).await {
            Ok(instance) => info!(
                instance = %instance.name,
                class = %instance.service_class_name,
                state = %instance.state,
                "Configured instance started"
            ),
            Err(e) => warn!(instance = %entry.name, class = %entry.class, error = %e, "Configured instance failed to start"),
        }
    }
}

fn log_definition_event(event: &DefinitionEvent) {
    match event {
        DefinitionEvent::Loaded { kind, scope, name, .. } => {
            info!(kind = %kind, scope = %scope, name = %name, "Definition loaded")
        }
        DefinitionEvent::Removed { kind, scope, name, .. } => {
            info!(kind = %kind, scope = %scope, name = %name, "Definition removed")
        }
        DefinitionEvent::Error { path, error } => {
            warn!(path = %path.display(), error = %error, "Definition rejected")
        }
    }
}
