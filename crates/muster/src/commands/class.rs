//! Class command - service class definitions and availability.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use muster_orchestrator::ClassAvailability;
use muster_store::read_definition_file;
use muster_types::{DEFAULT_SCOPE, Definition};

use super::{Context, print_json};
use crate::runtime::Runtime;

/// Arguments for the class command.
#[derive(Args, Debug)]
pub struct ClassArgs {
    #[command(subcommand)]
    pub command: ClassCommand,
}

#[derive(Subcommand, Debug)]
pub enum ClassCommand {
    /// List service classes with their availability
    List {
        #[arg(long, default_value = DEFAULT_SCOPE)]
        scope: String,
    },

    /// Validate a service class document without storing it
    Validate {
        /// Path to a .toml, .yaml or .yml document
        file: PathBuf,
    },

    /// Report whether a class can be used right now and which tools it lacks
    Check {
        /// Service class name
        name: String,

        #[arg(long, default_value = DEFAULT_SCOPE)]
        scope: String,
    },
}

/// Run the class command.
pub async fn run(args: ClassArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ClassCommand::List { scope } => cmd_list(&scope, ctx).await,
        ClassCommand::Validate { file } => cmd_validate(&file, ctx),
        ClassCommand::Check { name, scope } => cmd_check(&name, &scope, ctx).await,
    }
}

async fn cmd_list(scope: &str, ctx: &Context) -> Result<()> {
    let runtime = Runtime::open(&ctx.loaded)?;
    runtime.connect().await;
    let report = runtime.orchestrator.availability_report(scope).await;
    runtime.close().await;
    let report = report?;

    if ctx.json_output {
        return print_json(&report);
    }
    if report.is_empty() {
        println!("No service classes in scope '{}'.", scope);
        return Ok(());
    }

    println!("{:<24} {:<10} MISSING", "NAME", "AVAILABLE");
    println!("{}", "-".repeat(72));
    for class in &report {
        println!(
            "{:<24} {:<10} {}",
            class.name,
            if class.available { "yes" } else { "no" },
            describe_missing(class)
        );
    }
    Ok(())
}

fn cmd_validate(file: &Path, ctx: &Context) -> Result<()> {
    let class = match read_definition_file(file)? {
        Definition::ServiceClass(c) => c,
        Definition::Workflow(w) => bail!("{} holds workflow '{}', not a service class", file.display(), w.name),
    };
    class.validate()?;

    let tools = class.required_tools();
    if ctx.json_output {
        print_json(&serde_json::json!({
            "valid": true,
            "name": class.name,
            "dependencies": class.dependencies(),
            "requiredTools": tools,
        }))
    } else {
        println!("Service class '{}' is valid", class.name);
        if ctx.verbose {
            println!("  dependencies: {}", class.dependencies().join(", "));
            println!("  tools: {}", tools.join(", "));
        }
        Ok(())
    }
}

async fn cmd_check(name: &str, scope: &str, ctx: &Context) -> Result<()> {
    let runtime = Runtime::open(&ctx.loaded)?;
    runtime.connect().await;
    let availability = runtime.orchestrator.class_availability(scope, name).await;
    runtime.close().await;
    let availability = availability?;

    if ctx.json_output {
        return print_json(&availability);
    }
    if availability.available {
        println!("Service class '{}' is available", availability.name);
    } else {
        println!("Service class '{}' is unavailable: {}", availability.name, describe_missing(&availability));
    }
    if ctx.verbose {
        println!("  tools: {}", availability.required_tools.join(", "));
    }
    Ok(())
}

fn describe_missing(class: &ClassAvailability) -> String {
    let mut parts = Vec::new();
    if !class.missing_tools.is_empty() {
        parts.push(format!("missing {}", class.missing_tools.join(", ")));
    }
    if let Some(ref dep) = class.unmet_dependency {
        parts.push(format!("dependency '{}' unavailable", dep));
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn availability(missing: &[&str], dep: Option<&str>) -> ClassAvailability {
        ClassAvailability {
            name: "api".into(),
            available: missing.is_empty() && dep.is_none(),
            required_tools: vec!["x_api_start".into(), "x_api_stop".into()],
            missing_tools: missing.iter().map(|s| s.to_string()).collect(),
            unmet_dependency: dep.map(String::from),
        }
    }

    #[test]
    fn test_describe_missing() {
        assert_eq!(describe_missing(&availability(&[], None)), "");
        assert_eq!(describe_missing(&availability(&["x_api_stop"], None)), "missing x_api_stop");
        assert_eq!(
            describe_missing(&availability(&["x_api_stop"], Some("db"))),
            "missing x_api_stop; dependency 'db' unavailable"
        );
    }
}
