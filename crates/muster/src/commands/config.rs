//! Config command - inspect the resolved configuration.

use anyhow::Result;
use clap::{Args, Subcommand};

use super::{Context, print_json};

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration and where it came from
    Show,

    /// Show the configuration directory and the files searched
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Path => cmd_path(ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = &ctx.loaded;
    let config = &loaded.config;

    if ctx.json_output {
        return print_json(&serde_json::json!({
            "configDir": loaded.config_dir,
            "loadedFrom": loaded.loaded_from(),
            "warnings": loaded.warnings,
            "config": config,
        }));
    }

    println!("# Muster Configuration\n");

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }

    let store = config.store();
    println!("Store:");
    println!("  backend: {:?}", store.backend);
    println!("  definitions: {}", store.definitions_dir_in(&loaded.config_dir).display());
    println!("  watch: {}", store.watch);
    println!();

    let servers = config.mcp_servers();
    if servers.is_empty() {
        println!("No MCP servers configured\n");
    } else {
        println!("MCP Servers:");
        for server in &servers {
            let target = if server.is_http() {
                server.url.clone().unwrap_or_default()
            } else {
                server.command.clone()
            };
            println!("  {:<16} {}", server.name, target);
        }
        println!();
    }

    if !config.instances.is_empty() {
        println!("Instances:");
        for instance in &config.instances {
            println!("  {:<16} -> {}", instance.name, instance.class);
        }
        println!();
    }

    if !loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &loaded.warnings {
            println!("  ⚠ {}", w);
        }
        println!();
    }

    if ctx.verbose {
        println!("---\nRaw config:\n");
        println!("{}", config.to_toml()?);
    }

    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    let loaded = &ctx.loaded;
    if ctx.json_output {
        return print_json(&serde_json::json!({
            "configDir": loaded.config_dir,
            "sources": loaded
                .sources
                .iter()
                .map(|s| serde_json::json!({ "path": s.path, "loaded": s.loaded }))
                .collect::<Vec<_>>(),
        }));
    }

    println!("Config directory: {}\n", loaded.config_dir.display());
    println!("Config file search order (later overrides earlier):\n");
    for source in &loaded.sources {
        let status = if source.loaded { "✓ loaded" } else { "· not found" };
        println!("  {} {}", status, source.path.display());
    }
    Ok(())
}
