//! `medext` administration CLI.
//!
//! Reads `HostConfig` from the environment, scans the extensions directory
//! and applies one lifecycle or query operation.

use clap::{Parser, Subcommand};
use log::info;
use medext_core::extension::capability::parse_capability_pair;
use medext_core::extension::manifest::parse_command_context;
use medext_core::{
    assess_capabilities, init_logging, CapabilitySet, CommandContext, ExtensionHost, HostConfig,
    InstalledExtension, RenderRequest, ResourceKind, Role,
};
use std::error::Error;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "medext")]
#[command(about = "Clinic extension host administration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every discovered extension with its state
    List,
    /// Show requested capabilities and their risk
    Risk {
        extension_id: String,
    },
    /// Grant capabilities (all requested ones when none are given)
    Grant {
        extension_id: String,
        /// `resource:action`, repeatable
        #[arg(long = "capability", value_parser = parse_capability_arg)]
        capabilities: Vec<(ResourceKind, medext_core::ActionKind)>,
    },
    /// Enable an extension with granted capabilities
    Enable {
        extension_id: String,
    },
    /// Disable an enabled extension
    Disable {
        extension_id: String,
    },
    /// Revoke all grants and return to `installed`
    Revoke {
        extension_id: String,
    },
    /// List commands of enabled extensions
    Commands {
        /// Only commands runnable in this context
        #[arg(long, value_parser = parse_context_arg)]
        context: Option<CommandContext>,
    },
    /// List templates of enabled extensions
    Templates,
    /// Render a template against a JSON data file
    Render {
        template_id: String,
        #[arg(long)]
        data: PathBuf,
        #[arg(long, default_value = "doctor", value_parser = parse_role_arg)]
        role: Role,
        #[arg(long, default_value = "cli")]
        user: String,
    },
}

fn parse_capability_arg(raw: &str) -> Result<(ResourceKind, medext_core::ActionKind), String> {
    parse_capability_pair(raw).map_err(|err| err.to_string())
}

fn parse_context_arg(raw: &str) -> Result<CommandContext, String> {
    parse_command_context(raw).ok_or_else(|| format!("unknown context `{raw}`"))
}

fn parse_role_arg(raw: &str) -> Result<Role, String> {
    Role::parse(raw).ok_or_else(|| format!("unknown role `{raw}`"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = HostConfig::from_env()?;
    if let Some(log_dir) = config.log_dir() {
        init_logging(config.log_level(), log_dir)?;
    }

    let (host, report) = ExtensionHost::from_config(&config)?;
    info!(
        "event=cli_start module=cli status=ok loaded={} failed={}",
        report.loaded.len(),
        report.failed.len()
    );
    for (dir, message) in &report.failed {
        eprintln!("warning: {dir}: {message}");
    }

    match cli.command {
        Commands::List => {
            let extensions = host.list();
            if extensions.is_empty() {
                println!("No extensions found.");
            }
            for extension in &extensions {
                print_extension(extension);
            }
        }
        Commands::Risk { extension_id } => {
            let extension = host
                .get(&extension_id)
                .ok_or_else(|| format!("extension not found: {extension_id}"))?;
            let assessment = assess_capabilities(extension.requested());
            println!("overall: {}", assessment.overall.as_str());
            for entry in &assessment.entries {
                println!(
                    "  {}:{} {} ({})",
                    entry.resource,
                    entry.action,
                    entry.risk.as_str(),
                    entry.reason
                );
            }
        }
        Commands::Grant {
            extension_id,
            capabilities,
        } => {
            let record = if capabilities.is_empty() {
                host.grant_all(&extension_id)?
            } else {
                let offered = CapabilitySet::from_pairs(
                    capabilities
                        .into_iter()
                        .map(|(resource, action)| (resource, [action])),
                );
                host.grant(&extension_id, &offered)?
            };
            print_extension(&record);
        }
        Commands::Enable { extension_id } => print_extension(&host.enable(&extension_id)?),
        Commands::Disable { extension_id } => print_extension(&host.disable(&extension_id)?),
        Commands::Revoke { extension_id } => print_extension(&host.revoke(&extension_id)?),
        Commands::Commands { context } => {
            let commands = match context {
                Some(context) => host.available_commands(context),
                None => host.all_commands(),
            };
            for entry in commands {
                let contexts: Vec<&str> = entry
                    .command
                    .context
                    .iter()
                    .map(|context| context.as_str())
                    .collect();
                println!(
                    "{}  {}  [{}]  {}{}",
                    entry.command.id,
                    entry.command.title,
                    contexts.join(","),
                    entry.extension_id,
                    entry
                        .command
                        .keybinding
                        .as_deref()
                        .map(|binding| format!("  ({binding})"))
                        .unwrap_or_default()
                );
            }
        }
        Commands::Templates => {
            for entry in host.available_templates(None) {
                println!(
                    "{}  {}  {}  target={}  {}",
                    entry.template.id,
                    entry.template.name,
                    entry.template.kind.as_str(),
                    entry.template.target_entity,
                    entry.extension_id
                );
            }
        }
        Commands::Render {
            template_id,
            data,
            role,
            user,
        } => {
            let raw = std::fs::read_to_string(&data)?;
            let record: serde_json::Value = serde_json::from_str(&raw)?;
            let result = host
                .render_template(RenderRequest::new(template_id, user, role, record))
                .await;
            match result.html {
                Some(html) if result.success => println!("{html}"),
                _ => {
                    return Err(result
                        .error
                        .unwrap_or_else(|| "render failed".to_string())
                        .into())
                }
            }
        }
    }

    Ok(())
}

fn print_extension(extension: &InstalledExtension) {
    println!(
        "{}  {}  {}  granted=[{}]{}",
        extension.id(),
        extension.version(),
        extension.state(),
        extension.granted(),
        extension
            .error()
            .map(|message| format!("  error={message}"))
            .unwrap_or_default()
    );
}
