use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sealpkg_config::validate_value;
use sealpkg_manager::{LoggingReloader, PackageManager};
use sealpkg_manifest::{ManifestReader, pack_directory};
use sealpkg_protocol::{ConfigValue, PackageId, ResourceKind, UninstallMode};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "sealpkg")]
#[command(about = "Pack, install, and manage extension packages")]
struct Cli {
    #[arg(long, env = "SEALPKG_ROOT", default_value = ".sealpkg", global = true)]
    root: PathBuf,
    #[arg(long, env = "SEALPKG_HOST_VERSION", global = true)]
    host_version: Option<String>,
    #[arg(
        long,
        env = "SEALPKG_DOWNLOAD_TIMEOUT_SECS",
        default_value_t = 60,
        global = true
    )]
    download_timeout_secs: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a `.sealpkg` archive from a package source directory.
    Pack {
        source: PathBuf,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Parse a manifest (directory, manifest.toml, or archive) and list issues.
    Inspect { path: PathBuf },
    Install { archive: PathBuf },
    InstallUrl { url: String },
    List,
    Enable { id: String },
    Disable { id: String },
    Uninstall {
        id: String,
        /// full, keep_data, or disable_only
        #[arg(long, default_value = "full")]
        mode: String,
    },
    /// Reload one package, or every enabled package with `--all`.
    Reload {
        #[arg(required_unless_present = "all")]
        id: Option<String>,
        #[arg(long)]
        all: bool,
    },
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Get {
        id: String,
    },
    /// Set one key. The value is parsed as JSON, falling back to a plain string.
    Set {
        id: String,
        key: String,
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Pack { source, output } => pack(source, output),
        Command::Inspect { path } => inspect(path),
        command => {
            let manager = build_manager(&cli.root, cli.host_version, cli.download_timeout_secs)
                .await?;
            run(manager, command).await
        }
    }
}

async fn build_manager(
    root: &PathBuf,
    host_version: Option<String>,
    download_timeout_secs: u64,
) -> Result<PackageManager> {
    let mut builder = PackageManager::builder(root)
        .download_timeout(Duration::from_secs(download_timeout_secs));
    if let Some(host_version) = host_version {
        builder = builder.host_version(host_version);
    }
    for kind in [
        ResourceKind::Scripts,
        ResourceKind::Decks,
        ResourceKind::Replies,
        ResourceKind::Templates,
    ] {
        builder = builder.reloader(Arc::new(LoggingReloader::new(kind)));
    }
    builder
        .reloader(Arc::new(LoggingReloader::restart_only(ResourceKind::HelpDocs)))
        .build()
        .await
        .with_context(|| format!("failed to open package root {}", root.display()))
}

async fn run(manager: PackageManager, command: Command) -> Result<()> {
    match command {
        Command::Install { archive } => print_json(&manager.install(&archive).await?),
        Command::InstallUrl { url } => print_json(&manager.install_from_url(&url).await?),
        Command::List => {
            for instance in manager.list() {
                let version = instance
                    .descriptor
                    .as_ref()
                    .map(|descriptor| descriptor.version().to_owned())
                    .unwrap_or_else(|| "?".to_owned());
                println!("{}\t{}\t{}", instance.id, version, instance.state);
            }
            Ok(())
        }
        Command::Enable { id } => print_json(&manager.enable(&PackageId::from_string(id)).await?),
        Command::Disable { id } => {
            print_json(&manager.disable(&PackageId::from_string(id)).await?)
        }
        Command::Uninstall { id, mode } => print_json(
            &manager
                .uninstall(&PackageId::from_string(id), UninstallMode::parse(&mode))
                .await?,
        ),
        Command::Reload { all: true, .. } => print_json(&manager.reload_all().await?),
        Command::Reload { id, .. } => {
            let Some(id) = id else {
                bail!("reload needs a package id or --all");
            };
            print_json(&manager.reload(&PackageId::from_string(id)).await?)
        }
        Command::Config(ConfigCommand::Get { id }) => {
            print_json(&manager.get_config(&PackageId::from_string(id))?)
        }
        Command::Config(ConfigCommand::Set { id, key, value }) => {
            let id = PackageId::from_string(id);
            let value = parse_config_value(&value);
            if let Some(schema) = manager.config_schema(&id)?.get(&key) {
                validate_value(&key, &value, schema)?;
            }
            let mut config = manager.get_config(&id)?;
            config.insert(key, value);
            print_json(&manager.set_config(&id, config).await?)
        }
        Command::Pack { .. } | Command::Inspect { .. } => Ok(()),
    }
}

fn pack(source: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let reader = ManifestReader::new();
    let descriptor = reader
        .parse_file(&source.join(sealpkg_protocol::MANIFEST_FILE))
        .with_context(|| format!("{} is not a valid package source", source.display()))?;
    let output = output.unwrap_or_else(|| {
        PathBuf::from(format!(
            "{}-{}.{}",
            descriptor.id().dir_name(),
            descriptor.version(),
            sealpkg_protocol::PACKAGE_EXTENSION
        ))
    });
    let files = pack_directory(&source, &output)?;
    info!(package_id = %descriptor.id(), files, output = %output.display(), "package packed");
    println!("{}", output.display());
    Ok(())
}

fn inspect(path: PathBuf) -> Result<()> {
    let reader = ManifestReader::new();
    let bytes = if path.is_dir() {
        std::fs::read(path.join(sealpkg_protocol::MANIFEST_FILE))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        std::fs::read(&path)?
    } else {
        sealpkg_manifest::read_manifest_bytes(&path)?
    };

    let descriptor = reader.parse(&bytes)?;
    let issues = reader.validate(&descriptor);
    print_json(&descriptor)?;
    if issues.is_empty() {
        println!("ok");
        return Ok(());
    }
    for issue in &issues {
        println!("issue: {issue}");
    }
    bail!("{} issue(s) found", issues.len())
}

fn parse_config_value(raw: &str) -> ConfigValue {
    serde_json::from_str(raw).unwrap_or_else(|_| ConfigValue::String(raw.to_owned()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_values_parse_as_json_then_string() {
        assert_eq!(parse_config_value("5"), ConfigValue::Integer(5));
        assert_eq!(parse_config_value("true"), ConfigValue::Boolean(true));
        assert_eq!(
            parse_config_value("hello"),
            ConfigValue::String("hello".to_owned())
        );
        assert_eq!(
            parse_config_value("\"quoted\""),
            ConfigValue::String("quoted".to_owned())
        );
    }

    #[test]
    fn cli_parses_uninstall_and_reload_all() {
        let cli = Cli::parse_from(["sealpkg", "uninstall", "demo/pkg", "--mode", "keep_data"]);
        assert!(matches!(
            cli.command,
            Command::Uninstall { ref id, ref mode } if id == "demo/pkg" && mode == "keep_data"
        ));

        let cli = Cli::parse_from(["sealpkg", "--root", "/tmp/x", "reload", "--all"]);
        assert!(matches!(cli.command, Command::Reload { all: true, id: None }));
        assert_eq!(cli.root, PathBuf::from("/tmp/x"));
    }
}
