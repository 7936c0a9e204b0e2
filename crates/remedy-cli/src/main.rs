use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use remedy_core::{verify_audit_log, Settings};
use remedy_rollback::{BackupId, RollbackManager};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "remedy.toml";

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .long("config")
        .short('c')
        .global(true)
        .value_parser(value_parser!(PathBuf))
        .help("Config file (defaults to ./remedy.toml when present)");

    let json_arg = Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON");

    Command::new("remedy")
        .version(remedy_core::VERSION)
        .about("Inspect remediation configuration, backups and audit logs")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(config_arg)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("config")
                .about("Configuration")
                .subcommand_required(true)
                .subcommand(Command::new("show").about("Print the effective configuration"))
                .subcommand(Command::new("check").about("Validate the configuration file")),
        )
        .subcommand(
            Command::new("backups")
                .about("Backup store")
                .subcommand_required(true)
                .arg(
                    Arg::new("dir")
                        .long("dir")
                        .global(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Backup directory, overriding the config"),
                )
                .subcommand(Command::new("list").about("List backups, oldest first").arg(json_arg))
                .subcommand(
                    Command::new("restore")
                        .about("Restore a source file from a backup")
                        .arg(Arg::new("id").required(true).help("Backup id")),
                )
                .subcommand(Command::new("prune").about("Apply the retention limit now")),
        )
        .subcommand(
            Command::new("audit")
                .about("Audit log")
                .subcommand_required(true)
                .subcommand(
                    Command::new("verify")
                        .about("Check the hash chain of a JSONL audit log")
                        .arg(
                            Arg::new("path")
                                .required(true)
                                .value_parser(value_parser!(PathBuf))
                                .help("Audit log file"),
                        ),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_settings(args: &ArgMatches) -> anyhow::Result<Settings> {
    if let Some(path) = args.get_one::<PathBuf>("config") {
        return Settings::load(path).with_context(|| format!("loading {}", path.display()));
    }
    if Path::new(DEFAULT_CONFIG).exists() {
        return Ok(Settings::load(DEFAULT_CONFIG)?);
    }
    tracing::debug!("no config file, using defaults");
    Ok(Settings::default())
}

async fn open_backups(settings: &Settings, args: &ArgMatches) -> anyhow::Result<RollbackManager> {
    let mut config = settings.rollback.clone();
    if let Some(dir) = args.get_one::<PathBuf>("dir") {
        config.backup_dir.clone_from(dir);
    }
    RollbackManager::from_config(&config)
        .await
        .with_context(|| format!("opening backups in {}", config.backup_dir.display()))
}

async fn run_backups(settings: &Settings, args: &ArgMatches) -> anyhow::Result<()> {
    let manager = open_backups(settings, args).await?;

    match args.subcommand() {
        Some(("list", sub)) => {
            let backups = manager.list_backups().await;
            if sub.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&backups)?);
                return Ok(());
            }
            if backups.is_empty() {
                println!("No backups");
            }
            for meta in backups {
                println!(
                    "{}  {}  {:>8}  {}  {}",
                    meta.id,
                    meta.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    meta.size,
                    if meta.deployed { "deployed" } else { "-       " },
                    meta.source.display()
                );
            }
        }
        Some(("restore", sub)) => {
            let raw = sub
                .get_one::<String>("id")
                .context("backup id is required")?;
            let id: BackupId = raw
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid backup id {raw}: {e}"))?;
            let Some(meta) = manager.get(id).await else {
                bail!("no backup with id {id}");
            };
            if !manager.rollback(id).await {
                bail!("restore of {} from backup {id} failed", meta.source.display());
            }
            println!("Restored {} from backup {id}", meta.source.display());
        }
        Some(("prune", _)) => {
            let removed = manager.clean_old_backups().await?;
            println!(
                "Removed {} backup(s), limit {}",
                removed.len(),
                manager.max_backups()
            );
        }
        _ => unreachable!("subcommand_required"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let settings = load_settings(&matches)?;

    match matches.subcommand() {
        Some(("config", args)) => match args.subcommand() {
            Some(("show", _)) => print!("{}", settings.to_toml()?),
            Some(("check", _)) => {
                settings.validate()?;
                println!("Configuration is valid");
            }
            _ => unreachable!("subcommand_required"),
        },
        Some(("backups", args)) => run_backups(&settings, args).await?,
        Some(("audit", args)) => {
            if let Some(("verify", sub)) = args.subcommand() {
                let path = sub
                    .get_one::<PathBuf>("path")
                    .context("audit log path is required")?;
                let records = verify_audit_log(path)
                    .await
                    .with_context(|| format!("verifying {}", path.display()))?;
                println!("Audit log intact: {records} record(s)");
            }
        }
        _ => unreachable!("subcommand_required"),
    }

    Ok(())
}
