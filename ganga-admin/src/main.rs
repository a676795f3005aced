//! Ganga repository maintenance tool.
//!
//! Works on the files alone, so it needs none of the object classes:
//!   ganga-admin --location ~/gangadir/repository/user/LocalXML list
//!   ganga-admin --location ~/gangadir/repository/user/LocalXML sessions
//!   ganga-admin --config repo.toml reap-locks

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ganga_lock::{IdLock, SessionLockManager};
use ganga_repository::{IndexRecord, Layout, RepositoryConfig};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "ganga-admin")]
#[command(about = "Inspect and repair a shared Ganga repository")]
struct Args {
    /// Repository location (the directory holding `6.0/`)
    #[arg(short, long, default_value = "repository")]
    location: PathBuf,

    /// Registry name
    #[arg(short, long, default_value = "jobs")]
    registry: String,

    /// TOML file with repository settings, replacing --location and --registry
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored objects as their index files describe them
    List,
    /// Show other live sessions and the objects they hold
    Sessions,
    /// Remove locks left behind by dead sessions
    ReapLocks,
    /// Print the next id the shared counter will hand out
    Counter,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let config = load_config(&args)?;
    debug!(location = %config.location.display(), registry = %config.name, "using repository");
    match args.command {
        Command::List => list(&config),
        Command::Sessions => sessions(&config),
        Command::ReapLocks => reap_locks(&config),
        Command::Counter => counter(&config),
    }
}

fn load_config(args: &Args) -> Result<RepositoryConfig> {
    match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            Ok(RepositoryConfig::from_toml_str(&text)?)
        }
        None => Ok(RepositoryConfig::new(&args.location, &args.registry)),
    }
}

fn layout(config: &RepositoryConfig) -> Result<Layout> {
    let layout = Layout::new(&config.location, &config.name, &config.data_file_name);
    if !layout.root().is_dir() {
        bail!("no repository at {}", layout.root().display());
    }
    Ok(layout)
}

fn list(config: &RepositoryConfig) -> Result<()> {
    let layout = layout(config)?;
    let slots = layout
        .scan()
        .with_context(|| format!("cannot list {}", layout.root().display()))?;

    for (&id, &has_index) in &slots.objects {
        if !has_index {
            println!("{id:>8}  <no index>");
            continue;
        }
        match IndexRecord::read(&layout.index_path(id)) {
            Ok(record) => {
                let cache: Vec<String> = record
                    .cache
                    .iter()
                    .filter(|(name, _)| name.as_str() != "id")
                    .map(|(name, literal)| format!("{name}={literal}"))
                    .collect();
                println!(
                    "{id:>8}  {}.{:<16} {}",
                    record.category,
                    record.name,
                    cache.join(" ")
                );
            }
            Err(e) => println!("{id:>8}  <{e}>"),
        }
    }
    println!("{} objects", slots.objects.len());
    if !slots.orphan_indexes.is_empty() {
        println!("{} index files without data", slots.orphan_indexes.len());
    }
    Ok(())
}

fn start_session(config: &RepositoryConfig) -> Result<SessionLockManager> {
    SessionLockManager::start(config.lock_config())
        .with_context(|| format!("cannot join the session directory of {}", config.location.display()))
}

fn sessions(config: &RepositoryConfig) -> Result<()> {
    let layout = layout(config)?;
    let lock = start_session(config)?;
    let others = lock.other_sessions();
    if others.is_empty() {
        println!("no other live sessions");
    }
    for session in &others {
        println!("{session}");
    }

    let slots = layout.scan().context("cannot list objects")?;
    for &id in slots.objects.keys() {
        if let Some(holder) = lock.get_lock_session(id) {
            println!("{id:>8}  locked by {holder}");
        }
    }
    lock.shutdown();
    Ok(())
}

fn reap_locks(config: &RepositoryConfig) -> Result<()> {
    let lock = start_session(config)?;
    let reaped = lock.reap_locks();
    lock.shutdown();
    if !reaped {
        bail!("some stale locks could not be removed");
    }
    info!("stale locks removed");
    Ok(())
}

fn counter(config: &RepositoryConfig) -> Result<()> {
    let path = config.lock_config().count_path();
    match fs::read_to_string(&path) {
        Ok(text) => {
            let next: u64 = text
                .trim()
                .parse()
                .with_context(|| format!("corrupt counter file {}", path.display()))?;
            println!("{next}");
        }
        Err(e) if e.kind() == ErrorKind::NotFound => println!("0"),
        Err(e) => return Err(e).with_context(|| format!("cannot read {}", path.display())),
    }
    Ok(())
}
