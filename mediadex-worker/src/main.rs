//! `mediadex` command line: the thumbnail worker pool plus operator access to
//! reconcile, navigation and the thumbnail queue.

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use mediadex_core::VirtualPath;
use mediadex_core::navigation::Direction;
use mediadex_core::thumbs::{ThumbJobKind, ThumbnailWorkerPool};
use mediadex_worker::config::{Config, ConfigLoader, ConfigLoaderOptions, ConfigOverrides};
use mediadex_worker::init_tracing;
use mediadex_worker::runtime::{Runtime, connect_database};
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "mediadex", version)]
#[command(about = "Media catalog reconciliation, folder navigation and thumbnail workers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct GlobalArgs {
    /// Configuration file (defaults to ./mediadex.toml or ./config/mediadex.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Environment file to load before reading variables
    #[arg(long, env = "MEDIADEX_ENV_FILE", global = true)]
    env_file: Option<PathBuf>,

    /// Root of the media tree (overrides config)
    #[arg(long, global = true)]
    media_root: Option<PathBuf>,

    /// Thumbnail cache directory (overrides config)
    #[arg(long, global = true)]
    thumbnail_dir: Option<PathBuf>,

    /// PostgreSQL URL (overrides config)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Redis URL (overrides config)
    #[arg(long, global = true)]
    redis_url: Option<String>,

    /// Number of thumbnail workers (overrides config)
    #[arg(short, long, global = true)]
    workers: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the thumbnail worker pool until interrupted (default)
    Run,
    /// Reconcile one directory's records with the disk
    Reconcile {
        dir: String,
        /// Also queue the directory's thumbnail batch
        #[arg(long)]
        thumbnails: bool,
    },
    /// Print the next or previous media folder
    Adjacent {
        dir: String,
        #[arg(long, value_enum, default_value_t = DirectionArg::Next)]
        direction: DirectionArg,
    },
    /// Queue a thumbnail job for a directory, or a single file with --single
    Enqueue {
        target: String,
        #[arg(long)]
        single: bool,
    },
    /// Process queued jobs in this process until the queue is empty
    Drain,
    /// Print thumbnail completion events as they arrive
    Watch {
        /// Only events for files directly in this directory
        dir: Option<String>,
    },
    /// Move stored records after a rename or move on disk
    Relocate { from: String, to: String },
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply database migrations and exit
    Migrate,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    Next,
    Prev,
}

impl From<DirectionArg> for Direction {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::Next => Direction::Next,
            DirectionArg::Prev => Direction::Prev,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(&cli.global)?;
    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Db(DbCommand::Migrate) => run_db_migrate(&config).await,
        command => {
            let shutdown = CancellationToken::new();
            let runtime = Runtime::build(config, shutdown.clone()).await?;
            let result = dispatch(&runtime, command).await;
            shutdown.cancel();
            result
        }
    }
}

fn load_config(args: &GlobalArgs) -> anyhow::Result<Config> {
    let options = ConfigLoaderOptions {
        config_path: args.config.clone(),
        env_file: args.env_file.clone(),
        overrides: ConfigOverrides {
            media_root: args.media_root.clone(),
            thumbnail_dir: args.thumbnail_dir.clone(),
            database_url: args.database_url.clone(),
            redis_url: args.redis_url.clone(),
            workers: args.workers,
        },
    };
    ConfigLoader::with_options(options)
        .load()
        .context("failed to load configuration")
}

async fn run_db_migrate(config: &Config) -> anyhow::Result<()> {
    if connect_database(config).await?.is_none() {
        anyhow::bail!("no database configured (database.url, DATABASE_URL or --database-url)");
    }
    info!("Database migrations applied successfully");
    Ok(())
}

async fn dispatch(runtime: &Runtime, command: Command) -> anyhow::Result<()> {
    let library = runtime.library();
    match command {
        Command::Run => run_workers(runtime).await,
        Command::Reconcile { dir, thumbnails } => {
            let dir = parse_path(&dir)?;
            if thumbnails {
                let opened = library.open_directory(&dir).await?;
                print_json(&opened)?;
                drain_locally(runtime).await
            } else {
                print_json(&library.reconcile(&dir).await?)
            }
        }
        Command::Adjacent { dir, direction } => {
            let found = library
                .find_adjacent(&parse_path(&dir)?, direction.into())
                .await?;
            match found {
                Some(path) => println!("{path}"),
                None => println!("none"),
            }
            Ok(())
        }
        Command::Enqueue { target, single } => {
            let kind = if single {
                ThumbJobKind::Single
            } else {
                ThumbJobKind::Batch
            };
            let outcome = library.enqueue(kind, parse_path(&target)?).await?;
            print_json(&outcome)?;
            drain_locally(runtime).await
        }
        Command::Drain => {
            let outcomes = runtime.worker().drain().await?;
            print_json(&outcomes)
        }
        Command::Watch { dir } => watch(runtime, dir).await,
        Command::Relocate { from, to } => {
            let moved = library
                .relocate(&parse_path(&from)?, &parse_path(&to)?)
                .await?;
            println!("{moved}");
            Ok(())
        }
        Command::Db(_) => Ok(()),
    }
}

async fn run_workers(runtime: &Runtime) -> anyhow::Result<()> {
    if !runtime.is_shared() {
        warn!("no Redis configured; workers only see jobs queued by this process");
    }
    let settings = runtime.settings();
    let pool = ThumbnailWorkerPool::spawn(
        runtime.worker(),
        settings.workers,
        settings.poll_interval,
        runtime.shutdown_token(),
    );
    info!(workers = pool.len(), "thumbnail workers running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    let stats = pool.shutdown().await;
    info!(
        processed = stats.processed,
        generated = stats.generated,
        expired = stats.expired,
        failed = stats.failed,
        "thumbnail workers stopped"
    );
    Ok(())
}

/// Without a shared queue nobody else would ever pick the job up.
async fn drain_locally(runtime: &Runtime) -> anyhow::Result<()> {
    if runtime.is_shared() {
        return Ok(());
    }
    let outcomes = runtime.worker().drain().await?;
    print_json(&outcomes)
}

async fn watch(runtime: &Runtime, dir: Option<String>) -> anyhow::Result<()> {
    let library = runtime.library();
    let mut subscription = match dir {
        Some(dir) => library.subscribe_directory(parse_path(&dir)?),
        None => library.subscribe(),
    };
    if !runtime.is_shared() {
        warn!("no Redis configured; only events from this process are visible");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = subscription.recv() => match event {
                Some(event) => println!("{}", event.to_payload()?),
                None => break,
            },
        }
    }
    Ok(())
}

fn parse_path(raw: &str) -> anyhow::Result<VirtualPath> {
    VirtualPath::parse(raw).with_context(|| format!("invalid virtual path {raw:?}"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
