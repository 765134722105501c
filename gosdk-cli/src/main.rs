//! gosdk-wrapper CLI
//!
//! Entry point for the `gosdk` command-line tool.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use gosdk_core::{release_abandoned_locks, Session, Settings};
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "gosdk")]
#[command(about = "Fetch, cache and run Go SDKs", version)]
struct Cli {
    /// Path to settings file (default: ./gosdk.json)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Log debug details
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Never touch the network; use only a cached SDK
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Make sure the Go SDK is cached and print its paths
    CacheSdk,

    /// Run the configured SDK tool
    Exec {
        /// Extra arguments appended to the configured ones (after --)
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Delete folders, staying inside the project folder
    DeleteFolders {
        #[arg(required = true)]
        folders: Vec<PathBuf>,
    },

    /// Make files readable, writable and executable by everyone
    GiveAllPermissions {
        /// Folder the patterns are relative to
        directory: PathBuf,

        /// Glob of files to include (default: **/*)
        #[arg(long = "include")]
        includes: Vec<String>,

        /// Glob of files to exclude
        #[arg(long = "exclude")]
        excludes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    // `gosdk` also matches the `gosdk_core` targets
    let crate_level = if cli.verbose { "gosdk=debug" } else { "gosdk=info" };
    let mut filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    if let Ok(directive) = crate_level.parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let session = Session::new(cli.offline);
    let cancel = session.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            cancel.cancel();
        }
    });

    let result = run(cli, session).await;

    let released = release_abandoned_locks();
    if released > 0 {
        warn!("Released {} abandoned locks", released);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, session: Session) -> anyhow::Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    settings.validate()?;

    match cli.command {
        Commands::CacheSdk => commands::cache_sdk::run(&settings, session).await,
        Commands::Exec { args } => commands::exec::run(&settings, session, args).await,
        Commands::DeleteFolders { folders } => {
            commands::folders::delete(&settings, folders).await
        }
        Commands::GiveAllPermissions {
            directory,
            includes,
            excludes,
        } => commands::folders::give_all_permissions(&settings, directory, includes, excludes).await,
    }
}
