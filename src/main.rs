use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nostalgia::{Config, ExitStatus, GooglePhotosClient, SyncEngine};

#[derive(Parser)]
#[command(name = "nostalgia")]
#[command(about = "One-way sync of local media directories into remote photo albums")]
#[command(version)]
struct Cli {
    /// Source root; every subdirectory becomes one album
    source: Option<PathBuf>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Report what would be uploaded without contacting the photo service
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                // Usage errors share the startup fault code; 2 is kept for task panics
                let _ = e.print();
                std::process::exit(ExitStatus::SyncFault.code());
            }
        },
    };

    let status = match std::panic::catch_unwind(move || start(cli)) {
        Ok(status) => status,
        Err(_) => ExitStatus::SyncFault,
    };

    // Exit right away; in-flight uploads are not waited for
    std::process::exit(status.code());
}

fn start(cli: Cli) -> ExitStatus {
    let Some(source) = cli.source else {
        eprintln!("nothing to sync: missing source directory argument");
        return ExitStatus::SyncFault;
    };

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitStatus::OrchestrationFailure;
        }
    };

    init_logging(cli.verbose, &config);
    info!("Starting Nostalgia v{}", env!("CARGO_PKG_VERSION"));

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            return ExitStatus::OrchestrationFailure;
        }
    };

    let dry_run = cli.dry_run;
    let task = runtime.spawn(async move {
        if dry_run {
            cmd_dry_run(&config, &source).await
        } else {
            cmd_sync(config, source).await
        }
    });

    let status = ExitStatus::from_task(runtime.block_on(task));
    runtime.shutdown_background();
    status
}

/// Initialize logging: LOG_LEVEL wins, then --verbose, then the config file
fn init_logging(verbose: bool, config: &Config) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"))
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

/// Sync every directory under the source root
async fn cmd_sync(config: Config, source: PathBuf) -> Result<()> {
    let client = GooglePhotosClient::new(&config).context("Failed to set up photo service")?;
    let engine = SyncEngine::new(config, Arc::new(client), source)?;

    let summary = engine.run().await?;

    println!("🎉 Synchronization Complete!");
    println!("   📁 Directories: {}", summary.directories.len());
    println!("   ⬆️  Added: {}", summary.added());
    println!("   ⏭️  Already synced: {}", summary.ignored());
    println!("   📦 Uploaded bytes: {}", summary.uploaded_bytes());
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    let abandoned: Vec<_> = summary
        .directories
        .iter()
        .flat_map(|d| d.abandoned.iter().map(move |f| (d.directory.as_str(), f)))
        .collect();
    if !abandoned.is_empty() {
        println!("\n❌ Gave up on:");
        for (directory, file) in abandoned {
            println!("   {}/{}", directory, file);
        }
    }

    Ok(())
}

/// Show what a sync would upload
async fn cmd_dry_run(config: &Config, source: &Path) -> Result<()> {
    let plans = SyncEngine::dry_run(config, source).await?;

    println!("🔍 Dry run - nothing will be uploaded");
    for plan in &plans {
        println!(
            "   📁 {}: {} to upload ({} bytes), {} already synced",
            plan.directory,
            plan.to_upload.len(),
            plan.pending_bytes(),
            plan.ignored
        );
    }

    let to_upload: usize = plans.iter().map(|p| p.to_upload.len()).sum();
    println!("\n📈 Summary: {} files to upload in {} directories", to_upload, plans.len());

    Ok(())
}
