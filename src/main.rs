//! `vidsync`: keeps local mirrors of online video collections up to date.

use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use exn::{OptionExt, ResultExt};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vidsync_config::Config;
use vidsync_library::error::ErrorKind as LibraryErrorKind;
use vidsync_library::{Context, Settings, TaskControl, UpdateEvent, UpdateOutcome, folder_size, format_size};
use vidsync_manifest::ManifestStore;
use vidsync_risk::{Recovery, RiskMonitor};
use vidsync_source::CommandSource;
use vidsync_transfer::Downloader;

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("an external tool is missing")]
    Setup,
    #[display("synchronization failed")]
    Sync,
    #[display("could not read collection")]
    Status,
}

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[derive(Parser)]
#[command(name = "vidsync", version, about)]
struct Cli {
    /// Configuration file, layered over the user configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mirror the collection at URL, creating its directory on first use.
    Sync {
        url: String,
        /// Output root (defaults to the configured one).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Update every collection under the output root, or a single one.
    Update {
        #[arg(short, long, conflicts_with = "dir")]
        output: Option<PathBuf>,
        /// A single collection directory.
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Show download progress for a collection directory.
    Status { dir: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = match cli.verbose {
        true => EnvFilter::new("debug"),
        false => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    // Has to be resolved while this is still the only thread.
    vidsync_manifest::pubdate::local_offset();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "Could not start the async runtime");
            return ExitCode::FAILURE;
        },
    };
    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = ?err, "vidsync failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    match cli.command {
        Command::Status { dir } => status(&dir),
        Command::Sync { url, output } => {
            let root = output.unwrap_or_else(|| config.output_dir.clone());
            let (ctx, control) = (context(&config)?, control());
            sync(&ctx, &root, &url, &control).await
        },
        Command::Update { output, dir } => {
            let (ctx, control) = (context(&config)?, control());
            match dir {
                Some(dir) => update_one(&ctx, &dir, &control).await,
                None => update_all(&ctx, &output.unwrap_or_else(|| config.output_dir.clone()), &control).await,
            }
        },
    }
}

fn context(config: &Config) -> Result<Context> {
    let source = CommandSource::discover(&config.source.program)
        .or_raise(|| ErrorKind::Setup)?
        .with_list_args(config.source.args.clone());
    let downloader = Downloader::discover(&config.downloader.program)
        .or_raise(|| ErrorKind::Setup)?
        .with_grace(config.downloader.terminate_grace());
    let settings = Settings {
        credential: config.credential(),
        extra_args: config.transfer_args(),
        max_attempts: config.downloader.max_attempts,
        retry_step: Duration::from_secs(config.downloader.retry_step_secs),
        retry_cap: Duration::from_secs(config.downloader.retry_cap_secs),
        item_cooldown: config.pacing.item_cooldown(),
        failure_cooldown: config.pacing.failure_cooldown(),
        size_recheck: config.pacing.size_recheck(),
    };
    let risk = Arc::new(RiskMonitor::new(config.probe_policy()));
    Ok(Context::new(Arc::new(source), Arc::new(downloader), risk).with_settings(settings))
}

/// Task control that Ctrl-C cancels, with progress relayed to the log.
fn control() -> TaskControl {
    let control = TaskControl::new();
    let token = control.token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing up");
            token.cancel();
        }
    });
    let mut progress = control.subscribe();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let current = *progress.borrow_and_update();
            tracing::info!(
                downloaded = current.downloaded,
                total = current.total,
                "Progress {}%",
                current.percent
            );
        }
    });
    control
}

/// Waits out confirmed throttling. `true` when it is worth trying again.
async fn recover(ctx: &Context, control: &TaskControl) -> bool {
    tracing::warn!("Rate limiting in effect; waiting for it to lift");
    match ctx.risk.await_recovery(ctx.source.as_ref(), control.token()).await {
        Recovery::Recovered => true,
        Recovery::StillThrottled => {
            tracing::error!("Rate limiting did not lift; try again later");
            false
        },
        Recovery::Cancelled => false,
    }
}

/// Turns a stop request into a clean exit.
fn finish(result: vidsync_library::error::Result<()>) -> Result<()> {
    match result {
        Err(err) if matches!(&*err, LibraryErrorKind::Cancelled) => {
            tracing::info!("Stopped");
            Ok(())
        },
        other => other.or_raise(|| ErrorKind::Sync),
    }
}

fn log_outcome(dir: &Path, outcome: &UpdateOutcome) {
    match outcome {
        UpdateOutcome::Fetched(summary) => tracing::info!(
            dir = %dir.display(),
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            unavailable = summary.unavailable,
            failed = summary.failed,
            "Collection updated"
        ),
        UpdateOutcome::Disabled(disabled) => {
            tracing::warn!(dir = %dir.display(), reason = %disabled.reason, "Collection disabled")
        },
        UpdateOutcome::Untouched => tracing::info!(dir = %dir.display(), "Collection left as it was"),
        UpdateOutcome::Paused => tracing::info!(dir = %dir.display(), "Collection paused"),
    }
}

async fn sync(ctx: &Context, root: &Path, url: &str, control: &TaskControl) -> Result<()> {
    loop {
        let outcome = match vidsync_library::sync_url(ctx, root, url, control).await {
            Ok(outcome) => outcome,
            Err(err) => return finish(Err(err)),
        };
        if outcome != UpdateOutcome::Paused {
            log_outcome(root, &outcome);
            return Ok(());
        }
        if !recover(ctx, control).await {
            return Ok(());
        }
    }
}

async fn update_one(ctx: &Context, dir: &Path, control: &TaskControl) -> Result<()> {
    loop {
        let outcome = match vidsync_library::update_one(ctx, dir, control).await {
            Ok(outcome) => outcome,
            Err(err) => return finish(Err(err)),
        };
        log_outcome(dir, &outcome);
        if outcome != UpdateOutcome::Paused || !recover(ctx, control).await {
            return Ok(());
        }
    }
}

async fn update_all(ctx: &Context, root: &Path, control: &TaskControl) -> Result<()> {
    loop {
        let mut paused = false;
        let mut events = std::pin::pin!(vidsync_library::update_all(ctx, root, control));
        while let Some(event) = events.next().await {
            match event {
                Ok(UpdateEvent::Started) => tracing::info!(root = %root.display(), "Starting update"),
                Ok(UpdateEvent::DiscoveryComplete(count)) => tracing::info!(count, "Collections to update"),
                Ok(UpdateEvent::Skipped(dir)) => tracing::debug!(dir = %dir.display(), "Skipped"),
                Ok(UpdateEvent::Updated(dir, outcome)) => log_outcome(&dir, &outcome),
                Ok(UpdateEvent::Failed(dir, err)) => tracing::warn!(dir = %dir.display(), error = ?err, "Collection failed"),
                Ok(UpdateEvent::Paused) => paused = true,
                Ok(UpdateEvent::Complete) => tracing::info!("Update complete"),
                Err(err) => return finish(Err(err)),
            }
        }
        if !paused || !recover(ctx, control).await {
            return Ok(());
        }
    }
}

fn status(dir: &Path) -> Result<()> {
    let store = ManifestStore::new(dir);
    let manifest = store
        .load()
        .or_raise(|| ErrorKind::Status)?
        .ok_or_raise(|| ErrorKind::Status)?;
    let stats = manifest.stats();
    println!("{}", dir.display());
    println!("  source:     {}", manifest.origin_url.as_deref().unwrap_or("(none)"));
    println!("  snapshot:   {}", manifest.generation.file_name());
    println!("  downloaded: {}/{} ({}%)", stats.downloaded, stats.total, stats.percent());
    println!("  pending:    {}", stats.pending);
    println!("  on disk:    {}", format_size(folder_size(dir)));
    Ok(())
}
