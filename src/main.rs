use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use mediasync::catalog::HttpCatalog;
use mediasync::model::MediaKind;
use mediasync::notify;
use mediasync::placement::PlaceOptions;
use mediasync::process::{ProcessRunner, TokioRunner};
use mediasync::transcode::{Streamable, Transcoder};
use mediasync::{Config, Orchestrator};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file.
    #[arg(long, env = "MEDIASYNC_CONFIG", default_value = "~/.config/mediasync/config.toml")]
    config: PathBuf,
    /// Log what would happen without encoding, moving or registering anything.
    #[arg(long)]
    dry_run: bool,
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile TV, then movies, and report errors.
    Run,
    /// Reconcile a single half of the library.
    Reconcile { kind: MediaKind },
    /// Make one file streamable.
    Encode {
        file: PathBuf,
        #[arg(long)]
        keep_original: bool,
        #[arg(long)]
        no_suffix: bool,
    },
    /// Print what the encoder sees in a file.
    Probe { file: PathBuf },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    human_panic::setup_panic!();
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .init();

    let config_path = shellexpand::path::tilde(&args.config);
    let config = Config::load(&config_path)?;
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioRunner::new(config.encoder.timeout));

    match args.command {
        Command::Run => {
            let orchestrator = orchestrator(config, runner, args.dry_run)?;
            let errors = orchestrator.run().await?;
            info!("Finished with {} error(s)", errors.len());
        }
        Command::Reconcile { kind } => {
            let orchestrator = orchestrator(config, runner, args.dry_run)?;
            let errors = orchestrator.reconciler(kind).run().await?;
            info!("Finished {kind} with {} error(s)", errors.len());
        }
        Command::Encode {
            file,
            keep_original,
            no_suffix,
        } => {
            let transcoder = Transcoder::new(&config, runner)?;
            let options = PlaceOptions {
                remove_original: !keep_original,
                dry_run: args.dry_run,
                append_suffix: !no_suffix,
            };
            match transcoder.make_streamable(&file, options).await? {
                Streamable::Encoded(path) => info!("Streamable file at '{}'", path.display()),
                Streamable::Skipped(reason) => warn!("Skipped '{}': {reason}", file.display()),
                Streamable::Failed(e) => {
                    error!("{e}");
                    anyhow::bail!("failed to make '{}' streamable", file.display());
                }
            }
        }
        Command::Probe { file } => {
            let transcoder = Transcoder::new(&config, runner)?;
            let result = transcoder
                .probe(&file)
                .await
                .with_context(|| format!("probe '{}'", file.display()))?;
            println!("{result:#?}");
        }
    }
    Ok(())
}

fn orchestrator(
    config: Config,
    runner: Arc<dyn ProcessRunner>,
    dry_run: bool,
) -> Result<Orchestrator> {
    let catalog = Arc::new(HttpCatalog::new(&config.catalog).context("catalog client")?);
    let notifier = Arc::from(notify::from_config(&config.email).context("email notifier")?);
    Ok(Orchestrator::new(config, catalog, notifier, runner, dry_run)?)
}
