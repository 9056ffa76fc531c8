//! rook-migrate
//!
//! Command line entry point for migrating Rook-Ceph clusters from hostpath
//! OSDs to block device OSDs.
//!
//! ```text
//! rook-migrate hostpath-to-block              run the migration
//! rook-migrate has-sufficient-blockdevices    exit 1 unless enough block OSDs exist
//! rook-migrate health                         print the current health verdict
//! rook-migrate wait-for-health [SECS]         block until Ceph is healthy
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rook_migrate::{
    KubeClusterApi, MigrationController, MigrationOutcome, ProgressSinkRef, Result, RookConfig,
    RookContext, TerminalProgress, TracingProgress,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Rook-Ceph hostpath to block device migration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML file overriding the default names, selectors and timings
    #[arg(long, env = "ROOK_MIGRATE_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace Rook runs in
    #[arg(long, env = "ROOK_NAMESPACE")]
    namespace: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Send progress to the log instead of the terminal
    #[arg(long, env = "PLAIN_PROGRESS")]
    plain_progress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Migrates rook hostpath data to block device volumes, changing the rook cluster config if needed
    HostpathToBlock,

    /// Exits 0 if block device OSDs run on enough nodes, 1 otherwise
    HasSufficientBlockdevices,

    /// Prints whether Ceph is currently healthy
    Health,

    /// Waits for Ceph to report healthy several times in a row
    WaitForHealth {
        /// Give up after this many seconds; waits until interrupted if unset
        timeout_secs: Option<u64>,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => RookConfig::from_file(path)?,
        None => RookConfig::default(),
    };
    if let Some(namespace) = &args.namespace {
        config.namespace = namespace.clone();
    }
    config.validate()?;

    info!("Starting {} {}", rook_migrate::NAME, rook_migrate::VERSION);
    info!("  Namespace: {}", config.namespace);
    info!("  CephCluster: {}", config.cluster_name);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let progress: ProgressSinkRef = if args.plain_progress {
        Arc::new(TracingProgress)
    } else {
        Arc::new(TerminalProgress::stdout())
    };

    let api = Arc::new(KubeClusterApi::try_default().await?);
    let ctx = RookContext::new(api, config, progress.clone(), cancel);
    let controller = MigrationController::new(ctx);

    match args.command {
        Command::HostpathToBlock => {
            match controller.run().await? {
                MigrationOutcome::NotRequired => info!("No hostpath OSDs to migrate"),
                MigrationOutcome::Completed { removed } => {
                    info!(count = removed.len(), "Hostpath OSDs removed")
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::HasSufficientBlockdevices => {
            if controller.has_sufficient_block_capacity().await? {
                progress.report("Sufficient block device OSDs are available");
                Ok(ExitCode::SUCCESS)
            } else {
                progress.report("Insufficient block device OSDs are available");
                Ok(ExitCode::from(1))
            }
        }
        Command::Health => {
            let (healthy, message) = controller.monitor().health().await?;
            if healthy {
                progress.report("Rook-Ceph is healthy");
                Ok(ExitCode::SUCCESS)
            } else {
                progress.report(&format!("Rook-Ceph is not healthy: {}", message));
                Ok(ExitCode::from(1))
            }
        }
        Command::WaitForHealth { timeout_secs } => {
            controller
                .monitor()
                .wait_for_health(timeout_secs.map(Duration::from_secs))
                .await?;
            progress.report("Rook-Ceph is healthy");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Cancel every wait in progress on Ctrl-C
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["kube=info", "hyper=warn", "tower=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // stdout belongs to the progress output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
