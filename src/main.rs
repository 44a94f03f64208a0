//! `drpg` command-line entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use drpg::config::default_library_path;
use drpg::{Config, DrpgClient, NamingConfig, Syncer};

/// Download and keep up to date your purchases from DriveThruRPG
#[derive(Parser, Debug)]
#[command(name = "drpg")]
#[command(about, long_about = None, version)]
#[command(after_help = "Instead of options you can use environment variables: prefix an \
    option with DRPG_, capitalize it and replace '-' with '_'. For instance \
    '--use-checksums' becomes 'DRPG_USE_CHECKSUMS=true'.")]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Your DriveThruRPG API token
    #[arg(short, long, env = "DRPG_TOKEN", hide_env_values = true)]
    token: String,

    /// Path to your downloads (default: <documents>/DRPG)
    #[arg(short = 'p', long, env = "DRPG_LIBRARY_PATH", value_name = "PATH")]
    library_path: Option<PathBuf>,

    /// Decide if a file needs to be downloaded based on checksums. Slower but more precise
    #[arg(short = 'c', long, env = "DRPG_USE_CHECKSUMS")]
    use_checksums: bool,

    /// Validate downloads by calculating checksums
    #[arg(short = 'v', long, env = "DRPG_VALIDATE")]
    validate: bool,

    /// How verbose the output should be
    #[arg(long, env = "DRPG_LOG_LEVEL", value_enum, ignore_case = true, default_value = "info")]
    log_level: LogLevel,

    /// Number of concurrent downloads
    #[arg(short = 'x', long, env = "DRPG_THREADS", default_value_t = 5)]
    threads: usize,

    /// Determine what should be downloaded, but do not download it
    #[arg(long, env = "DRPG_DRY_RUN")]
    dry_run: bool,

    /// Name files and directories the way that DriveThruRPG's client app does
    #[arg(long, env = "DRPG_COMPATIBILITY_MODE", conflicts_with = "omit_publisher")]
    compatibility_mode: bool,

    /// Omit the publisher name in the target path
    #[arg(long, env = "DRPG_OMIT_PUBLISHER")]
    omit_publisher: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Filter directives; HTTP internals stay quiet unless debugging
    fn directives(self) -> &'static str {
        match self {
            LogLevel::Debug => "drpg=debug,reqwest=info,hyper=info",
            LogLevel::Info => "drpg=info,reqwest=warn,hyper=warn",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl Cli {
    fn into_config(self) -> Config {
        Config {
            token: self.token,
            library_path: self.library_path.unwrap_or_else(default_library_path),
            naming: NamingConfig {
                compatibility_mode: self.compatibility_mode,
                omit_publisher: self.omit_publisher,
            },
            use_checksums: self.use_checksums,
            validate: self.validate,
            dry_run: self.dry_run,
            threads: self.threads,
            ..Config::default()
        }
    }
}

fn init_logging(level: LogLevel) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // RUST_LOG overrides --log-level
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level.directives()))?;
    // Debug output carries timestamps and targets; everything else prints bare messages
    let verbose = (level == LogLevel::Debug).then(|| fmt::layer().with_writer(std::io::stdout));
    let bare = (level != LogLevel::Debug).then(|| {
        fmt::layer()
            .without_time()
            .with_target(false)
            .with_level(false)
            .with_writer(std::io::stdout)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(verbose)
        .with(bare)
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.log_level) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let config = cli.into_config();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return ExitCode::from(2);
    }
    tracing::debug!(?config, "Starting");

    let client = match DrpgClient::new(&config) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "Could not create the catalog client");
            return ExitCode::from(2);
        }
    };

    let cancel = CancellationToken::new();
    let signal_task = drpg::cancel_on_signal(cancel.clone());
    let syncer = Syncer::new(config, Arc::new(client));
    let outcome = syncer.sync(cancel.clone()).await;
    // Stop listening for signals
    cancel.cancel();
    signal_task.abort();

    match outcome {
        Ok(report) => {
            if !report.stale_entries.is_empty() {
                tracing::info!(
                    count = report.stale_entries.len(),
                    "Local files not in the catalog were left in place"
                );
            }
            ExitCode::from(u8::try_from(report.exit_code()).unwrap_or(1))
        }
        Err(e) => {
            tracing::error!(error = %e, "Sync failed");
            ExitCode::from(if e.is_fatal() { 2 } else { 1 })
        }
    }
}
