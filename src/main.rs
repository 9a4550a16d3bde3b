use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ratedispatch::config::DispatcherConfig;
use ratedispatch::dispatch::Dispatcher;

/// Dispatch a batch of simulated requests at a fixed rate.
#[derive(Debug, Parser)]
#[command(name = "ratedispatch", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of requests in the batch
    #[arg(short = 'n', long)]
    requests: Option<usize>,

    /// Requests admitted per window
    #[arg(short, long)]
    rate: Option<u32>,

    /// Requests admitted immediately before pacing begins
    #[arg(short, long)]
    burst: Option<u32>,

    /// Window length in milliseconds (default: 1000 / rate)
    #[arg(long)]
    window_ms: Option<u64>,

    /// Simulated processing time per request in milliseconds
    #[arg(long)]
    work_ms: Option<u64>,

    /// Retries per failed request
    #[arg(long)]
    retries: Option<u32>,

    /// Per-attempt timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Do not print per-request progress lines
    #[arg(short, long)]
    quiet: bool,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    /// Apply command-line overrides on top of file and environment settings.
    fn apply(&self, config: &mut DispatcherConfig) {
        if let Some(requests) = self.requests {
            config.batch.requests = requests;
        }
        if let Some(rate) = self.rate {
            config.pacing.rate = rate;
        }
        if let Some(burst) = self.burst {
            config.pacing.burst = burst;
        }
        if let Some(window_ms) = self.window_ms {
            config.pacing.window_ms = Some(window_ms);
        }
        if let Some(work_ms) = self.work_ms {
            config.work.duration_ms = work_ms;
        }
        if let Some(retries) = self.retries {
            config.work.max_retries = retries;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.work.task_timeout_ms = Some(timeout_ms);
        }
        if self.quiet || self.json {
            config.output.progress = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for progress and the summary
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => DispatcherConfig::load(path)?,
        None => DispatcherConfig::from_env()?,
    };
    cli.apply(&mut config);
    config.validate()?;
    info!(
        requests = config.batch.requests,
        rate = config.pacing.rate,
        burst = config.pacing.burst,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    let dispatcher = Dispatcher::from_config(&config)?.with_cancellation(cancel.clone());

    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    let report = dispatcher.run(config.labels()).await?;
    signal_task.abort();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
    }

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling dispatch");
        }
        _ = terminate => {
            info!("Received SIGTERM, cancelling dispatch");
        }
    }
}
