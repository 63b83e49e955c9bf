mod config;
mod directory;
mod error;
mod identity;
mod launcher;
mod lines;
mod logging;
mod pool;
mod probe;
mod select_or_cancel;
mod sink;
#[cfg(test)]
mod testing;
mod types;

use clap::Parser;
use config::{EndpointFilter, Settings};
use directory::{EndpointDirectory, KubectlDirectory, SnapshotDirectory};
use identity::SystemIdentity;
use launcher::{Launcher, SystemLauncher};
use logging::{init_logging, LogFormat};
use pool::PingerPool;
use sink::{run_sink, OutputFormat};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::{signal, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
struct Args {
    #[arg(
        long,
        env = "NETCHECK_UPDATE_CONFIG_INTERVAL_SEC",
        default_value = "30",
        value_parser = validate_interval,
        help = "Interval in seconds between asking the cluster for the ping pods"
    )]
    update_config_interval_sec: u64,

    #[arg(
        long,
        env = "NETCHECK_PING_INTERVAL_SEC",
        default_value = "1",
        value_parser = validate_interval,
        help = "Passed to ping as its -i parameter"
    )]
    ping_interval_sec: u64,

    #[arg(long, env = "NETCHECK_NAMESPACE", default_value = "monitoring")]
    namespace: String,

    /// Case-insensitive name prefix of the pods to probe
    #[arg(long, env = "NETCHECK_PODS_PREFIX", default_value = "kubernetes-network-check")]
    pods_prefix: String,

    #[arg(long, env = "NETCHECK_PING_PATH", default_value = "/bin/ping")]
    ping_path: String,

    #[arg(long, env = "NETCHECK_KUBECTL_PATH", default_value = "kubectl")]
    kubectl_path: String,

    /// Read the pod list from this JSON file on every refresh instead of running kubectl
    #[arg(long, env = "NETCHECK_PODS_FILE")]
    pods_file: Option<PathBuf>,

    #[arg(long, env = "NETCHECK_OUTPUT_FORMAT", value_enum, default_value = "json")]
    output_format: OutputFormat,

    #[arg(long, env = "NETCHECK_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Used when RUST_LOG is not set
    #[arg(long, env = "NETCHECK_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "NETCHECK_CHANNEL_CAPACITY", default_value = "1024")]
    channel_capacity: usize,

    /// Time a ping process gets to exit after SIGTERM before it is killed
    #[arg(long, env = "NETCHECK_STOP_GRACE_MS", default_value = "2000")]
    stop_grace_ms: u64,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            filter: EndpointFilter::new(self.namespace.clone(), self.pods_prefix.clone()),
            refresh_interval: Duration::from_secs(self.update_config_interval_sec),
            ping_interval_secs: self.ping_interval_sec,
            ping_path: self.ping_path.clone(),
            channel_capacity: self.channel_capacity,
            stop_grace: Duration::from_millis(self.stop_grace_ms),
        }
    }
}

fn validate_interval(s: &str) -> Result<u64, String> {
    match s.parse::<u64>() {
        Ok(0) => Err("interval must be at least 1 second".into()),
        Ok(secs) => Ok(secs),
        Err(e) => Err(format!("invalid interval '{}': {}", s, e)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_format, &args.log_level)?;

    let settings = args.settings();
    settings.validate()?;

    let build = option_env!("GIT_COMMIT_HASH").unwrap_or("unknown");
    info!("netcheck {} ({})", env!("CARGO_PKG_VERSION"), build);
    info!("updateConfigIntervalSec = {}", args.update_config_interval_sec);
    info!("pingIntervalSec = {}", args.ping_interval_sec);
    info!("namespace = {}", args.namespace);
    info!("podsPrefix = {}", args.pods_prefix);

    let launcher: Arc<dyn Launcher> = Arc::new(SystemLauncher);
    let directory: Arc<dyn EndpointDirectory> = match &args.pods_file {
        Some(path) => {
            info!("reading pods from {}", path.display());
            Arc::new(SnapshotDirectory::new(path))
        }
        None => Arc::new(KubectlDirectory::new(
            launcher.clone(),
            args.kubectl_path.clone(),
            settings.refresh_interval,
        )),
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let interrupt = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            interrupt.cancel();
        }
    });

    let (records_tx, records_rx) = mpsc::channel(settings.channel_capacity);

    let sink_handle = tokio::spawn({
        let sink_shutdown = shutdown.clone();
        let format = args.output_format;
        async move {
            let result = run_sink(records_rx, tokio::io::stdout(), format).await;
            if let Err(e) = &result {
                error!("output sink failed: {}", e);
                sink_shutdown.cancel();
            }
            result
        }
    });

    let pool = PingerPool::new(
        directory,
        Arc::new(SystemIdentity),
        launcher,
        settings,
        records_tx,
        shutdown.clone(),
    );
    let pool_result = pool.run().await;

    // The pool is gone, so the channel is closed and the sink drains what is left.
    match sink_handle.await {
        Ok(Ok(written)) => info!("wrote {} records", written),
        Ok(Err(_)) => {}
        Err(e) => error!("output sink task failed: {}", e),
    }

    pool_result?;
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    result = signal::ctrl_c() => {
                        if let Err(e) = result {
                            error!("Failed to listen for shutdown signal: {}", e);
                        }
                    }
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => error!("Failed to listen for SIGTERM: {}", e),
        }
    }

    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
