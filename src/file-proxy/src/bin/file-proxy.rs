//! file-proxy: caching proxy for control-plane release artifacts.

use anyhow::Context;
use clap::{Parser, Subcommand};
use file_proxy::download::{default_bin_dir, DownloadPlan, ProxyUrls};
use file_proxy::{server, Config, Fetcher};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "file-proxy", version, about = "Caching proxy for Kubernetes release artifacts")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory (overrides cache.directory)
    #[arg(long = "assets-dir", global = true)]
    assets_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    bind: Option<String>,

    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the cache (default)
    Serve,
    /// Pull control-plane binaries through a running proxy
    Download {
        #[arg(long = "bin-dir")]
        bin_dir: Option<PathBuf>,
    },
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(dir) = &args.assets_dir {
        config.cache.directory = dir.display().to_string();
    }
    if let Some(bind) = &args.bind {
        config.server.bind_address = bind.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;
    Ok(config)
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let grace = Duration::from_secs(config.server.shutdown_timeout_secs);

    let (addr, handle) = server::start_server(config, shutdown.clone()).await?;
    tracing::info!(address = %addr, "Press Ctrl+C to stop");

    server::shutdown_signal().await;
    shutdown.cancel();

    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow::anyhow!("server task failed: {}", e)),
        Err(_) => {
            tracing::warn!(timeout_secs = grace.as_secs(), "Graceful shutdown timed out");
            Ok(())
        }
    }
}

async fn run_download(config: Config, bin_dir: PathBuf) -> anyhow::Result<()> {
    let fetcher = Fetcher::new(&config.upstream)?;
    let plan = DownloadPlan::control_plane(
        &config.control_plane,
        &bin_dir,
        &ProxyUrls::from_config(&config),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        server::shutdown_signal().await;
        on_signal.cancel();
    });

    plan.run(&fetcher, &cancel).await?;
    tracing::info!(bin_dir = %bin_dir.display(), "Control-plane binaries installed");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command {
        None | Some(Command::Serve) => run_server(config).await,
        Some(Command::Download { bin_dir }) => {
            run_download(config, bin_dir.unwrap_or_else(default_bin_dir)).await
        }
    }
}
