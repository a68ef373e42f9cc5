mod drivers;
mod parsers;
mod server;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use livecap_api::AppState;
use livecap_core::bootstrap::{init_services, load_config, LoadOptions};
use livecap_core::logging;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Multi-platform live-stream recorder.
#[derive(Debug, Parser)]
#[command(name = "livecap", version, about)]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long)]
    config: Option<String>,

    /// Output directory for recordings.
    #[arg(long)]
    output: Option<String>,

    /// Room URL to watch; repeatable.
    #[arg(long = "input")]
    input: Vec<String>,

    /// Verbose logging and diagnostics.
    #[arg(long)]
    debug: bool,
}

const EXIT_STARTUP_FAILURE: u8 = 1;
const EXIT_CONFIG_INVALID: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&LoadOptions {
        config_file: cli.config.clone(),
        output_dir: cli.output.clone(),
        input_urls: cli.input.clone(),
        debug: cli.debug,
    }) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config: {err}");
            return ExitCode::from(EXIT_CONFIG_INVALID);
        }
    };

    if let Err(err) = config.verify() {
        eprintln!("config validation failed: {err}");
        return ExitCode::from(EXIT_CONFIG_INVALID);
    }

    if let Err(err) = logging::init_logging(config.debug, &config.log) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::from(EXIT_STARTUP_FAILURE);
    }

    match run(config).await {
        Ok(()) => {
            info!("bye");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "startup failed");
            ExitCode::from(EXIT_STARTUP_FAILURE)
        }
    }
}

async fn run(config: livecap_core::config::Config) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "livecap starting");

    // One pooled HTTP client shared by drivers and the native downloader.
    let timeout = Duration::from_micros(config.timeout_in_us.max(1));
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()?;

    let registry = Arc::new(drivers::build_driver_registry(client.clone()));
    if registry.supported_hosts().is_empty() {
        warn!("no platform drivers registered; rooms cannot be polled");
    }
    let ffmpeg_default = if config.ffmpeg_path.is_empty() {
        "ffmpeg".to_string()
    } else {
        config.ffmpeg_path.clone()
    };
    let resolver = Arc::new(parsers::build_parser_resolver(&ffmpeg_default, client));

    let rpc_enabled = config.rpc.enable;
    let bind = config.rpc.bind.clone();

    let shutdown = CancellationToken::new();
    let services = init_services(config, registry, resolver, shutdown.clone()).await?;

    // Self-heal: write the loaded document back so missing keys gain
    // defaults and comments.
    if let Err(err) = services.store.save() {
        warn!(error = %err, "failed to rewrite config file");
    }

    let state = AppState::new(services.clone());

    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
    };

    if rpc_enabled {
        let mut http = tokio::spawn(server::run_http(state.clone(), bind, shutdown.clone()));
        tokio::select! {
            // A server that stops on its own (e.g. bind failure) ends the
            // process; a signal shuts it down gracefully.
            result = &mut http => result??,
            () = ctrl_c => {
                shutdown.cancel();
                match http.await {
                    Ok(result) => result?,
                    Err(err) => error!(error = %err, "http server task aborted"),
                }
            }
        }
    } else {
        ctrl_c.await;
    }

    services.close().await;
    Ok(())
}
