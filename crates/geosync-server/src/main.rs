use clap::Parser;
use geosync_remote::{AppConfig, CONFIG_ENV_VAR};
use geosync_server::AppState;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "geosync-server", about = "geosync HTTP server")]
struct Cli {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Configuration file (defaults to $GEOSYNC_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path),
        None => AppConfig::load_from_env(CONFIG_ENV_VAR),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let addr = format!("{}:{}", cli.bind, cli.port);
    info!("starting geosync-server on {addr}");
    if let Some(path) = &config.audit.path {
        info!("audit log: {}", path.display());
    }
    let state = Arc::new(AppState::from_config(config));
    match geosync_server::run_server(&state, &addr) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("cannot serve on {addr}: {e}");
            ExitCode::FAILURE
        }
    }
}
