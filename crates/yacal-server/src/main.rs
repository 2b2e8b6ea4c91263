use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing::info;
use yacal_core::{TracingConfig, TracingError, init_tracing};
use yacal_server::{AppConfig, AppState, Cli, ConfigError, SignalHandler, StoreError, create_app, open_store};

#[derive(Debug, Error)]
enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("logging: {0}")]
    Tracing(#[from] TracingError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn tracing_config(cli: &Cli, config: &AppConfig) -> Result<TracingConfig, ConfigError> {
    let mut tracing = if cli.debug {
        TracingConfig::debug()
    } else {
        TracingConfig::server()
    };
    if let Some(format) = config.logging.output_format()? {
        tracing = tracing.with_format(format);
    }
    if let Some(level) = &config.logging.level {
        tracing = tracing.with_env_filter(level.clone());
    }
    Ok(tracing)
}

async fn run(cli: Cli) -> Result<(), StartupError> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    init_tracing(tracing_config(&cli, &config)?)?;

    let store = open_store(&config.store).await?;
    let state = AppState::from_config(&config, store)?;

    let signals = SignalHandler::new();
    signals.spawn_listener()?;

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, backend = ?config.store.backend, "yacal server listening");

    axum::serve(
        listener,
        create_app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signals.shutdown())
    .await?;

    info!("server stopped");
    Ok(())
}
