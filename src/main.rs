//! breakwater server binary.
//!
//! Loads configuration, installs logging, wires the dispatcher and serves the HTTP façade until
//! Ctrl+C or SIGTERM, letting in-flight requests finish.

use breakwater::telemetry::LogSink;
use breakwater::{
    logging, server, settings, BreakerRegistry, Dispatcher, HttpDownstream, RetryEngine, Settings,
};
use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

#[derive(Debug, Parser)]
#[command(name = "breakwater", version, about = "Circuit breaker and retry gateway for a flaky downstream")]
struct Cli {
    /// TOML configuration file; built-in defaults are used when omitted.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override `server.bind_address`.
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(bind) = cli.bind {
        settings.server.bind_address = bind;
        settings.validate()?;
    }

    logging::init(&settings.logging)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "breakwater starting");
    tracing::info!(
        bind_address = %settings.server.bind_address,
        downstream = %settings.downstream.name,
        base_url = %settings.downstream.base_url,
        failure_threshold = settings.breaker.failure_threshold,
        max_retries = settings.retry.max_retries,
        "Configuration loaded"
    );

    let downstream = HttpDownstream::new(
        settings.downstream.name.clone(),
        settings.downstream.base_url.clone(),
        settings.attempt_timeout()?,
    )?;
    let dispatcher = Dispatcher::builder(BreakerRegistry::new().with_sink(LogSink))
        .downstream(downstream, settings.breaker_config()?)
        .retry(RetryEngine::new().with_sink(LogSink), settings.retry_config()?)
        .user_routes(settings.user_routes())
        .build()?;

    let listener = TcpListener::bind(&settings.server.bind_address).await?;
    server::serve(listener, dispatcher, server::shutdown_signal()).await?;

    Ok(())
}
