//! callmeter HTTP server
//!
//! Serves the metrics of an instrumented HTTP client, or probes a URL with it.

use callmeter::cli::{Cli, Command, generate_config_template};
use callmeter::{config::Config, handlers, telemetry};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => write_template(output.as_deref()),
        Some(Command::Probe { url, count }) => {
            let config = load(&cli.config)?;
            probe(config, &url, count).await
        }
        Some(Command::Serve) | None => {
            let config = load(&cli.config)?;
            serve(config).await
        }
    }
}

fn load(path: &str) -> Result<Config, Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_file(path)?;

    // Initialize telemetry
    telemetry::init(&config.observability.log_level);

    Ok(config)
}

fn write_template(output: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let template = generate_config_template();
    match output {
        Some(path) => {
            std::fs::write(path, template)?;
            eprintln!("Wrote configuration template to {path}");
        }
        None => print!("{template}"),
    }
    Ok(())
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        "Starting callmeter server on {}:{}",
        config.server.host,
        config.server.port
    );

    // Create socket address
    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([127, 0, 0, 1])),
        config.server.port,
    ));

    let state = handlers::AppState::new(Arc::new(config))?;
    let app = handlers::router(state);

    tracing::info!("Listening on {}", addr);
    tracing::info!("Prometheus metrics available at http://{}/metrics", addr);
    tracing::info!(
        "Snapshot available at http://{}{}",
        addr,
        handlers::endpoint::PATH
    );

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn probe(config: Config, url: &str, count: u32) -> Result<(), Box<dyn std::error::Error>> {
    let state = handlers::AppState::new(Arc::new(config))?;
    let client = state.client();

    for attempt in 1..=count {
        match client.send(client.get(url)).await {
            Ok(response) => {
                let status = response.status();
                let body = response.bytes().await?;
                tracing::info!(attempt, %status, bytes = body.len(), "Probe request completed");
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Probe request failed");
            }
        }
    }

    let snapshot = state.exporter().read();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(())
}
