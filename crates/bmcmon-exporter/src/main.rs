use anyhow::Result;
use bmcmon_exporter::app::{build_app, AppState};
use bmcmon_exporter::mapper::Mapper;
use bmcmon_exporter::metrics;
use bmcmon_rmcp::RmcpConnector;
use bmcmon_session::{CredentialsProvider, FileRetriever, Provider};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// A multi-target IPMI v2.0 Prometheus exporter for BMCs.
#[derive(Parser)]
#[command(name = "bmcmon", about = "An IPMI v2.0 Prometheus exporter.", version)]
struct Args {
    /// Address on which to expose metrics.
    #[arg(long = "web.listen-address", default_value = ":9622")]
    listen_address: String,

    /// BMC scrapes return early after this long, end to end. Keep it
    /// slightly shorter than the scraper's own timeout so partial results
    /// still make it back.
    #[arg(long = "scrape.timeout", default_value = "9s", value_parser = humantime::parse_duration)]
    scrape_timeout: Duration,

    /// Budget for one collection inside a target's event loop.
    #[arg(long = "collect.timeout", default_value = "9s", value_parser = humantime::parse_duration)]
    collect_timeout: Duration,

    /// YAML file mapping BMC addresses to their credentials.
    #[arg(long = "secrets.static", default_value = "secrets.yml")]
    secrets: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("bmcmon=info".parse()?))
        .init();

    let args = Args::parse();
    metrics::init();

    let retriever = FileRetriever::load(&args.secrets)?;
    tracing::info!(
        targets = retriever.len(),
        secrets = %args.secrets.display(),
        "loaded credentials"
    );

    let provider: Arc<dyn Provider> =
        Arc::new(CredentialsProvider::new(retriever, RmcpConnector::new()));
    let mapper = Arc::new(Mapper::new(provider, args.collect_timeout));

    let state = AppState {
        mapper: Arc::clone(&mapper),
        scrape_timeout: args.scrape_timeout,
    };
    let app = build_app(state);

    let listen = normalize_listen_addr(&args.listen_address);
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(addr = %listen, version = metrics::VERSION, "bmcmon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // in-flight requests have drained; tear down every cached BMC session
    tracing::info!("closing targets");
    mapper.close().await;
    tracing::info!("shut down cleanly");
    Ok(())
}

/// Accepts the conventional `:9622` shorthand for "all interfaces".
fn normalize_listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
