use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use link_preserver::archiver::Archiver;
use link_preserver::config::Config;
use link_preserver::db::Database;

const USAGE: &str = "usage: link-preserver <link-id>...";

#[tokio::main]
async fn main() {
    match run().await {
        Ok(0) => {}
        Ok(failed) => {
            error!(failed, "Some links could not be preserved");
            std::process::exit(1);
        }
        Err(e) => {
            error!("Fatal error: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Archive every link id given on the command line, returning the failure count.
async fn run() -> Result<usize> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let link_ids = parse_link_ids(std::env::args().skip(1))?;

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    let config = Arc::new(config);

    info!(
        links = link_ids.len(),
        storage = %config.storage_dir.display(),
        remote_browser = config.browser_ws_url.is_some(),
        "Starting link-preserver"
    );

    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    let archiver = Archiver::with_defaults(Arc::clone(&config), db)
        .context("Failed to set up archiver")?;

    let work = async {
        let mut failed = 0;
        for link_id in &link_ids {
            match archiver.archive_link(*link_id).await {
                Ok(()) => info!(link_id, "Link preserved"),
                Err(e) => {
                    warn!(link_id, error = %e, "Link preservation failed");
                    failed += 1;
                }
            }
        }
        failed
    };

    tokio::select! {
        failed = work => Ok(failed),
        () = shutdown_signal() => {
            info!("Shutting down...");
            anyhow::bail!("Interrupted before all links were preserved")
        }
    }
}

fn parse_link_ids(args: impl Iterator<Item = String>) -> Result<Vec<i64>> {
    let ids = args
        .map(|arg| {
            arg.parse::<i64>()
                .with_context(|| format!("Invalid link id {arg:?}. {USAGE}"))
        })
        .collect::<Result<Vec<_>>>()?;

    if ids.is_empty() {
        anyhow::bail!("{USAGE}");
    }
    Ok(ids)
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,link_preserver=debug"));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
