use clap::Parser;
use colored::*;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use neuroboard::cli::Args;
use neuroboard::config::Config;
use neuroboard::feeder::Feeder;
use neuroboard::loader;
use neuroboard::store::Store;
use neuroboard::web::{AppState, Server};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!(error = %e, "fatal error");
        eprintln!("{} {}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::resolve(&args)?;
    let store = Store::open(&config.store.path)?;

    if let Some(path) = &args.bulk_load {
        let loaded = loader::bulk_load(&store, path).await?;
        eprintln!(
            "{}",
            format!("  Loaded {loaded} participants from {}", path.display()).bright_green()
        );
        return Ok(());
    }

    let feeder = if config.feeder.enabled {
        Some(
            Feeder::new(store.clone())
                .interval(config.feeder.interval())
                .spawn(),
        )
    } else {
        info!("feeder disabled");
        None
    };

    let state = AppState::new(store, config.seed.file.clone());
    let server = Server::bind(&config.server.address(), state).await?;
    let addr = server.local_addr()?;

    eprintln!(
        "{}",
        format!("  NeuroBoard API running at http://{addr}").bright_green()
    );
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());

    server.run_until(shutdown_signal()).await?;

    if let Some(handle) = feeder {
        handle.stop().await;
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
