use oam_collector::config::CollectorConfig;
use oam_collector::services::metrics::init_metrics;
use oam_collector::startup::{health_router, serve_health, CollectorContext};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use tokio::signal;

/// `--config <path>`, `--config=<path>` or a single positional path.
fn config_path_from_args() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
        if !arg.starts_with('-') {
            return Some(arg);
        }
    }
    None
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("Shutdown signal received");
}

fn exit_with(error: AppError) -> ! {
    tracing::error!(error = %error, "Collector failed to start");
    eprintln!("oam-collector: {error}");
    std::process::exit(error.exit_code());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match CollectorConfig::load(config_path_from_args().as_deref()) {
        Ok(config) => config,
        Err(e) => exit_with(e),
    };

    init_tracing(
        &config.service_name,
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    );
    init_metrics()?;

    let context = match CollectorContext::build(config).await {
        Ok(context) => context,
        Err(e) => exit_with(e.into()),
    };

    let router = health_router(context.users.clone());
    let health_port = context.health_port();
    tokio::spawn(async move {
        if let Err(e) = serve_health(health_port, router).await {
            tracing::error!("Health server error: {}", e);
        }
    });

    tracing::info!(
        users = context.users.len(),
        base_url = %context.config.base_url,
        "Collector starting"
    );

    tokio::select! {
        _ = context.scheduler.start_data_collection() => {
            tracing::warn!("Data collection stopped: no user could be polled");
        }
        _ = shutdown_signal() => {}
    }

    context.logout_all().await;
    tracing::info!("Collector stopped");
    Ok(())
}
