use anyhow::Result;
use axum::Router;
use image_registry::{app, config, routes};
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting image-registry with config: {:?}", cfg);

    // --- Handle migration mode ---
    if migrate {
        match cfg.backend {
            config::Backend::Local => {
                app::connect_sqlite(&cfg).await?;
                tracing::info!("Record table `{}` is ready.", cfg.table);
            }
            config::Backend::Aws => {
                tracing::warn!(
                    "--migrate has no effect with the aws backend; tables are provisioned externally"
                );
            }
        }
        return Ok(()); // exit after migration
    }

    // --- Initialize collaborators ---
    let state = app::build_state(&cfg).await?;

    // --- Build router ---
    let router: Router = routes::routes::routes(state, &cfg.base_path);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
