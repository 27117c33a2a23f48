// src/main.rs
//
// Home-lab dashboard backend. There is no authentication: run it on a
// private network only.
use anyhow::{Context, Result};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use tabloo::{
    config,
    health::{HealthChecker, HealthMonitor},
    metrics::MetricsRegistry,
    server::{ApiState, RequestHandler, ServerBuilder},
    store::SqliteStore,
    uploads::FileStorage,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tabloo=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    let mut init_only = false;
    let mut config_path = None;
    for arg in std::env::args().skip(1) {
        if arg == "--init-only" {
            init_only = true;
        } else {
            config_path = Some(arg);
        }
    }

    info!(
        "Loading configuration from: {}",
        config_path.as_deref().unwrap_or("config.yaml (optional)")
    );
    let config = config::resolve_config(config_path.as_deref()).await?;

    let store = Arc::new(
        SqliteStore::open(&config.database.path).context("Failed to initialize database")?,
    );
    store.seed_example_apps().await?;

    let files = Arc::new(
        FileStorage::new(&config.uploads.dir, config.uploads.max_file_bytes).with_context(|| {
            format!(
                "Failed to create uploads directory {}",
                config.uploads.dir.display()
            )
        })?,
    );

    if init_only {
        info!("Database initialized successfully");
        return Ok(());
    }

    let metrics_registry = MetricsRegistry::new()?;
    let metrics = config.metrics.enabled.then(|| metrics_registry.collector());

    let checker = Arc::new(HealthChecker::new(&config.health, metrics.clone())?);

    let monitor = config.health.poll_interval().map(|every| {
        let monitor = Arc::new(HealthMonitor::new(checker.clone(), store.clone(), every));
        tokio::spawn(monitor.clone().start());
        monitor
    });

    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, metrics_registry, config.metrics.path.clone()).await?;
    }

    let state = Arc::new(ApiState {
        registry: store.clone(),
        settings: store.clone(),
        checker,
        uploads: store.clone(),
        files,
    });
    let handler = RequestHandler::new(state, metrics);

    let addr = config.listen_addr().await?;
    info!("Home-Lab Dashboard API on http://{}", addr);
    warn!("No authentication enabled! Run only on a private network.");

    ServerBuilder::new(addr)
        .with_handler(handler)
        .serve(shutdown_signal())
        .await?;

    if let Some(monitor) = monitor {
        monitor.shutdown();
    }
    info!("Server closed");

    Ok(())
}

async fn start_metrics_server(
    addr: SocketAddr,
    registry: MetricsRegistry,
    path: String,
) -> Result<()> {
    let registry = Arc::new(registry);
    let metrics_path = Arc::new(path);
    let service_path = metrics_path.clone();

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move {
                    let mut response = Response::new(Body::empty());
                    if req.uri().path() != path.as_str() {
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        *response.body_mut() = Body::from("Not Found");
                        return Ok::<_, Infallible>(response);
                    }

                    match registry.gather() {
                        Ok(metrics) => {
                            response.headers_mut().insert(
                                CONTENT_TYPE,
                                HeaderValue::from_static("text/plain; version=0.0.4"),
                            );
                            *response.body_mut() = Body::from(metrics);
                        }
                        Err(e) => {
                            error!("Failed to encode metrics: {}", e);
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        }
                    }
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Failed to bind metrics server on {}", addr))?
        .serve(make_service);

    info!(
        "Metrics server listening on http://{}{}",
        addr,
        metrics_path.as_str()
    );

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received");
}
