//! vdevd
//!
//! Vdev fault management daemon. Listens to devd for device arrivals and
//! storage-pool notifications and keeps one remediation case per impaired
//! vdev.
//!
//! ```text
//! vdevd --snapshot /etc/vdevd/topology.yaml
//! vdevd --snapshot topology.yaml --replay captured-events.txt
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vdevd::{
    CaseEvent, Daemon, DaemonConfig, DevdSocketSource, Error, EventSource, ExitReason,
    InMemoryCaseRegistry, ReaderSource, Result, RouterMetrics, SnapshotBackend,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// vdevd - Vdev fault management daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(long, env = "VDEVD_CONFIG")]
    config: Option<PathBuf>,

    /// devd stream socket
    #[arg(long, env = "VDEVD_DEVD_SOCKET")]
    devd_socket: Option<PathBuf>,

    /// Topology snapshot served to the router
    #[arg(long, env = "VDEVD_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Read events from a file instead of devd ("-" for stdin)
    #[arg(long)]
    replay: Option<String>,

    /// Metrics server bind address
    #[arg(long, env = "VDEVD_METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;

    info!("Starting vdevd");
    info!("  Version: {}", vdevd::VERSION);
    info!("  devd socket: {}", config.devd_socket.display());
    info!("  Metrics: {}", config.metrics_addr);

    let backend = match &config.snapshot_path {
        Some(path) => Arc::new(SnapshotBackend::load(path)?),
        None => {
            warn!("No topology snapshot configured, no pools will be visible");
            Arc::new(SnapshotBackend::new())
        }
    };

    let metrics = Arc::new(RouterMetrics::new()?);
    let cases = InMemoryCaseRegistry::new(backend.clone(), backend.clone());
    spawn_case_logger(cases.subscribe());

    let daemon = Daemon::new(
        backend.clone(),
        backend,
        cases,
        metrics.clone(),
        config.rescan_globs.clone(),
    );

    // Start metrics server
    let metrics_addr = config.metrics_socket_addr()?;
    let server_metrics = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, server_metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let mut source = build_source(&args, &config).await?;
    let reason = daemon.run(source.as_mut(), cancel).await?;

    match reason {
        ExitReason::Cancelled => info!("Shutdown requested"),
        ExitReason::EndOfInput => {
            info!(deferred = daemon.queue().snapshot().len(), "Replay input exhausted")
        }
    }
    info!("vdevd shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> Result<DaemonConfig> {
    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(socket) = &args.devd_socket {
        config.devd_socket = socket.clone();
    }
    if let Some(snapshot) = &args.snapshot {
        config.snapshot_path = Some(snapshot.clone());
    }
    if let Some(addr) = &args.metrics_addr {
        config.metrics_addr = addr.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn build_source(args: &Args, config: &DaemonConfig) -> Result<Box<dyn EventSource>> {
    let source: Box<dyn EventSource> = match args.replay.as_deref() {
        Some("-") => Box::new(ReaderSource::new("stdin", BufReader::new(tokio::io::stdin()))),
        Some(path) => {
            let file = tokio::fs::File::open(path).await.map_err(|e| {
                Error::Configuration(format!("Unable to open replay file {}: {}", path, e))
            })?;
            Box::new(ReaderSource::new(path.to_string(), BufReader::new(file)))
        }
        None => Box::new(DevdSocketSource::new(
            config.devd_socket.clone(),
            config.reconnect.clone(),
        )),
    };
    Ok(source)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Background Tasks
// =============================================================================

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Unable to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                cancel.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
        cancel.cancel();
    });
}

fn spawn_case_logger(mut events: broadcast::Receiver<CaseEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.is_remediation() => {
                    info!(case = %event.key(), ?event, "Case remediation")
                }
                Ok(event) => debug!(case = %event.key(), ?event, "Case event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Case event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, metrics: Arc<RouterMetrics>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok(buffer) => *response.body_mut() = Body::from(buffer),
                            Err(e) => {
                                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                *response.body_mut() = Body::from(e.to_string());
                            }
                        },
                        "/healthz" | "/livez" => *response.body_mut() = Body::from("ok"),
                        _ => {
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            *response.body_mut() = Body::from("not found");
                        }
                    }
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
