//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo; one task per connection.

use bytes::Bytes;
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::auth::JwtValidator;
use crate::orchestrator::Orchestrator;
use crate::routes::{self, BoxBody};
use crate::types::RisklineError;

/// Shared application state
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub jwt: JwtValidator,
    pub listen: SocketAddr,
    pub dev_mode: bool,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, jwt: JwtValidator, listen: SocketAddr) -> Self {
        Self {
            orchestrator,
            jwt,
            listen,
            dev_mode: false,
            started_at: Instant::now(),
        }
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }
}

/// Serve HTTP until `shutdown` flips to `true`
pub async fn run(
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), RisklineError> {
    let listener = TcpListener::bind(state.listen).await?;

    info!("Riskline listening on {}", state.listen);
    if state.dev_mode {
        warn!("Development mode enabled - insecure JWT secret may be in use");
    }

    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req: Request<Incoming>| {
                        let state = Arc::clone(&state);
                        async move {
                            debug!("[{}] {} {}", addr, req.method(), req.uri().path());
                            Ok::<_, hyper::Error>(handle_request(state, req).await)
                        }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }

    info!("HTTP server stopped accepting connections");
    Ok(())
}

/// Route one request
pub async fn handle_request<B>(state: Arc<AppState>, req: Request<B>) -> Response<BoxBody>
where
    B: Body<Data = Bytes>,
    B::Error: std::fmt::Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if path.starts_with("/prediction") {
        if let Some(response) = routes::handle_prediction_request(req, Arc::clone(&state)).await {
            return response;
        }
        return routes::not_found_response(&path);
    }

    match (method, path.as_str()) {
        (Method::OPTIONS, _) => routes::cors_preflight(),

        // Liveness probe
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state)).await
        }

        // Readiness probe: store and bus reachable
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            routes::readiness_check(Arc::clone(&state)).await
        }

        (Method::GET, "/version") => routes::version_info(),

        (Method::POST, "/health/ml") => routes::ml_health_probe(Arc::clone(&state)).await,

        _ => routes::not_found_response(&path),
    }
}
