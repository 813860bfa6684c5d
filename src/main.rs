//! Riskline - diabetes risk prediction job orchestrator

use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use riskline::{
    auth::JwtValidator,
    cache::{MemoryResultCache, RedisResultCache, ResultCache},
    clock::{Clock, SystemClock},
    config::Args,
    db::MongoClient,
    logging,
    nats::{BusPublisher, NatsClient},
    orchestrator::{Orchestrator, OrchestratorDeps},
    server::{self, AppState},
    store::{
        JobStore, MemoryJobStore, MemoryPredictionStore, MemoryUserDirectory, MongoJobStore,
        MongoPredictionStore, MongoUserDirectory, PredictionStore, UserDirectory,
    },
};

/// Lifetime of tokens issued by `JwtValidator::generate_token`
const TOKEN_EXPIRY_SECS: u64 = 24 * 60 * 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let queues = args.bus.queue_names();

    info!("======================================");
    info!("  Riskline - Prediction Job Orchestrator");
    info!("======================================");
    info!("Listen: {}", args.listen_addr());
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("NATS: {}", args.bus.bus_url);
    info!("ML request queue: {}", queues.request);
    info!("ML response queue: {}", queues.response);
    info!("MongoDB: {}/{}", args.mongodb_uri, args.mongodb_db);
    info!("Workers: {}", args.worker_count());
    info!("Queue capacity: {}", args.queue_capacity);
    info!("======================================");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Connect to MongoDB (in-memory stores in dev mode)
    let (jobs, predictions, users): (
        Arc<dyn JobStore>,
        Arc<dyn PredictionStore>,
        Arc<dyn UserDirectory>,
    ) = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(mongo) => {
            info!("MongoDB connected successfully");
            // Index creation is fatal on failure
            let jobs: Arc<dyn JobStore> =
                Arc::new(MongoJobStore::new(&mongo, Arc::clone(&clock)).await?);
            let predictions: Arc<dyn PredictionStore> =
                Arc::new(MongoPredictionStore::new(&mongo).await?);
            let users: Arc<dyn UserDirectory> = Arc::new(MongoUserDirectory::new(&mongo).await?);
            info!("MongoDB indexes ensured");
            (jobs, predictions, users)
        }
        Err(e) if args.dev_mode => {
            warn!("MongoDB connection failed (dev mode, using in-memory stores): {}", e);
            let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new(Arc::clone(&clock)));
            let predictions: Arc<dyn PredictionStore> = Arc::new(MemoryPredictionStore::new());
            let users: Arc<dyn UserDirectory> = Arc::new(MemoryUserDirectory::new());
            (jobs, predictions, users)
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let nats = NatsClient::connect(&args.bus, "riskline").await?;
    info!("NATS connected successfully as {}", nats.name());

    let cache: Arc<dyn ResultCache> = match RedisResultCache::connect(&args.redis_url).await {
        Ok(cache) => {
            info!("Redis connected successfully");
            Arc::new(cache)
        }
        Err(e) if args.dev_mode => {
            warn!("Redis connection failed (dev mode, using in-process cache): {}", e);
            Arc::new(MemoryResultCache::new())
        }
        Err(e) => {
            error!("Redis connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let jwt = JwtValidator::new(args.jwt_secret()?, TOKEN_EXPIRY_SECS)?;

    let bus: Arc<dyn BusPublisher> = Arc::new(nats.clone());
    let orchestrator = Arc::new(
        Orchestrator::new(
            args.orchestrator_config(),
            OrchestratorDeps {
                jobs,
                predictions,
                users,
                cache,
                bus,
                queues,
                clock,
            },
        )
        .with_nats(nats),
    );
    orchestrator.start().await?;

    let state = Arc::new(
        AppState::new(Arc::clone(&orchestrator), jwt, args.listen_addr())
            .with_dev_mode(args.dev_mode),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server_task = tokio::spawn(server::run(state, shutdown_rx));

    let server_finished = tokio::select! {
        _ = shutdown_signal() => false,
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("HTTP server error: {}", e),
                Err(e) => error!("HTTP server task failed: {}", e),
            }
            true
        }
    };

    let _ = shutdown_tx.send(true);
    if !server_finished {
        let _ = server_task.await;
    }

    orchestrator.stop().await?;
    info!("Riskline stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Shutdown signal received"),
        _ = terminate() => info!("Terminate signal received"),
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
