//! Reusable pipeline runtime.
//!
//! [`ServerHandle`] owns the full lifecycle: metrics, the user store
//! (memory or database, with migrations), cache, broker, business core,
//! the three pipeline stages, the receiver, and graceful shutdown.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use sea_orm::DatabaseConnection;
use sea_orm_migration::MigratorTrait;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::{
    MessageBroker, Outcome, Pipeline, PipelineHandle, Receiver, ReceiverError, SharedMetrics,
    UserRequest, UserService,
};
use crate::config::{AppConfig, StoreBackend};
use crate::domain::{
    CorrelationId, CreateUserDto, DeliveryMode, DomainError, User, UserNameDto, UserStore,
};
use crate::infrastructure::database::migrator::Migrator;
use crate::infrastructure::metrics::install_prometheus_exporter;
use crate::infrastructure::{
    init_database, start_cache_sweeper, BoundedMemoryStore, DatabaseConfig, InMemoryBroker,
    InMemoryCache, PrometheusMetrics, SeaOrmUserStore,
};
use crate::support::{AppError, Deadline, InfraError, ShutdownCoordinator, ShutdownSignal};

// ── Options ────────────────────────────────────────────────────────

/// Options for starting the pipeline.
pub struct ServerOptions {
    pub config: AppConfig,
    /// Run database migrations on startup (database backend only).
    pub auto_migrate: bool,
    /// Insert the demo users if they are missing.
    pub seed_demo_users: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            config: AppConfig::default(),
            auto_migrate: true,
            seed_demo_users: true,
        }
    }
}

// ── ServerHandle ───────────────────────────────────────────────────

/// Handle to a running pipeline.
///
/// ```rust,no_run
/// use user_pipeline::server::{ServerHandle, ServerOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let handle = ServerHandle::start(ServerOptions::default()).await?;
///     handle.install_signal_handler();
///     handle.shutdown_signal().wait().await;
///     handle.wait().await;
///     Ok(())
/// }
/// ```
pub struct ServerHandle {
    /// Entry point for user requests.
    pub receiver: Arc<Receiver>,
    /// Business core, for callers that bypass the pipeline.
    pub service: Arc<UserService>,
    pub broker: InMemoryBroker,
    pub cache: Arc<InMemoryCache>,
    /// The configuration the server was started with.
    pub config: AppConfig,

    db: Option<DatabaseConnection>,
    shutdown: ShutdownCoordinator,
    pipeline: PipelineHandle,
    sweeper: JoinHandle<()>,
}

impl ServerHandle {
    /// Build every component and start the stage consumers.
    pub async fn start(opts: ServerOptions) -> Result<Self, AppError> {
        let config = opts.config;
        config.validate()?;

        info!(backend = %config.store.backend, "Starting user pipeline...");

        // ── Metrics ────────────────────────────────────────────
        if config.metrics.enabled {
            install_metrics_once(&config)?;
        }
        let metrics: SharedMetrics = Arc::new(PrometheusMetrics);

        // ── User store ─────────────────────────────────────────
        let (store, db): (Arc<dyn UserStore>, Option<DatabaseConnection>) =
            match config.store.backend {
                StoreBackend::Memory => {
                    info!(workers = config.store.workers, "Using bounded memory store");
                    (Arc::new(BoundedMemoryStore::new(config.store.workers)), None)
                }
                StoreBackend::Database => {
                    let db_config = DatabaseConfig::from(&config.database);
                    let db = init_database(&db_config).await.map_err(InfraError::from)?;
                    if opts.auto_migrate {
                        info!("Running database migrations...");
                        Migrator::up(&db, None)
                            .await
                            .map_err(|e| InfraError::Migration(e.to_string()))?;
                        info!("Migrations completed");
                    }
                    (Arc::new(SeaOrmUserStore::new(db.clone())), Some(db))
                }
            };

        // ── Cache, broker, business core ───────────────────────
        let shutdown =
            ShutdownCoordinator::new(Duration::from_secs(config.server.shutdown_timeout_secs));
        let shutdown_signal = shutdown.signal();

        let cache = Arc::new(InMemoryCache::new());
        let sweeper = start_cache_sweeper(cache.clone(), shutdown_signal.clone(), config.cache.ttl());

        let broker = InMemoryBroker::new();
        let shared_broker: Arc<dyn MessageBroker> = Arc::new(broker.clone());

        let service = Arc::new(UserService::new(
            store,
            cache.clone(),
            metrics.clone(),
            config.cache.ttl(),
        ));

        if opts.seed_demo_users {
            let seeded = seed_demo_users(&service, config.store.operation_timeout()).await?;
            info!(seeded, "Demo users ready");
        }

        // ── Pipeline & receiver ────────────────────────────────
        let pipeline = Pipeline::spawn(
            shared_broker.clone(),
            cache.clone(),
            service.clone(),
            metrics.clone(),
            config.pipeline_settings(),
            shutdown_signal,
        );

        let receiver = Arc::new(Receiver::new(
            shared_broker,
            cache.clone(),
            service.clone(),
            metrics,
            config.receiver_settings(),
        ));

        info!("🚀 User pipeline started.");

        Ok(Self {
            receiver,
            service,
            broker,
            cache,
            config,
            db,
            shutdown,
            pipeline,
            sweeper,
        })
    }

    /// Get a cloneable shutdown signal.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Install OS signal listeners (SIGTERM, SIGINT) that trigger shutdown.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    /// Trigger graceful shutdown (non-blocking).
    pub fn trigger_shutdown(&self) {
        self.shutdown.signal().trigger();
    }

    pub fn is_running(&self) -> bool {
        self.pipeline.is_running()
    }

    /// Wait for the stages to stop, bounded by `server.shutdown_timeout_secs`,
    /// then close the database.
    pub async fn wait(self) {
        info!("⏳ Waiting for pipeline stages to complete...");

        let Self {
            shutdown,
            pipeline,
            sweeper,
            db,
            broker,
            ..
        } = self;

        let finished = shutdown
            .shutdown_with_cleanup(|| async move {
                pipeline.join().await;
                if let Err(e) = sweeper.await {
                    error!("Cache sweeper task panicked: {}", e);
                }
            })
            .await;
        if !finished {
            warn!("Some stages did not stop in time");
        }
        broker.close().await;

        if let Some(db) = db {
            if let Err(e) = db.close().await {
                warn!("Error closing database connection: {}", e);
            } else {
                info!("✅ Database connection closed");
            }
        }

        info!("👋 User pipeline shutdown complete");
    }

    /// Trigger shutdown and wait for completion.
    pub async fn shutdown(self) {
        info!("🛑 Shutting down user pipeline...");
        self.trigger_shutdown();
        self.wait().await;
    }
}

/// The recorder is process-global; a second start in the same process
/// reuses the first one.
fn install_metrics_once(config: &AppConfig) -> Result<(), AppError> {
    static INSTALLED: OnceLock<()> = OnceLock::new();

    if INSTALLED.get().is_some() {
        info!("📊 Prometheus exporter already installed");
        return Ok(());
    }
    install_prometheus_exporter(config.metrics_listen()?)?;
    let _ = INSTALLED.set(());
    Ok(())
}

// ── Demo data ──────────────────────────────────────────────────────

const DEMO_USERS: [(&str, &str, &str, &str); 3] = [
    ("Piter", "123", "piter@email.com", "Piter Parker"),
    ("Maria", "321", "maria@email.com", "Maria Ivanova"),
    ("Sunny", "12345678", "sunny@email.com", "Sunny Day"),
];

/// Create the demo users through the business core. Users that already
/// exist are left alone. Returns how many were inserted.
pub async fn seed_demo_users(service: &UserService, timeout: Duration) -> Result<usize, AppError> {
    let mut inserted = 0;
    for (name, password, email, full_name) in DEMO_USERS {
        let dto = CreateUserDto {
            name: name.to_string(),
            password: password.to_string(),
            email: email.to_string(),
            full_name: full_name.to_string(),
        };
        match service.create(dto, Deadline::after(timeout)).await {
            Ok(_) => inserted += 1,
            Err(DomainError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(inserted)
}

/// Run the "Ivan" round trip: create in wait-for-push mode, then read the
/// user back in poll-later mode.
pub async fn run_demo(receiver: &Receiver, timeout: Duration) -> Result<User, AppError> {
    let ivan = CreateUserDto {
        name: "Ivan".to_string(),
        password: "123".to_string(),
        email: "ivan@x.com".to_string(),
        full_name: "Ivan I".to_string(),
    };

    match receiver
        .submit_and_wait(UserRequest::Create(ivan), timeout)
        .await?
    {
        Outcome::Success { .. } => info!("Demo: Ivan created"),
        Outcome::Failure { reason, .. } => warn!(%reason, "Demo: create failed"),
    }

    let id = receiver
        .user_get(UserNameDto::new("Ivan"), DeliveryMode::PollLater)
        .await?;
    let outcome = poll_result(receiver, &id, timeout).await?;
    let user: User = outcome
        .body_as()
        .map_err(|reason| AppError::Domain(DomainError::Unexpected(reason)))?;
    info!(name = %user.name, email = %user.email, "Demo: Ivan fetched");
    Ok(user)
}

async fn poll_result(
    receiver: &Receiver,
    id: &CorrelationId,
    timeout: Duration,
) -> Result<Outcome, ReceiverError> {
    let deadline = Deadline::after(timeout);
    loop {
        match receiver.data(id).await {
            Err(ReceiverError::NotReady(_)) if !deadline.is_expired() => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(ReceiverError::NotReady(id)) => return Err(ReceiverError::Timeout(id)),
            other => return other,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────────

/// Initialize tracing (logging) from the application config.
///
/// Call this once at process startup (before [`ServerHandle::start`]).
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match config.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(backend: StoreBackend) -> ServerOptions {
        let mut config = AppConfig::default();
        config.metrics.enabled = false;
        config.store.backend = backend;
        config.store.operation_timeout_ms = 1000;
        config.broker.consume_backoff_secs = 0;
        config.server.shutdown_timeout_secs = 5;
        config.database.url = "sqlite::memory:".to_string();
        config.database.max_connections = 1;
        ServerOptions {
            config,
            auto_migrate: true,
            seed_demo_users: true,
        }
    }

    #[tokio::test]
    async fn memory_backend_runs_the_demo() {
        let handle = ServerHandle::start(options(StoreBackend::Memory)).await.unwrap();
        assert!(handle.is_running());

        let user = run_demo(&handle.receiver, Duration::from_secs(3)).await.unwrap();
        assert_eq!(user.name, "Ivan");
        assert_eq!(user.email, "ivan@x.com");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn database_backend_is_migrated_and_seeded() {
        let handle = ServerHandle::start(options(StoreBackend::Database)).await.unwrap();

        let piter = handle
            .service
            .get(UserNameDto::new("Piter"), Deadline::after(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(piter.password, "123");

        let again = seed_demo_users(&handle.service, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(again, 0);

        let user = run_demo(&handle.receiver, Duration::from_secs(3)).await.unwrap();
        assert_eq!(user.full_name, "Ivan I");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_config_is_refused() {
        let mut opts = options(StoreBackend::Memory);
        opts.config.store.workers = 0;
        assert!(matches!(
            ServerHandle::start(opts).await,
            Err(AppError::Config(_))
        ));
    }
}
