use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use checkin_outbox::actors::{Coordinator, HealthMonitorActor};
use checkin_outbox::api::{self, AppState};
use checkin_outbox::config::Settings;
use checkin_outbox::domain::time_record::TimeClockService;
use checkin_outbox::external::{LegacyLaborCostClient, SmtpMailer};
use checkin_outbox::handlers::{EmailNotifier, EventDispatcher, LaborCostReporter, ResiliencePolicy};
use checkin_outbox::messaging::{EventPublisher, MessageHandler, QueueTopology, RabbitConsumer, RabbitPublisher};
use checkin_outbox::metrics::Metrics;
use checkin_outbox::outbox::{self, OutboxRelay, PgOutboxStore, PgTimeRecordRepository};
use checkin_outbox::utils::{CircuitBreaker, RateLimiter, RetryExecutor};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    settings.validate()?;

    // RUST_LOG overrides the configured filter
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)))
        .init();

    tracing::info!("🚀 Starting check-in outbox service");

    // === 1. Database ===
    tracing::info!("Connecting to Postgres...");
    let pool = outbox::postgres::connect(&settings.database.url, settings.database.max_connections).await?;
    outbox::postgres::migrate(&pool).await?;

    // === 2. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 3. Resilience primitives ===
    let legacy_breaker =
        CircuitBreaker::new("legacy_api", settings.circuit_breaker_config()).with_metrics(metrics.clone());
    let smtp_breaker = CircuitBreaker::new("smtp", settings.circuit_breaker_config()).with_metrics(metrics.clone());

    let labor_cost_policy = ResiliencePolicy::new(
        RetryExecutor::new("labor_cost_report", settings.retry_config()).with_metrics(metrics.clone()),
        legacy_breaker.clone(),
    )
    .with_rate_limiter(
        RateLimiter::per_minute("legacy_api", settings.legacy_api.rate_limit_per_minute).with_metrics(metrics.clone()),
        settings.rate_limit_wait(),
    );
    let email_policy = ResiliencePolicy::new(
        RetryExecutor::new("email_notification", settings.retry_config()).with_metrics(metrics.clone()),
        smtp_breaker.clone(),
    );

    // === 4. Health monitor + coordinator ===
    let monitor = HealthMonitorActor::new(vec![legacy_breaker, smtp_breaker], Duration::from_secs(5))
        .with_metrics(metrics.clone())
        .start();
    let mut coordinator = Coordinator::new(monitor.clone());
    coordinator.spawn_health_logger(Duration::from_secs(30));

    // === 5. Outbox relay ===
    let publisher = Arc::new(RabbitPublisher::connect(&settings.rabbitmq.url, &settings.rabbitmq.exchange).await?);
    let relay = OutboxRelay::new(
        PgOutboxStore::new(pool.clone()),
        publisher.clone() as Arc<dyn EventPublisher>,
        settings.relay_config(),
    )
    .with_metrics(metrics.clone())
    .with_health(coordinator.health_reporter());
    coordinator.spawn(move |shutdown| relay.run(shutdown));

    // === 6. Consumers ===
    let labor_cost_api = LegacyLaborCostClient::new(&settings.legacy_api.url, settings.legacy_api_timeout())?;
    tracing::info!(endpoint = labor_cost_api.endpoint(), "Legacy labor cost API configured");
    let labor_cost_handler: Arc<dyn MessageHandler> = Arc::new(EventDispatcher::new(LaborCostReporter::new(
        Arc::new(labor_cost_api),
        labor_cost_policy,
    )));
    spawn_consumer(
        &mut coordinator,
        &settings,
        settings.labor_cost_topology(),
        labor_cost_handler,
        metrics.clone(),
    );

    let mailer = SmtpMailer::new(&settings.smtp.host, settings.smtp.port, &settings.smtp.from)?;
    let email_handler: Arc<dyn MessageHandler> = Arc::new(EventDispatcher::new(EmailNotifier::new(
        Arc::new(mailer),
        email_policy,
        settings.smtp.mail_domain.clone(),
    )));
    spawn_consumer(
        &mut coordinator,
        &settings,
        settings.email_topology(),
        email_handler,
        metrics.clone(),
    );

    // === 7. HTTP server ===
    let service = Arc::new(TimeClockService::new(
        Arc::new(PgTimeRecordRepository::new(pool.clone())),
        settings.duplicate_window(),
    ));
    let state = AppState::new(service, monitor, metrics.clone());

    let (host, port) = settings.bind_address();
    tracing::info!("🌐 HTTP server listening on http://{}:{}", host, port);
    let server = HttpServer::new(move || App::new().configure(api::routes(state.clone())))
        .bind((host, port))?
        .disable_signals()
        .run();

    let handle = server.handle();
    let shutdown = coordinator.shutdown_token();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => tracing::info!("🛑 Shutdown signal received"),
            _ = shutdown.cancelled() => {}
        }
        handle.stop(true).await;
    });

    server.await?;

    // === 8. Graceful shutdown ===
    coordinator.shutdown(SHUTDOWN_GRACE).await;
    publisher.close().await;
    pool.close().await;

    tracing::info!("👋 Check-in outbox service stopped");
    Ok(())
}

/// Run a consumer for `topology`, reconnecting whenever the broker drops it
fn spawn_consumer(
    coordinator: &mut Coordinator,
    settings: &Settings,
    topology: QueueTopology,
    handler: Arc<dyn MessageHandler>,
    metrics: Arc<Metrics>,
) {
    let url = settings.rabbitmq.url.clone();
    let prefetch_count = settings.rabbitmq.prefetch_count;
    let reject_malformed = settings.rabbitmq.reject_malformed;

    coordinator.spawn_supervised(format!("consumer:{}", topology.queue), move |shutdown: CancellationToken| {
        let url = url.clone();
        let topology = topology.clone();
        let handler = handler.clone();
        let metrics = metrics.clone();

        async move {
            let consumer = RabbitConsumer::connect(&url, topology, prefetch_count, reject_malformed)
                .await?
                .with_metrics(metrics);
            tracing::info!(queue = consumer.queue(), "✅ Consumer connected");
            consumer.consume(handler, shutdown).await
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
