use std::sync::Arc;

use actix_web::{error, web};
use kameo::actor::ActorRef;

use crate::actors::HealthMonitorActor;
use crate::domain::time_record::TimeClockService;
use crate::metrics::Metrics;

mod errors;
mod handlers;

pub use errors::ApiError;
pub use handlers::{CheckInRequest, CheckInResponse};

// ============================================================================
// HTTP Surface
// ============================================================================
//
//   POST /api/checkin  → TimeClockService::toggle
//   GET  /health       → HealthMonitorActor
//   GET  /metrics      → Prometheus registry
//
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TimeClockService>,
    pub monitor: ActorRef<HealthMonitorActor>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        service: Arc<TimeClockService>,
        monitor: ActorRef<HealthMonitorActor>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            service,
            monitor,
            metrics,
        }
    }
}

/// Register every route with its shared state
pub fn routes(state: AppState) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        let json_config = web::JsonConfig::default().error_handler(|err, _req| {
            error::Error::from(ApiError::InvalidBody(err.to_string()))
        });

        cfg.app_data(web::Data::new(state))
            .app_data(json_config)
            .route("/api/checkin", web::post().to(handlers::check_in))
            .route("/health", web::get().to(handlers::health))
            .route("/metrics", web::get().to(handlers::metrics));
    }
}
