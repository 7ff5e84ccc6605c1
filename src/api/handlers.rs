use actix_web::{web, HttpResponse, Responder};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};

use super::errors::ApiError;
use super::AppState;
use crate::actors::{GetSystemHealth, HealthStatus};
use crate::domain::time_record::{ClockAction, EmployeeId};

#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    #[serde(default)]
    pub employee_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckInResponse {
    pub success: bool,
    pub message: String,
    pub record_id: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours_worked: Option<f64>,
}

impl From<ClockAction> for CheckInResponse {
    fn from(action: ClockAction) -> Self {
        let (message, hours_worked) = match &action {
            ClockAction::CheckedIn(_) => ("Successfully checked in", None),
            ClockAction::CheckedOut(record) => ("Successfully checked out", Some(record.hours_worked)),
        };

        Self {
            success: true,
            message: message.to_string(),
            record_id: action.record().id.to_string(),
            action: action.as_str().to_string(),
            hours_worked,
        }
    }
}

const BADGE_MIN_LEN: usize = 3;
const BADGE_MAX_LEN: usize = 50;

/// Badge format accepted over HTTP: 3 to 50 ASCII letters or digits
fn parse_badge(raw: String) -> Result<EmployeeId, ApiError> {
    let employee_id = EmployeeId::parse(raw)?;
    let badge = employee_id.as_str();
    if badge.len() < BADGE_MIN_LEN
        || badge.len() > BADGE_MAX_LEN
        || !badge.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(ApiError::InvalidEmployeeId(badge.to_string()));
    }
    Ok(employee_id)
}

/// POST /api/checkin - toggle between check-in and check-out
pub async fn check_in(
    state: web::Data<AppState>,
    body: web::Json<CheckInRequest>,
) -> Result<HttpResponse, ApiError> {
    let employee_id = parse_badge(body.into_inner().employee_id)?;

    let action = state.service.toggle(&employee_id).await.map_err(|e| {
        tracing::warn!(employee_id = %employee_id, error = %e, "Check-in request rejected");
        ApiError::from(e)
    })?;

    Ok(HttpResponse::Ok().json(CheckInResponse::from(action)))
}

/// GET /health - aggregated component health
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let health = match state.monitor.ask(GetSystemHealth).send().await {
        Ok(health) => health,
        Err(e) => {
            tracing::error!("Failed to get system health: {}", e);
            return HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "unhealthy",
                "message": "health monitor unavailable"
            }));
        }
    };

    let mut names: Vec<_> = health.components.keys().cloned().collect();
    names.sort();
    let components: serde_json::Map<String, serde_json::Value> = names
        .into_iter()
        .filter_map(|name| {
            let component = health.components.get(&name)?;
            let value = serde_json::json!({
                "status": component.status.label(),
                "message": component.status.message(),
                "details": component.details,
                "last_check": component.last_check.to_rfc3339(),
            });
            Some((name, value))
        })
        .collect();

    let body = serde_json::json!({
        "status": health.overall_status.label(),
        "message": health.overall_status.message(),
        "service": "checkin-outbox",
        "components": components,
        "check_time": health.check_time.to_rfc3339(),
    });

    match health.overall_status {
        HealthStatus::Unhealthy(_) => HttpResponse::ServiceUnavailable().json(body),
        _ => HttpResponse::Ok().json(body),
    }
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics(state: web::Data<AppState>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use actix_web::{test, App};

    use super::*;
    use crate::actors::{HealthMonitorActor, HealthReporter};
    use crate::domain::time_record::TimeClockService;
    use crate::metrics::Metrics;
    use crate::outbox::MemoryDatabase;

    fn state(db: &MemoryDatabase) -> AppState {
        let service = TimeClockService::new(Arc::new(db.time_records()), chrono::Duration::seconds(60));
        let monitor = HealthMonitorActor::new(Vec::new(), Duration::from_secs(3600)).start();
        AppState::new(Arc::new(service), monitor, Arc::new(Metrics::new().unwrap()))
    }

    fn checkin_request(employee_id: &str) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/checkin")
            .set_json(serde_json::json!({ "employee_id": employee_id }))
    }

    #[actix_web::test]
    async fn test_check_in_appends_outbox_row() {
        let db = MemoryDatabase::new();
        let app = test::init_service(App::new().configure(super::super::routes(state(&db)))).await;

        let resp = test::call_service(&app, checkin_request("EMP001").to_request()).await;
        assert_eq!(resp.status(), 200);

        let body: CheckInResponse = test::read_body_json(resp).await;
        assert!(body.success);
        assert_eq!(body.action, "checked_in");
        assert!(body.hours_worked.is_none());
        assert_eq!(db.outbox_rows().len(), 1);
    }

    #[actix_web::test]
    async fn test_invalid_employee_id_is_rejected() {
        let db = MemoryDatabase::new();
        let app = test::init_service(App::new().configure(super::super::routes(state(&db)))).await;

        let too_long = "x".repeat(51);
        for id in ["", "E1", "EMP-001", too_long.as_str()] {
            let resp = test::call_service(&app, checkin_request(id).to_request()).await;
            assert_eq!(resp.status(), 400, "employee_id {id:?}");
        }
        assert!(db.outbox_rows().is_empty());

        let longest = "x".repeat(50);
        let resp = test::call_service(&app, checkin_request(&longest).to_request()).await;
        assert_eq!(resp.status(), 200);
    }

    #[actix_web::test]
    async fn test_immediate_check_out_is_duplicate() {
        let db = MemoryDatabase::new();
        let app = test::init_service(App::new().configure(super::super::routes(state(&db)))).await;

        let first = test::call_service(&app, checkin_request("EMP002").to_request()).await;
        assert_eq!(first.status(), 200);

        let second = test::call_service(&app, checkin_request("EMP002").to_request()).await;
        assert_eq!(second.status(), 429);
        assert_eq!(db.outbox_rows().len(), 1);
    }

    #[actix_web::test]
    async fn test_storage_failure_is_500() {
        let db = MemoryDatabase::new();
        db.fail_writes(true);
        let app = test::init_service(App::new().configure(super::super::routes(state(&db)))).await;

        let resp = test::call_service(&app, checkin_request("EMP003").to_request()).await;
        assert_eq!(resp.status(), 500);
    }

    #[actix_web::test]
    async fn test_health_reflects_components() {
        let db = MemoryDatabase::new();
        let state = state(&db);
        let reporter = HealthReporter::new(state.monitor.clone());
        let app = test::init_service(App::new().configure(super::super::routes(state))).await;

        reporter.report("outbox_relay", HealthStatus::Healthy, None).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), 200);

        reporter
            .report("consumer:email-queue", HealthStatus::Unhealthy("disconnected".into()), None)
            .await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), 503);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["components"]["consumer:email-queue"]["status"], "unhealthy");
    }

    #[actix_web::test]
    async fn test_metrics_exposition() {
        let db = MemoryDatabase::new();
        let state = state(&db);
        state.metrics.record_outbox_publish("EmployeeCheckedIn", true);
        let app = test::init_service(App::new().configure(super::super::routes(state))).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        assert_eq!(resp.status(), 200);

        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("outbox_events_published_total"));
    }
}
