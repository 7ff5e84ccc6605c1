use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info};

use super::dispatcher::EventHandler;
use super::resilience::ResiliencePolicy;
use crate::domain::time_record::EmployeeCheckedOut;
use crate::external::{LaborCostApi, LaborCostReport};
use crate::messaging::HandlerError;

pub const LABOR_COST_QUEUE: &str = "labor-cost-queue";

/// Reports worked hours to the legacy payroll API on every check-out
pub struct LaborCostReporter {
    api: Arc<dyn LaborCostApi>,
    policy: ResiliencePolicy,
}

impl LaborCostReporter {
    pub fn new(api: Arc<dyn LaborCostApi>, policy: ResiliencePolicy) -> Self {
        Self { api, policy }
    }
}

#[async_trait]
impl EventHandler for LaborCostReporter {
    fn name(&self) -> &'static str {
        "labor_cost_reporter"
    }

    async fn on_checked_out(&self, event: &EmployeeCheckedOut) -> Result<(), HandlerError> {
        let report = LaborCostReport {
            employee_id: event.employee_id.clone(),
            hours_worked: event.hours_worked,
            recorded_at: Utc::now(),
        };

        match self.policy.execute(|| self.api.record_labor_cost(&report)).await {
            Ok(()) => {
                info!(
                    event_id = %event.header.event_id,
                    employee_id = %event.employee_id,
                    hours_worked = event.hours_worked,
                    "Labor cost reported"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    event_id = %event.header.event_id,
                    employee_id = %event.employee_id,
                    attempts = e.attempts,
                    error = %e.last_error,
                    "Labor cost reporting failed"
                );
                Err(HandlerError::Failed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::time_record::{DomainEvent, EmployeeId, TimeRecord};
    use crate::external::ExternalError;
    use crate::handlers::EventDispatcher;
    use crate::messaging::MessageHandler;
    use crate::utils::{CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryExecutor};
    use chrono::Duration as ChronoDuration;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeApi {
        reports: Mutex<Vec<LaborCostReport>>,
        failures_left: Mutex<u32>,
    }

    #[async_trait]
    impl LaborCostApi for FakeApi {
        async fn record_labor_cost(&self, report: &LaborCostReport) -> Result<(), ExternalError> {
            let mut failures = self.failures_left.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(ExternalError::UnexpectedStatus(503));
            }
            self.reports.lock().push(report.clone());
            Ok(())
        }
    }

    fn policy() -> ResiliencePolicy {
        ResiliencePolicy::new(
            RetryExecutor::new("legacy_api", RetryConfig::default()),
            CircuitBreaker::new("legacy_api", CircuitBreakerConfig::default()),
        )
    }

    fn checkout_payload() -> Vec<u8> {
        let start = Utc::now() - ChronoDuration::minutes(510);
        let mut record = TimeRecord::check_in(&EmployeeId::parse("E100").unwrap(), start);
        record.check_out(start + ChronoDuration::minutes(510)).unwrap();
        DomainEvent::checked_out(&record, Utc::now()).unwrap().to_payload().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_hours_after_retries() {
        let api = Arc::new(FakeApi::default());
        *api.failures_left.lock() = 2;
        let dispatcher = EventDispatcher::new(LaborCostReporter::new(api.clone(), policy()));

        let started = tokio::time::Instant::now();
        dispatcher.handle(&checkout_payload()).await.unwrap();

        let reports = api.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].employee_id, "E100");
        assert_eq!(reports[0].hours_worked, 8.5);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail_the_delivery() {
        let api = Arc::new(FakeApi::default());
        *api.failures_left.lock() = u32::MAX;
        let dispatcher = EventDispatcher::new(LaborCostReporter::new(api.clone(), policy()));

        let err = dispatcher.handle(&checkout_payload()).await.unwrap_err();

        assert!(matches!(err, HandlerError::Failed(_)));
        assert!(api.reports.lock().is_empty());
    }
}
