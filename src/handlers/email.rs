use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use super::dispatcher::EventHandler;
use super::resilience::ResiliencePolicy;
use crate::domain::time_record::EmployeeCheckedOut;
use crate::external::{Email, Mailer};
use crate::messaging::HandlerError;

pub const EMAIL_QUEUE: &str = "email-queue";

const SUBJECT: &str = "Your Work Hours Summary";
const TIME_FORMAT: &str = "%d %b %y %H:%M UTC";

/// Sends the employee a work-hours summary on check-out
pub struct EmailNotifier {
    mailer: Arc<dyn Mailer>,
    policy: ResiliencePolicy,
    mail_domain: String,
}

impl EmailNotifier {
    pub fn new(mailer: Arc<dyn Mailer>, policy: ResiliencePolicy, mail_domain: impl Into<String>) -> Self {
        Self {
            mailer,
            policy,
            mail_domain: mail_domain.into(),
        }
    }

    fn compose(&self, event: &EmployeeCheckedOut) -> Email {
        let body = format!(
            "Hello,\n\n\
             You have successfully checked out.\n\n\
             Check-in time: {}\n\
             Check-out time: {}\n\
             Hours worked: {:.2}\n\n\
             Thank you!\n",
            event.check_in_at.format(TIME_FORMAT),
            event.check_out_at.format(TIME_FORMAT),
            event.hours_worked,
        );

        Email {
            to: format!("{}@{}", event.employee_id, self.mail_domain),
            subject: SUBJECT.to_string(),
            body,
        }
    }
}

#[async_trait]
impl EventHandler for EmailNotifier {
    fn name(&self) -> &'static str {
        "email_notifier"
    }

    async fn on_checked_out(&self, event: &EmployeeCheckedOut) -> Result<(), HandlerError> {
        let email = self.compose(event);

        self.policy
            .execute(|| self.mailer.send(&email))
            .await
            .map_err(|e| {
                error!(
                    event_id = %event.header.event_id,
                    to = %email.to,
                    attempts = e.attempts,
                    error = %e.last_error,
                    "Failed to send summary email"
                );
                HandlerError::Failed(e.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::time_record::{DomainEvent, EmployeeId, TimeRecord};
    use crate::external::ExternalError;
    use crate::utils::{CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryExecutor};
    use chrono::{Duration, TimeZone, Utc};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<Email>>,
    }

    #[async_trait]
    impl Mailer for Outbox {
        async fn send(&self, email: &Email) -> Result<(), ExternalError> {
            self.sent.lock().push(email.clone());
            Ok(())
        }
    }

    fn notifier(mailer: Arc<Outbox>) -> EmailNotifier {
        let policy = ResiliencePolicy::new(
            RetryExecutor::new("smtp", RetryConfig::default()),
            CircuitBreaker::new("smtp", CircuitBreakerConfig::default()),
        );
        EmailNotifier::new(mailer, policy, "company.com")
    }

    #[tokio::test]
    async fn test_sends_summary_to_employee() {
        let mailer = Arc::new(Outbox::default());
        let notifier = notifier(mailer.clone());

        let start = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        let mut record = TimeRecord::check_in(&EmployeeId::parse("E100").unwrap(), start);
        record.check_out(start + Duration::minutes(510)).unwrap();
        let event = match DomainEvent::checked_out(&record, start).unwrap() {
            DomainEvent::CheckedOut(e) => e,
            other => panic!("unexpected event {other:?}"),
        };

        notifier.on_checked_out(&event).await.unwrap();

        let sent = mailer.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "E100@company.com");
        assert_eq!(sent[0].subject, "Your Work Hours Summary");
        assert!(sent[0].body.contains("Check-in time: 06 Jan 25 09:00 UTC"));
        assert!(sent[0].body.contains("Check-out time: 06 Jan 25 17:30 UTC"));
        assert!(sent[0].body.contains("Hours worked: 8.50"));
    }
}
