use async_trait::async_trait;
use tracing::debug;

use crate::domain::time_record::{DomainEvent, EmployeeCheckedIn, EmployeeCheckedOut};
use crate::messaging::{HandlerError, MessageHandler};

// ============================================================================
// Event Dispatcher - decodes a payload and routes it by variant
// ============================================================================

/// Business reaction to time record events. Variants a handler does not
/// care about are acknowledged without side effects.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_checked_in(&self, _event: &EmployeeCheckedIn) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn on_checked_out(&self, _event: &EmployeeCheckedOut) -> Result<(), HandlerError> {
        Ok(())
    }
}

pub struct EventDispatcher<H> {
    handler: H,
}

impl<H: EventHandler> EventDispatcher<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<H: EventHandler> MessageHandler for EventDispatcher<H> {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let event = DomainEvent::from_payload(payload)
            .map_err(|e| HandlerError::Malformed(e.to_string()))?;

        let header = event.header();
        debug!(
            handler = self.handler.name(),
            event_id = %header.event_id,
            event_type = event.event_type(),
            version = header.version,
            "Dispatching event"
        );

        match &event {
            DomainEvent::CheckedIn(e) => self.handler.on_checked_in(e).await,
            DomainEvent::CheckedOut(e) => self.handler.on_checked_out(e).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::time_record::{EmployeeId, TimeRecord};
    use chrono::{Duration, Utc};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CheckoutsOnly {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler for CheckoutsOnly {
        fn name(&self) -> &'static str {
            "checkouts_only"
        }

        async fn on_checked_out(&self, event: &EmployeeCheckedOut) -> Result<(), HandlerError> {
            self.seen.lock().push(event.employee_id.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_routes_by_variant() {
        let dispatcher = EventDispatcher::new(CheckoutsOnly::default());
        let start = Utc::now() - Duration::hours(2);
        let mut record = TimeRecord::check_in(&EmployeeId::parse("E100").unwrap(), start);

        let checked_in = DomainEvent::checked_in(&record, start);
        dispatcher.handle(&checked_in.to_payload().unwrap()).await.unwrap();
        assert!(dispatcher.handler.seen.lock().is_empty());

        record.check_out(Utc::now()).unwrap();
        let checked_out = DomainEvent::checked_out(&record, Utc::now()).unwrap();
        dispatcher.handle(&checked_out.to_payload().unwrap()).await.unwrap();
        assert_eq!(*dispatcher.handler.seen.lock(), vec!["E100".to_string()]);
    }

    #[tokio::test]
    async fn test_garbage_is_malformed() {
        let dispatcher = EventDispatcher::new(CheckoutsOnly::default());
        let err = dispatcher.handle(b"{not json").await.unwrap_err();
        assert!(matches!(err, HandlerError::Malformed(_)));
    }
}
