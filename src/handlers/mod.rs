// ============================================================================
// Event Handlers - business consumers behind the broker queues
// ============================================================================
//
//   labor-cost-queue ──► EventDispatcher<LaborCostReporter> ──► legacy API
//   email-queue      ──► EventDispatcher<EmailNotifier>     ──► SMTP
//
// Both calls go through a ResiliencePolicy. Handlers are idempotent with
// respect to redelivery only as far as the downstream system is.
//
// ============================================================================

pub mod dispatcher;
pub mod email;
pub mod labor_cost;
pub mod resilience;

pub use dispatcher::{EventDispatcher, EventHandler};
pub use email::{EmailNotifier, EMAIL_QUEUE};
pub use labor_cost::{LaborCostReporter, LABOR_COST_QUEUE};
pub use resilience::{ResilienceError, ResiliencePolicy};
