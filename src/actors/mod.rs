// ============================================================================
// Actors Module
// ============================================================================
//
// Actor-based infrastructure for supervision and health.
//
// Structure:
// - core/           - Shared types (HealthStatus, ComponentHealth)
// - infrastructure/ - Health monitor actor and the coordinator
//
// Note: Domain logic (time records) uses services, NOT actors.
//       Actors are reserved for infrastructure concerns only.
//
// ============================================================================

// Private module declarations
mod core;
mod infrastructure;

pub use core::{ComponentHealth, HealthStatus};
pub use infrastructure::{
    Coordinator, GetSystemHealth, HealthMonitorActor, HealthReporter, SystemHealth, UpdateHealth,
};
