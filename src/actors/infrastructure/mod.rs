// ============================================================================
// Infrastructure Actors
// ============================================================================
//
// Reusable infrastructure for system concerns:
// - Health monitoring
// - Coordination and supervision
//
// ============================================================================

// Private module declarations
mod coordinator;
mod health_monitor;

// Re-export for public API
pub use coordinator::Coordinator;
pub use health_monitor::{
    GetSystemHealth, HealthMonitorActor, HealthReporter, SystemHealth, UpdateHealth,
};
