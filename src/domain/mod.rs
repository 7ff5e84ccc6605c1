// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Each aggregate has its own subdirectory with:
// - Value objects
// - Entity
// - Events
// - Errors
// - Repository port
// - Service
//
// Persistence adapters live in `crate::outbox`.
//
// ============================================================================

pub mod time_record;
