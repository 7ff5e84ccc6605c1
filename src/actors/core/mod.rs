// ============================================================================
// Core Actor Abstractions
// ============================================================================
//
// Types shared by the infrastructure actors and the components reporting
// to them.
//
// ============================================================================

pub mod health;

pub use health::*;
