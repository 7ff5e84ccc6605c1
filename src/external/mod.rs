// ============================================================================
// External Dependencies - legacy labor cost API and SMTP
// ============================================================================
//
// Each dependency sits behind a trait so handlers can be exercised against
// fakes. The concrete clients do no retrying of their own; resilience is
// applied by the handlers.
//
// ============================================================================

pub mod email;
pub mod labor_cost;

pub use email::{Email, Mailer, SmtpMailer};
pub use labor_cost::{LaborCostApi, LaborCostReport, LegacyLaborCostClient};

#[derive(Debug, thiserror::Error)]
pub enum ExternalError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),

    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build email: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}
