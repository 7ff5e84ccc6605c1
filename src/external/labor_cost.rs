use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{error, info};

use super::ExternalError;

/// Body of `POST {base_url}/api/labor-cost`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaborCostReport {
    pub employee_id: String,
    pub hours_worked: f64,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait LaborCostApi: Send + Sync {
    async fn record_labor_cost(&self, report: &LaborCostReport) -> Result<(), ExternalError>;
}

pub struct LegacyLaborCostClient {
    client: Client,
    endpoint: String,
}

impl LegacyLaborCostClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ExternalError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/labor-cost", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LaborCostApi for LegacyLaborCostClient {
    async fn record_labor_cost(&self, report: &LaborCostReport) -> Result<(), ExternalError> {
        info!(
            employee_id = %report.employee_id,
            hours = report.hours_worked,
            "Sending labor cost to legacy API"
        );

        let response = self.client.post(&self.endpoint).json(report).send().await?;
        let status = response.status();

        if status != StatusCode::OK && status != StatusCode::CREATED {
            error!(status_code = status.as_u16(), "Unexpected status code from legacy API");
            return Err(ExternalError::UnexpectedStatus(status.as_u16()));
        }

        info!(employee_id = %report.employee_id, "Labor cost sent successfully");
        Ok(())
    }
}
