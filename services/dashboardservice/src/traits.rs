//! Dashboard Service Traits
//!
//! Defines the contract for the long-running dashboard-side services.
//! These services may perform blocking I/O and have no timing guarantees.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service start failed: {0}")]
    StartFailed(String),
    #[error("Service stop failed: {0}")]
    StopFailed(String),
    #[error("Service not running")]
    NotRunning,
    #[error("Service already running")]
    AlreadyRunning,
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Service status information
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub running: bool,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ServiceStatus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            running: false,
            started_at: None,
        }
    }
}

/// Long-running service lifecycle
#[async_trait]
pub trait NonRtService: Send + Sync {
    /// Unique name of the service
    fn name(&self) -> &str;

    /// Start the service
    async fn start(&mut self) -> ServiceResult<()>;

    /// Stop the service
    async fn stop(&mut self) -> ServiceResult<()>;

    /// Check if the service is healthy
    async fn health_check(&self) -> bool;

    /// Get service status
    fn status(&self) -> ServiceStatus;
}
