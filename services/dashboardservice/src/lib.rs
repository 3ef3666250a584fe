//! Dashboard Service Crate
//!
//! Serves the live traffic dashboard:
//! - Non-RT service trait for managed start/stop
//! - REST API with Axum (history, gateways, health)
//! - WebSocket fan-out of traffic observations to viewers
//!
//! # Example
//!
//! ```rust,ignore
//! use dashboardservice::{DashboardService, NonRtService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let history = std::sync::Arc::new(trafficstate::history::HistoryStore::new());
//!     let broadcaster = std::sync::Arc::new(trafficstate::broadcast::Broadcaster::new(history.clone()));
//!     let mut dashboard = DashboardService::new("0.0.0.0:5000", history, broadcaster);
//!     dashboard.start().await.unwrap();
//! }
//! ```

pub mod traits;
pub mod rest_api;
pub mod ws;

// Re-exports
pub use traits::{NonRtService, ServiceError, ServiceResult, ServiceStatus};
pub use rest_api::{create_router, DashboardService, DashboardState};
