//! Dashboard HTTP Service using Axum
//!
//! Read-side boundary over the shared traffic state:
//! - GET /         - Dashboard page
//! - GET /data     - Last N observations (default 25)
//! - GET /gateways - All known gateways, sorted
//! - GET /ws       - Viewer WebSocket (init event, then updates)
//! - GET /health   - Service health document

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::Html,
    routing::get,
    Json, Router,
};

use trafficstate::{Broadcaster, HistoryStore, Observation};

use crate::traits::{NonRtService, ServiceError, ServiceResult, ServiceStatus};
use crate::ws::dashboard_ws_handler;

const DEFAULT_QUERY_LIMIT: usize = 25;

/// State shared across handlers and viewer sockets.
#[derive(Clone)]
pub struct DashboardState {
    pub history: Arc<HistoryStore>,
    pub broadcaster: Arc<Broadcaster>,
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: String,
    viewers: usize,
    gateways: usize,
    timestamp: String,
}

#[derive(serde::Deserialize)]
struct DataQuery {
    #[serde(default)]
    limit: Option<usize>,
}

/// Serve the dashboard page itself
async fn dashboard_page() -> Html<&'static str> {
    Html(include_str!("../assets/dashboard.html"))
}

/// Last N observations, oldest first
async fn get_data(
    State(state): State<DashboardState>,
    Query(query): Query<DataQuery>,
) -> Json<Vec<Observation>> {
    let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
    Json(state.history.snapshot(limit).await)
}

/// Every gateway seen so far, sorted
async fn get_gateways(State(state): State<DashboardState>) -> Json<Vec<String>> {
    Json(state.history.gateways().await)
}

/// Health check endpoint
async fn health_check(State(state): State<DashboardState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        viewers: state.broadcaster.viewer_count().await,
        gateways: state.history.gateways().await.len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Create the dashboard router
pub fn create_router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(dashboard_page))
        .route("/data", get(get_data))
        .route("/gateways", get(get_gateways))
        .route("/ws", get(dashboard_ws_handler))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Dashboard HTTP Service
pub struct DashboardService {
    name: String,
    bind_addr: String,
    state: DashboardState,
    status: ServiceStatus,
    bound_addr: Option<SocketAddr>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl DashboardService {
    pub fn new(bind_addr: &str, history: Arc<HistoryStore>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            name: "dashboard".to_string(),
            bind_addr: bind_addr.to_string(),
            state: DashboardState {
                history,
                broadcaster,
            },
            status: ServiceStatus::new("dashboard"),
            bound_addr: None,
            shutdown_tx: None,
        }
    }

    pub fn state(&self) -> DashboardState {
        self.state.clone()
    }

    /// The address actually bound, available once started. Differs from the
    /// configured address when binding port 0.
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound_addr
    }
}

#[async_trait::async_trait]
impl NonRtService for DashboardService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> ServiceResult<()> {
        if self.status.running {
            return Err(ServiceError::AlreadyRunning);
        }

        let router = create_router(self.state.clone());

        let addr: SocketAddr = self
            .bind_addr
            .parse()
            .map_err(|e| ServiceError::StartFailed(format!("Invalid address: {}", e)))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServiceError::StartFailed(format!("Bind {} failed: {}", addr, e)))?;
        let bound = listener
            .local_addr()
            .map_err(|e| ServiceError::StartFailed(e.to_string()))?;
        self.bound_addr = Some(bound);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        tokio::spawn(async move {
            log::info!("Dashboard listening on {}", bound);

            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    log::info!("Dashboard shutting down");
                })
                .await
                .ok();
        });

        self.status.running = true;
        self.status.started_at = Some(chrono::Utc::now());

        log::info!("Dashboard service started on {}", bound);
        Ok(())
    }

    async fn stop(&mut self) -> ServiceResult<()> {
        if !self.status.running {
            return Err(ServiceError::NotRunning);
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        self.status.running = false;
        self.bound_addr = None;
        log::info!("Dashboard service stopped");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.status.running
    }

    fn status(&self) -> ServiceStatus {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trafficstate::model::{TelemetryReading, TrafficLevel};

    fn fresh_state() -> DashboardState {
        let history = Arc::new(HistoryStore::new());
        let broadcaster = Arc::new(Broadcaster::new(history.clone()));
        DashboardState {
            history,
            broadcaster,
        }
    }

    async fn seed(state: &DashboardState, count: u32, gateway: &str) {
        let reading: TelemetryReading = serde_json::from_value(serde_json::json!({
            "vehicle_count": count,
            "gateway_id": gateway,
        }))
        .unwrap();
        let observation = reading.into_observation().unwrap();
        state.broadcaster.publish(observation).await;
    }

    #[tokio::test]
    async fn test_dashboard_service_lifecycle() {
        let state = fresh_state();
        let mut service =
            DashboardService::new("127.0.0.1:0", state.history.clone(), state.broadcaster.clone());

        service.start().await.unwrap();
        assert!(service.status().running);
        assert!(service.health_check().await);
        assert!(service.bound_addr().is_some());
        assert!(matches!(
            service.start().await,
            Err(ServiceError::AlreadyRunning)
        ));

        service.stop().await.unwrap();
        assert!(!service.status().running);
        assert!(matches!(service.stop().await, Err(ServiceError::NotRunning)));
    }

    #[tokio::test]
    async fn test_data_handler_returns_last_n() {
        let state = fresh_state();
        for n in 1..=30 {
            seed(&state, n, "gw-a").await;
        }

        let Json(data) = get_data(
            State(state.clone()),
            Query(DataQuery { limit: None }),
        )
        .await;
        assert_eq!(data.len(), 25);
        assert_eq!(data.last().unwrap().vehicle_count, 30);
        assert_eq!(data.last().unwrap().traffic_level, TrafficLevel::Heavy);

        let Json(two) = get_data(
            State(state.clone()),
            Query(DataQuery { limit: Some(2) }),
        )
        .await;
        assert_eq!(two.len(), 2);
        assert_eq!(two[0].vehicle_count, 29);
    }

    #[tokio::test]
    async fn test_gateways_handler_sorted() {
        let state = fresh_state();
        seed(&state, 1, "gw-b").await;
        seed(&state, 2, "gw-a").await;
        seed(&state, 3, "gw-b").await;

        let Json(gateways) = get_gateways(State(state.clone())).await;
        assert_eq!(gateways, vec!["gw-a", "gw-b"]);
    }

    #[tokio::test]
    async fn test_health_handler_counts() {
        let state = fresh_state();
        seed(&state, 1, "gw-a").await;
        let _viewer = state.broadcaster.join().await;

        let Json(health) = health_check(State(state.clone())).await;
        let value = serde_json::to_value(&health).unwrap();
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["viewers"], 1);
        assert_eq!(value["gateways"], 1);
    }
}
