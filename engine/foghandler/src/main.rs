use std::sync::Arc;

use dashboardservice::{DashboardService, NonRtService};
use foghandler::alerts::AlertPublisher;
use foghandler::config::FogConfig;
use foghandler::handler::MessageHandler;
use mqtt::{Gateway, GatewayConfig};
use tracing::{info, warn};
use trafficstate::broadcast::Broadcaster;
use trafficstate::history::HistoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let cfg = FogConfig::from_env()?;

    let history = Arc::new(HistoryStore::new());
    let broadcaster = Arc::new(Broadcaster::new(history.clone()));

    // A failed first connect is fatal. Later disconnects are retried
    // inside the gateway task.
    let mut gateway = Gateway::start(GatewayConfig {
        downstream: cfg.downstream(),
        ..GatewayConfig::default()
    })
    .await?;

    let alerts = AlertPublisher::new(cfg.alert_topic.clone(), gateway.publisher());
    let handler = MessageHandler::new(broadcaster.clone(), alerts);

    let mut dashboard = DashboardService::new(&cfg.http_addr, history, broadcaster);
    dashboard.start().await?;

    info!(
        "Fog handler running: telemetry on '{}', alerts on '{}', dashboard on {}.",
        cfg.telemetry_topic, cfg.alert_topic, cfg.http_addr
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // MAIN LOOP: drain gateway messages into the handler until Ctrl-C
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Ctrl-C received, shutting down.");
                break;
            }
            message = gateway.messages().recv() => match message {
                Some(message) => handler.handle(message).await,
                None => {
                    warn!("gateway message channel closed");
                    break;
                }
            },
        }
    }

    gateway.stop().await?;
    dashboard.stop().await?;
    Ok(())
}
