//! Roadside gateway simulator: publishes one telemetry reading every five
//! seconds, for exercising the pipeline against a local or remote broker.

use std::env;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tracing::info;

use mqtt::downstreaminterface::{
    DownstreamEvent, DownstreamInterface, MqttDownstream, MqttDownstreamConfig,
};
use mqtt::models::types::{MqttPublish, Qos};

const PUBLISH_INTERVAL: Duration = Duration::from_secs(5);

/// Small LCG, seeded from the clock. Nothing here needs more randomness
/// than a plausible vehicle count.
struct Lcg(u64);

impl Lcg {
    fn from_clock() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
        Self(nanos | 1)
    }

    fn next_count(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) % 20) as u32 + 1
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let gateway_id = env_or("SIM_GATEWAY_ID", "lorawan-gw-1");
    let topic = env_or("SIM_TOPIC", "lorawan/traffic");
    let cfg = MqttDownstreamConfig {
        host: env_or("SIM_BROKER_HOST", "127.0.0.1"),
        port: env_or("SIM_BROKER_PORT", "1883").parse()?,
        client_id: format!("roadsidesim-{}", gateway_id),
        ca_cert_path: env::var("SIM_CA_CERT").ok(),
        client_cert_path: env::var("SIM_CLIENT_CERT").ok(),
        client_key_path: env::var("SIM_CLIENT_KEY").ok(),
        ..MqttDownstreamConfig::default()
    };

    let mut downstream = MqttDownstream::connect(cfg.clone()).await?;
    loop {
        match downstream.next_event().await? {
            DownstreamEvent::Connected => break,
            DownstreamEvent::Disconnected(reason) => {
                anyhow::bail!("connect to {}:{} failed: {}", cfg.host, cfg.port, reason);
            }
            DownstreamEvent::Message(_) => {}
        }
    }
    info!(
        "Simulator connected to {}:{}. Publishing to '{}' as '{}'.",
        cfg.host, cfg.port, topic, gateway_id
    );

    let mut rng = Lcg::from_clock();
    let mut ticker = tokio::time::interval(PUBLISH_INTERVAL);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Simulator stopping.");
                downstream.disconnect().await?;
                return Ok(());
            }

            _ = ticker.tick() => {
                let vehicle_count = rng.next_count();
                let payload = json!({
                    "timestamp": chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
                    "location": { "lat": 53.349805, "lng": -6.26031 },
                    "vehicle_count": vehicle_count,
                    "gateway_id": gateway_id,
                });
                downstream
                    .publish(MqttPublish {
                        topic: topic.clone(),
                        payload: payload.to_string().into_bytes(),
                        retain: false,
                        qos: Qos::AtMostOnce,
                    })
                    .await?;
                info!("Sent: {}", payload);
            }

            // keep the event loop polled so publishes actually go out
            event = downstream.next_event() => {
                if let Ok(DownstreamEvent::Disconnected(reason)) = event {
                    tracing::warn!("connection lost: {} (transport will retry)", reason);
                }
            }
        }
    }
}
