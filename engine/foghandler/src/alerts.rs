//! Alert republishing
//!
//! MEDIUM and HEAVY observations go back out on the alert topic at
//! QoS 1. Delivery is queue-and-forget under a timeout: failures are
//! logged, never propagated, so a wedged publish queue cannot stall
//! telemetry processing for more than the enqueue timeout.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use mqtt::{MqttPublish, Qos};
use trafficstate::model::{AlertMessage, Observation};

/// How long one alert may wait for space in the publish queue.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AlertPublisher {
    topic: String,
    publish_tx: mpsc::Sender<MqttPublish>,
    enqueue_timeout: Duration,
}

impl AlertPublisher {
    pub fn new(topic: impl Into<String>, publish_tx: mpsc::Sender<MqttPublish>) -> Self {
        Self {
            topic: topic.into(),
            publish_tx,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
        }
    }

    pub fn with_enqueue_timeout(mut self, enqueue_timeout: Duration) -> Self {
        self.enqueue_timeout = enqueue_timeout;
        self
    }

    /// Queues an alert for the observation. Every alerting observation is
    /// republished, repeats from the same gateway included.
    pub async fn publish(&self, observation: &Observation) {
        let alert = AlertMessage::from(observation);
        let payload = match serde_json::to_vec(&alert) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("alert for '{}' failed to serialize: {e}", alert.gateway_id);
                return;
            }
        };
        let publish = MqttPublish {
            topic: self.topic.clone(),
            payload,
            retain: false,
            qos: Qos::AtLeastOnce,
        };

        match timeout(self.enqueue_timeout, self.publish_tx.send(publish)).await {
            Ok(Ok(())) => {
                log::debug!(
                    "{} alert queued for '{}' ({} vehicles)",
                    alert.traffic_level,
                    alert.gateway_id,
                    alert.vehicle_count
                );
            }
            Ok(Err(_)) => {
                log::error!(
                    "alert for '{}' dropped, publish channel closed",
                    alert.gateway_id
                );
            }
            Err(_) => {
                log::error!(
                    "alert for '{}' dropped, publish queue still full after {:?}",
                    alert.gateway_id,
                    self.enqueue_timeout
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trafficstate::model::TrafficLevel;

    fn observation(vehicle_count: u32) -> Observation {
        Observation {
            timestamp: "2025-03-01 10:00:00".into(),
            lat: 53.3,
            lng: -6.2,
            vehicle_count,
            gateway: "gw-1".into(),
            traffic_level: TrafficLevel::classify(vehicle_count),
        }
    }

    #[tokio::test]
    async fn test_alert_is_queued_at_least_once() {
        let (publish_tx, mut publish_rx) = mpsc::channel(8);
        let publisher = AlertPublisher::new("lorawan/alerts", publish_tx);

        publisher.publish(&observation(20)).await;

        let queued = publish_rx.recv().await.unwrap();
        assert_eq!(queued.topic, "lorawan/alerts");
        assert_eq!(queued.qos, Qos::AtLeastOnce);
        assert!(!queued.retain);

        let alert: AlertMessage = serde_json::from_slice(&queued.payload).unwrap();
        assert_eq!(alert.gateway_id, "gw-1");
        assert_eq!(alert.vehicle_count, 20);
        assert_eq!(alert.traffic_level, TrafficLevel::Heavy);
        assert_eq!(alert.location.lat, 53.3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_gives_up_after_timeout() {
        let (publish_tx, _publish_rx) = mpsc::channel(1);
        let publisher = AlertPublisher::new("lorawan/alerts", publish_tx)
            .with_enqueue_timeout(Duration::from_millis(50));

        // first alert fills the queue, second must time out
        publisher.publish(&observation(20)).await;
        let started = tokio::time::Instant::now();
        publisher.publish(&observation(21)).await;
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_closed_channel_does_not_panic() {
        let (publish_tx, publish_rx) = mpsc::channel(1);
        drop(publish_rx);
        let publisher = AlertPublisher::new("lorawan/alerts", publish_tx);
        publisher.publish(&observation(20)).await;
    }
}
