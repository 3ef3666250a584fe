//! Telemetry message handling
//!
//! The single entry point for inbound MQTT payloads: decode, apply the
//! field defaults, classify, record, fan out to viewers and republish an
//! alert when the level calls for one. A bad payload is logged together
//! with its content and dropped; nothing propagates back to the transport.

use std::sync::Arc;

use mqtt::MqttMessage;
use trafficstate::broadcast::Broadcaster;
use trafficstate::model::{Observation, ReadingError, TelemetryReading};

use crate::alerts::AlertPublisher;

#[derive(thiserror::Error, Debug)]
pub enum HandleError {
    #[error("payload is not valid telemetry JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Reading(#[from] ReadingError),
}

pub struct MessageHandler {
    broadcaster: Arc<Broadcaster>,
    alerts: AlertPublisher,
}

impl MessageHandler {
    pub fn new(broadcaster: Arc<Broadcaster>, alerts: AlertPublisher) -> Self {
        Self {
            broadcaster,
            alerts,
        }
    }

    /// Processes one inbound message end to end. Never errors out to the
    /// caller; the gateway keeps delivering whatever a payload contained.
    pub async fn handle(&self, message: MqttMessage) {
        match self.process(&message).await {
            Ok(observation) => {
                log::info!(
                    "{} vehicles reported by '{}' at ({:.5}, {:.5}) [{}]",
                    observation.vehicle_count,
                    observation.gateway,
                    observation.lat,
                    observation.lng,
                    observation.traffic_level
                );
            }
            Err(e) => {
                log::warn!(
                    "dropping message on '{}': {} (payload: {})",
                    message.topic,
                    e,
                    String::from_utf8_lossy(&message.payload)
                );
            }
        }
    }

    async fn process(&self, message: &MqttMessage) -> Result<Observation, HandleError> {
        let reading: TelemetryReading = serde_json::from_slice(&message.payload)?;
        let observation = reading.into_observation()?;

        self.broadcaster.publish(observation.clone()).await;
        if observation.traffic_level.is_alert() {
            self.alerts.publish(&observation).await;
        }
        Ok(observation)
    }
}
