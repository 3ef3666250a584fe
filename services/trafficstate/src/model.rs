use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

/// ---- Wire schema (telemetry over MQTT) ----

/// Wall-clock format used when a reading arrives without a timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const UNKNOWN_GATEWAY: &str = "unknown";

/// A raw telemetry reading as published by a roadside gateway.
/// Every field is optional on the wire; defaults are applied on conversion.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryReading {
    #[serde(default)]
    pub timestamp: Option<String>,

    #[serde(default)]
    pub location: Option<Location>,

    /// Accepted as integer, fractional number or numeric string.
    #[serde(default, deserialize_with = "present_value")]
    pub vehicle_count: Option<serde_json::Value>,

    #[serde(default)]
    pub gateway_id: Option<String>,
}

/// Keeps an explicit `null` as a present (and unparsable) value instead of
/// folding it into the absent-field default.
fn present_value<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lng: f64,
}

#[derive(thiserror::Error, Debug)]
pub enum ReadingError {
    #[error("vehicle_count is not a non-negative integer: {0}")]
    VehicleCount(String),
}

impl TelemetryReading {
    /// Applies the field defaults and derives the traffic level.
    /// Fails only on a vehicle_count that is present but cannot be read
    /// as a non-negative integer.
    pub fn into_observation(self) -> Result<Observation, ReadingError> {
        let vehicle_count = match &self.vehicle_count {
            None => 0,
            Some(value) => coerce_vehicle_count(value)?,
        };
        let location = self.location.unwrap_or_default();
        let timestamp = self
            .timestamp
            .unwrap_or_else(|| Utc::now().format(TIMESTAMP_FORMAT).to_string());
        let gateway = self
            .gateway_id
            .unwrap_or_else(|| UNKNOWN_GATEWAY.to_string());

        Ok(Observation {
            timestamp,
            lat: location.lat,
            lng: location.lng,
            vehicle_count,
            gateway,
            traffic_level: TrafficLevel::classify(vehicle_count),
        })
    }
}

fn coerce_vehicle_count(value: &serde_json::Value) -> Result<u32, ReadingError> {
    let rejected = || ReadingError::VehicleCount(value.to_string());
    match value {
        serde_json::Value::Number(number) => {
            if let Some(count) = number.as_u64() {
                u32::try_from(count).map_err(|_| rejected())
            } else if let Some(count) = number.as_f64() {
                // fractional counts truncate toward zero
                if count >= 0.0 && count < u32::MAX as f64 {
                    Ok(count as u32)
                } else {
                    Err(rejected())
                }
            } else {
                Err(rejected())
            }
        }
        serde_json::Value::String(text) => {
            text.trim().parse::<u32>().map_err(|_| rejected())
        }
        _ => Err(rejected()),
    }
}

/// ---- Domain types ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrafficLevel {
    Low,
    Medium,
    Heavy,
}

impl TrafficLevel {
    /// Pure severity mapping: `< 5` is LOW, `5..15` is MEDIUM, `>= 15` is HEAVY.
    pub fn classify(vehicle_count: u32) -> Self {
        match vehicle_count {
            0..=4 => TrafficLevel::Low,
            5..=14 => TrafficLevel::Medium,
            _ => TrafficLevel::Heavy,
        }
    }

    /// MEDIUM and HEAVY observations republish an alert.
    pub fn is_alert(self) -> bool {
        matches!(self, TrafficLevel::Medium | TrafficLevel::Heavy)
    }
}

impl fmt::Display for TrafficLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TrafficLevel::Low => "LOW",
            TrafficLevel::Medium => "MEDIUM",
            TrafficLevel::Heavy => "HEAVY",
        };
        f.write_str(label)
    }
}

/// One accepted telemetry reading, all defaults applied, severity derived.
/// Serializes flat; this is the shape stored in history, returned by the
/// read queries and pushed to viewers as an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: String,
    pub lat: f64,
    pub lng: f64,
    pub vehicle_count: u32,
    pub gateway: String,
    pub traffic_level: TrafficLevel,
}

/// The record republished on the alert topic for MEDIUM/HEAVY observations.
/// Keeps the inbound field naming (`gateway_id`, nested `location`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub timestamp: String,
    pub gateway_id: String,
    pub vehicle_count: u32,
    pub traffic_level: TrafficLevel,
    pub location: Location,
}

impl From<&Observation> for AlertMessage {
    fn from(observation: &Observation) -> Self {
        Self {
            timestamp: observation.timestamp.clone(),
            gateway_id: observation.gateway.clone(),
            vehicle_count: observation.vehicle_count,
            traffic_level: observation.traffic_level,
            location: Location {
                lat: observation.lat,
                lng: observation.lng,
            },
        }
    }
}

/// ---- Viewer protocol ----

/// Events pushed to a dashboard viewer. A viewer receives exactly one
/// `init` on join, then one `update` per accepted observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ViewerEvent {
    Init {
        messages: Vec<Observation>,
        gateways: Vec<String>,
    },
    Update(Observation),
}
