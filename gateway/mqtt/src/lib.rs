pub mod gateway;
pub mod downstreaminterface;

pub mod models;

pub use gateway::{ConnectionState, Gateway, GatewayConfig};
pub use models::types::{MqttMessage, MqttPublish, Qos};
