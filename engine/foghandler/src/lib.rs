//! Fog Handler Engine
//!
//! Consumes roadside traffic telemetry from the MQTT gateway, classifies
//! and records it, fans updates out to dashboard viewers and republishes
//! MEDIUM/HEAVY readings on the alert topic.

pub mod alerts;
pub mod config;
pub mod handler;

// Re-exports
pub use alerts::AlertPublisher;
pub use config::FogConfig;
pub use handler::MessageHandler;
