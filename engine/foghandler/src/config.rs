//! Runtime configuration
//!
//! Defaults live in code; every knob can be overridden through a `FOG_*`
//! environment variable so the same binary runs against a local mosquitto
//! or a TLS broker.

use std::env;

use anyhow::{Context, Result};
use mqtt::downstreaminterface::MqttDownstreamConfig;

#[derive(Debug, Clone)]
pub struct FogConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Broker CA certificate; plain TCP when unset.
    pub ca_cert_path: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub telemetry_topic: String,
    pub alert_topic: String,
    pub http_addr: String,
}

impl Default for FogConfig {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".into(),
            broker_port: 1883,
            client_id: "fog-handler".into(),
            username: None,
            password: None,
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
            telemetry_topic: "lorawan/traffic".into(),
            alert_topic: "lorawan/alerts".into(),
            http_addr: "0.0.0.0:5000".into(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl FogConfig {
    /// Reads the configuration from `FOG_*` environment variables, keeping
    /// the default for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let broker_port = match env::var("FOG_BROKER_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("FOG_BROKER_PORT '{}' is not a port number", raw))?,
            Err(_) => defaults.broker_port,
        };

        let cfg = Self {
            broker_host: env_or("FOG_BROKER_HOST", &defaults.broker_host),
            broker_port,
            client_id: env_or("FOG_CLIENT_ID", &defaults.client_id),
            username: env::var("FOG_USERNAME").ok(),
            password: env::var("FOG_PASSWORD").ok(),
            ca_cert_path: env::var("FOG_CA_CERT").ok(),
            client_cert_path: env::var("FOG_CLIENT_CERT").ok(),
            client_key_path: env::var("FOG_CLIENT_KEY").ok(),
            telemetry_topic: env_or("FOG_TELEMETRY_TOPIC", &defaults.telemetry_topic),
            alert_topic: env_or("FOG_ALERT_TOPIC", &defaults.alert_topic),
            http_addr: env_or("FOG_HTTP_ADDR", &defaults.http_addr),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.broker_host.is_empty() {
            anyhow::bail!("broker host must not be empty");
        }
        if self.telemetry_topic.is_empty() || self.alert_topic.is_empty() {
            anyhow::bail!("telemetry and alert topics must not be empty");
        }
        if self.http_addr.is_empty() {
            anyhow::bail!("HTTP listen address must not be empty");
        }
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            anyhow::bail!("FOG_CLIENT_CERT and FOG_CLIENT_KEY must be set together");
        }
        Ok(())
    }

    /// The transport slice of this configuration, shaped for the gateway.
    pub fn downstream(&self) -> MqttDownstreamConfig {
        MqttDownstreamConfig {
            host: self.broker_host.clone(),
            port: self.broker_port,
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            subscribe_filter: self.telemetry_topic.clone(),
            ca_cert_path: self.ca_cert_path.clone(),
            client_cert_path: self.client_cert_path.clone(),
            client_key_path: self.client_key_path.clone(),
            ..MqttDownstreamConfig::default()
        }
    }
}
