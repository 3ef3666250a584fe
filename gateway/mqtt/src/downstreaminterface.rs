use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, Incoming, MqttOptions, QoS, TlsConfiguration, Transport,
};

use crate::models::types::{MqttMessage, MqttPublish, Qos};

#[derive(Debug, Clone)]
pub struct MqttDownstreamConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub subscribe_filter: String,
    /// Broker CA certificate; plain TCP when unset.
    pub ca_cert_path: Option<String>,
    /// Client certificate and key for mutual TLS; both or neither.
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
}

impl Default for MqttDownstreamConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            client_id: "fog-gateway".into(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            subscribe_filter: "lorawan/traffic".into(),
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
        }
    }
}

fn map_qos(q: &Qos) -> QoS {
    match q {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// What the transport reports to the lifecycle manager.
#[derive(Debug)]
pub enum DownstreamEvent {
    /// Session established (initial connect or reconnect).
    Connected,
    /// An inbound message on the subscribed filter.
    Message(MqttMessage),
    /// Connection lost or refused, with the transport's reason.
    Disconnected(String),
}

#[async_trait]
pub trait DownstreamInterface: Send {
    async fn subscribe(&mut self) -> Result<()>;
    async fn next_event(&mut self) -> Result<DownstreamEvent>;
    async fn publish(&mut self, msg: MqttPublish) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
}

pub struct MqttDownstream {
    cfg: MqttDownstreamConfig,
    client: AsyncClient,
    eventloop: rumqttc::EventLoop,
}

impl MqttDownstream {
    pub async fn connect(cfg: MqttDownstreamConfig) -> Result<Self> {
        let mut opts = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
        opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs));

        if let (Some(u), Some(p)) = (cfg.username.clone(), cfg.password.clone()) {
            opts.set_credentials(u, p);
        }

        if let Some(tls) = tls_configuration(&cfg)? {
            opts.set_transport(Transport::Tls(tls));
        }

        let (client, eventloop) = AsyncClient::new(opts, 50);
        Ok(Self {
            cfg,
            client,
            eventloop,
        })
    }
}

fn tls_configuration(cfg: &MqttDownstreamConfig) -> Result<Option<TlsConfiguration>> {
    let Some(ca_path) = &cfg.ca_cert_path else {
        return Ok(None);
    };
    let client_paths = match (&cfg.client_cert_path, &cfg.client_key_path) {
        (Some(cert_path), Some(key_path)) => Some((cert_path, key_path)),
        (None, None) => None,
        _ => anyhow::bail!("client_cert_path and client_key_path must be set together"),
    };

    let ca = fs::read(ca_path).with_context(|| format!("reading CA certificate '{}'", ca_path))?;
    let client_auth = match client_paths {
        Some((cert_path, key_path)) => {
            let cert = fs::read(cert_path)
                .with_context(|| format!("reading client certificate '{}'", cert_path))?;
            let key = fs::read(key_path)
                .with_context(|| format!("reading client key '{}'", key_path))?;
            Some((cert, key))
        }
        None => None,
    };

    Ok(Some(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    }))
}

#[async_trait]
impl DownstreamInterface for MqttDownstream {
    async fn subscribe(&mut self) -> Result<()> {
        self.client
            .subscribe(&self.cfg.subscribe_filter, QoS::AtMostOnce)
            .await
            .with_context(|| format!("subscribe failed for '{}'", self.cfg.subscribe_filter))?;
        Ok(())
    }

    /// Polls the event loop until something the lifecycle manager cares
    /// about happens. Poll errors are reported as `Disconnected`; the next
    /// poll after one issues a fresh connect attempt, so the caller
    /// controls the retry pacing.
    async fn next_event(&mut self) -> Result<DownstreamEvent> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        return Ok(DownstreamEvent::Connected);
                    }
                    return Ok(DownstreamEvent::Disconnected(format!(
                        "broker refused session: {:?}",
                        ack.code
                    )));
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    return Ok(DownstreamEvent::Message(MqttMessage {
                        topic: p.topic,
                        payload: p.payload.to_vec(),
                    }));
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    return Ok(DownstreamEvent::Disconnected("server disconnect".into()));
                }
                Ok(_) => continue,
                Err(e) => return Ok(DownstreamEvent::Disconnected(format!("{:?}", e))),
            }
        }
    }

    async fn publish(&mut self, msg: MqttPublish) -> Result<()> {
        self.client
            .publish(msg.topic, map_qos(&msg.qos), msg.retain, msg.payload)
            .await
            .context("publish failed")?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.client.disconnect().await.context("disconnect failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_disabled_without_ca() {
        let cfg = MqttDownstreamConfig::default();
        assert!(tls_configuration(&cfg).unwrap().is_none());
    }

    #[test]
    fn test_tls_rejects_cert_without_key() {
        let cfg = MqttDownstreamConfig {
            ca_cert_path: Some("/tmp/ca.pem".into()),
            client_cert_path: Some("/tmp/cert.pem".into()),
            client_key_path: None,
            ..MqttDownstreamConfig::default()
        };
        let err = tls_configuration(&cfg).unwrap_err();
        assert!(format!("{:#}", err).contains("set together"));
    }
}
