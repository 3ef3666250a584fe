//! Connection lifecycle
//!
//! Owns the MQTT session for the fog handler: drives the initial connect
//! (failure there fails `start`), forwards inbound messages to the engine
//! through a channel, accepts outbound publishes through another, and
//! reconnects after a disconnect with a fixed 5 second delay. One attempt
//! per disconnect event, never a tight retry loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::downstreaminterface::{
    DownstreamEvent, DownstreamInterface, MqttDownstream, MqttDownstreamConfig,
};
use crate::models::types::{MqttMessage, MqttPublish};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub downstream: MqttDownstreamConfig,
    pub message_channel_capacity: usize,
    pub publish_channel_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            downstream: MqttDownstreamConfig::default(),
            message_channel_capacity: 2048,
            publish_channel_capacity: 256,
        }
    }
}

/// Gateway = (Downstream MQTT transport) + (lifecycle state machine) + (channels for the engine)
#[derive(Debug)]
pub struct Gateway {
    join: JoinHandle<Result<()>>,
    messages_rx: mpsc::Receiver<MqttMessage>,
    publish_tx: mpsc::Sender<MqttPublish>,
    shutdown: CancellationToken,
    state: Arc<RwLock<ConnectionState>>,
}

impl Gateway {
    pub fn messages(&mut self) -> &mut mpsc::Receiver<MqttMessage> {
        &mut self.messages_rx
    }

    pub fn publisher(&self) -> mpsc::Sender<MqttPublish> {
        self.publish_tx.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.join.await.context("gateway join failed")?
    }

    pub async fn start(cfg: GatewayConfig) -> Result<Self> {
        let downstream = MqttDownstream::connect(cfg.downstream.clone()).await?;
        Self::start_with(cfg, downstream).await
    }

    /// Starts the gateway over any transport. The initial connect is driven
    /// to completion here: a refused or failed session fails `start`, per
    /// the lifecycle contract, while later disconnects are retried by the
    /// run loop.
    pub async fn start_with<D>(cfg: GatewayConfig, mut downstream: D) -> Result<Self>
    where
        D: DownstreamInterface + 'static,
    {
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));

        loop {
            match downstream.next_event().await? {
                DownstreamEvent::Connected => break,
                DownstreamEvent::Disconnected(reason) => {
                    *state.write().await = ConnectionState::Disconnected;
                    anyhow::bail!(
                        "initial connect to {}:{} failed: {}",
                        cfg.downstream.host,
                        cfg.downstream.port,
                        reason
                    );
                }
                DownstreamEvent::Message(msg) => {
                    warn!("message on '{}' before session established, dropping", msg.topic);
                }
            }
        }
        downstream.subscribe().await?;
        *state.write().await = ConnectionState::Connected;
        info!(
            "Gateway connected to {}:{}, subscribed to '{}'.",
            cfg.downstream.host, cfg.downstream.port, cfg.downstream.subscribe_filter
        );

        let shutdown = CancellationToken::new();
        let (messages_tx, messages_rx) = mpsc::channel(cfg.message_channel_capacity);
        let (publish_tx, publish_rx) = mpsc::channel(cfg.publish_channel_capacity);

        let task_shutdown = shutdown.clone();
        let task_state = state.clone();
        let join = tokio::spawn(run(
            downstream,
            task_shutdown,
            task_state,
            messages_tx,
            publish_rx,
        ));

        Ok(Self {
            join,
            messages_rx,
            publish_tx,
            shutdown,
            state,
        })
    }
}

/// Run loop: receive transport events, forward messages, publish outbound,
/// and walk the Connected -> Reconnecting -> Connected cycle.
async fn run<D>(
    mut downstream: D,
    shutdown: CancellationToken,
    state: Arc<RwLock<ConnectionState>>,
    messages_tx: mpsc::Sender<MqttMessage>,
    mut publish_rx: mpsc::Receiver<MqttPublish>,
) -> Result<()>
where
    D: DownstreamInterface,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Gateway shutdown requested.");
                return release(&mut downstream, &state).await;
            }

            publish = publish_rx.recv() => {
                if let Some(publish) = publish {
                    if let Err(e) = downstream.publish(publish).await {
                        warn!("outbound publish failed: {:#}", e);
                    }
                }
            }

            event = downstream.next_event() => {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => DownstreamEvent::Disconnected(format!("{:#}", e)),
                };
                match event {
                    DownstreamEvent::Message(message) => {
                        tokio::select! {
                            _ = shutdown.cancelled() => {
                                info!("Gateway shutdown requested.");
                                return release(&mut downstream, &state).await;
                            }
                            sent = messages_tx.send(message) => {
                                if sent.is_err() {
                                    warn!("Message receiver dropped. Stopping gateway task.");
                                    return release(&mut downstream, &state).await;
                                }
                            }
                        }
                    }
                    DownstreamEvent::Connected => {
                        match downstream.subscribe().await {
                            Ok(()) => {
                                *state.write().await = ConnectionState::Connected;
                                info!("Gateway reconnected and resubscribed.");
                            }
                            Err(e) => {
                                // session unusable until the transport reports
                                // the next disconnect
                                warn!("resubscribe after reconnect failed: {:#}", e);
                            }
                        }
                    }
                    DownstreamEvent::Disconnected(reason) => {
                        warn!(
                            "Connection lost: {}. Reconnecting in {:?}.",
                            reason, RECONNECT_DELAY
                        );
                        *state.write().await = ConnectionState::Reconnecting;
                        tokio::select! {
                            _ = shutdown.cancelled() => {
                                info!("Gateway shutdown requested.");
                                return release(&mut downstream, &state).await;
                            }
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                        // the next poll issues exactly one reconnect attempt;
                        // a failed attempt comes back as another Disconnected
                    }
                }
            }
        }
    }
}

async fn release<D>(downstream: &mut D, state: &RwLock<ConnectionState>) -> Result<()>
where
    D: DownstreamInterface,
{
    if let Err(e) = downstream.disconnect().await {
        warn!("transport release failed: {:#}", e);
    }
    *state.write().await = ConnectionState::Disconnected;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::Qos;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedDownstream {
        script: VecDeque<DownstreamEvent>,
        subscribes: Arc<Mutex<u32>>,
        published: Arc<Mutex<Vec<MqttPublish>>>,
        released: Arc<Mutex<bool>>,
    }

    impl ScriptedDownstream {
        fn new(script: Vec<DownstreamEvent>) -> Self {
            Self {
                script: script.into(),
                subscribes: Arc::new(Mutex::new(0)),
                published: Arc::new(Mutex::new(Vec::new())),
                released: Arc::new(Mutex::new(false)),
            }
        }
    }

    #[async_trait]
    impl DownstreamInterface for ScriptedDownstream {
        async fn subscribe(&mut self) -> Result<()> {
            *self.subscribes.lock().unwrap() += 1;
            Ok(())
        }

        async fn next_event(&mut self) -> Result<DownstreamEvent> {
            match self.script.pop_front() {
                Some(event) => Ok(event),
                None => std::future::pending().await,
            }
        }

        async fn publish(&mut self, msg: MqttPublish) -> Result<()> {
            self.published.lock().unwrap().push(msg);
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            *self.released.lock().unwrap() = true;
            Ok(())
        }
    }

    fn message(topic: &str, payload: &str) -> DownstreamEvent {
        DownstreamEvent::Message(MqttMessage {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        })
    }

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            message_channel_capacity: 16,
            publish_channel_capacity: 16,
            ..GatewayConfig::default()
        }
    }

    #[tokio::test]
    async fn test_initial_connect_failure_is_fatal() {
        let downstream =
            ScriptedDownstream::new(vec![DownstreamEvent::Disconnected("refused".into())]);
        let err = Gateway::start_with(test_config(), downstream)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("initial connect"));
    }

    #[tokio::test]
    async fn test_messages_flow_after_connect() {
        let downstream = ScriptedDownstream::new(vec![
            DownstreamEvent::Connected,
            message("lorawan/traffic", "one"),
            message("lorawan/traffic", "two"),
        ]);
        let subscribes = downstream.subscribes.clone();
        let released = downstream.released.clone();

        let mut gateway = Gateway::start_with(test_config(), downstream).await.unwrap();
        assert_eq!(gateway.state().await, ConnectionState::Connected);

        let first = gateway.messages().recv().await.unwrap();
        assert_eq!(first.payload, b"one");
        let second = gateway.messages().recv().await.unwrap();
        assert_eq!(second.payload, b"two");

        assert_eq!(*subscribes.lock().unwrap(), 1);
        gateway.stop().await.unwrap();
        assert!(*released.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_waits_then_resubscribes() {
        let downstream = ScriptedDownstream::new(vec![
            DownstreamEvent::Connected,
            message("lorawan/traffic", "before"),
            DownstreamEvent::Disconnected("connection reset".into()),
            DownstreamEvent::Connected,
            message("lorawan/traffic", "after"),
        ]);
        let subscribes = downstream.subscribes.clone();

        let mut gateway = Gateway::start_with(test_config(), downstream).await.unwrap();
        let first = gateway.messages().recv().await.unwrap();
        assert_eq!(first.payload, b"before");

        let waited = tokio::time::Instant::now();
        let second = gateway.messages().recv().await.unwrap();
        assert_eq!(second.payload, b"after");
        assert!(waited.elapsed() >= RECONNECT_DELAY);

        assert_eq!(*subscribes.lock().unwrap(), 2);
        assert_eq!(gateway.state().await, ConnectionState::Connected);
        gateway.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_forwarded_to_transport() {
        let downstream = ScriptedDownstream::new(vec![DownstreamEvent::Connected]);
        let published = downstream.published.clone();

        let gateway = Gateway::start_with(test_config(), downstream).await.unwrap();
        let outbound = MqttPublish {
            topic: "lorawan/alerts".into(),
            payload: b"{\"traffic_level\":\"HEAVY\"}".to_vec(),
            retain: false,
            qos: Qos::AtLeastOnce,
        };
        gateway.publisher().send(outbound.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(published.lock().unwrap().as_slice(), &[outbound]);
        gateway.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_reconnect_delay() {
        let downstream = ScriptedDownstream::new(vec![
            DownstreamEvent::Connected,
            DownstreamEvent::Disconnected("gone".into()),
        ]);
        let released = downstream.released.clone();

        let gateway = Gateway::start_with(test_config(), downstream).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(gateway.state().await, ConnectionState::Reconnecting);

        // stop() must not wait out the remaining reconnect delay
        let stopped = tokio::time::Instant::now();
        gateway.stop().await.unwrap();
        assert!(stopped.elapsed() < RECONNECT_DELAY);
        assert!(*released.lock().unwrap());
    }
}
