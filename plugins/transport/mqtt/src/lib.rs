//! MQTT broker link built on `rumqttc`.
//!
//! [`MqttLink::connect`] waits for the broker's CONNACK, then hands the
//! event loop to a background task. That task keeps outgoing traffic
//! flowing and pushes inbound publishes into the registered
//! [`MessageHandler`].

pub mod tls;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, TlsConfiguration,
    Transport,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tape_api::{BrokerLink, LinkError, LinkFuture, Message, MessageHandler, QoS, SslConfig};

/// Bound on requests queued between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 64;
/// Pause before the event loop retries after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// How long `shutdown` waits for the DISCONNECT to go out.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub ssl: SslConfig,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "mqtt-tape".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
            ssl: SslConfig::default(),
        }
    }
}

impl MqttConfig {
    /// Translate into `rumqttc` options, loading TLS material if enabled.
    pub fn options(&self) -> Result<MqttOptions, LinkError> {
        if self.host.trim().is_empty() {
            return Err(LinkError::config("broker host is empty"));
        }
        if self.client_id.is_empty() || self.client_id.starts_with(' ') {
            return Err(LinkError::config(format!("invalid client id {:?}", self.client_id)));
        }

        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        if self.ssl.enable {
            let tls = tls::client_config(&self.ssl)?;
            options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(Arc::new(tls))));
        }
        Ok(options)
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Inbound delivery
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct InboundState {
    handler: Option<Arc<dyn MessageHandler>>,
    halted: bool,
}

/// Gate between the event loop task and the handler. Delivery happens
/// under the lock, so once `halt` returns no new `on_message` starts.
#[derive(Default)]
struct Inbound {
    state: Mutex<InboundState>,
}

impl Inbound {
    fn register(&self, handler: Arc<dyn MessageHandler>) -> Result<(), LinkError> {
        let mut state = self.lock();
        if state.handler.is_some() {
            return Err(LinkError::config("message handler already registered"));
        }
        state.handler = Some(handler);
        Ok(())
    }

    fn deliver(&self, message: Message) {
        let state = self.lock();
        match (&state.handler, state.halted) {
            (Some(handler), false) => handler.on_message(message),
            _ => tracing::debug!(topic = %message.topic, "inbound message discarded"),
        }
    }

    fn halt(&self) {
        self.lock().halted = true;
    }

    fn lock(&self) -> MutexGuard<'_, InboundState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ═══════════════════════════════════════════════════════════════
//  MqttLink
// ═══════════════════════════════════════════════════════════════

pub struct MqttLink {
    client: AsyncClient,
    inbound: Arc<Inbound>,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    addr: String,
}

impl MqttLink {
    /// Connect and wait for the broker to accept the session.
    pub async fn connect(config: &MqttConfig) -> Result<Self, LinkError> {
        let options = config.options()?;
        let addr = config.addr();
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let timeout = Duration::from_secs(config.connect_timeout_secs);
        tokio::time::timeout(timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| LinkError::io(format!("no CONNACK within {timeout:?}")))?
            .map_err(|e| e.with_context(format!("connect to {addr}")))?;
        tracing::info!(
            addr = %addr,
            client_id = %config.client_id,
            tls = config.ssl.enable,
            "connected to broker"
        );

        let inbound = Arc::new(Inbound::default());
        let token = CancellationToken::new();
        let task = tokio::spawn(run_event_loop(eventloop, inbound.clone(), token.clone()));

        Ok(Self {
            client,
            inbound,
            token,
            task: Mutex::new(Some(task)),
            addr,
        })
    }

    /// Register the receiver of inbound publishes. Only one handler per link.
    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) -> Result<(), LinkError> {
        self.inbound.register(handler)
    }

    /// Send DISCONNECT after any queued publishes and wait for the event
    /// loop to finish.
    pub async fn shutdown(&self) -> Result<(), LinkError> {
        let sent = self
            .client
            .disconnect()
            .await
            .map_err(|e| LinkError::protocol(format!("disconnect from {}: {e}", self.addr)));

        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(mut task) = task {
            if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut task).await.is_err() {
                tracing::warn!(addr = %self.addr, "event loop did not finish, aborting");
                self.token.cancel();
                task.abort();
            }
        }
        tracing::info!(addr = %self.addr, "disconnected from broker");
        sent
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl BrokerLink for MqttLink {
    fn subscribe(&self, filter: &str, qos: QoS) -> LinkFuture<'_, ()> {
        let filter = filter.to_string();
        Box::pin(async move {
            self.client
                .subscribe(filter.clone(), to_mqtt_qos(qos))
                .await
                .map_err(|e| LinkError::protocol(format!("subscribe to {filter}: {e}")))
        })
    }

    fn publish(&self, message: Message) -> LinkFuture<'_, ()> {
        Box::pin(async move {
            let Message { topic, payload, qos, retain } = message;
            self.client
                .publish(topic.clone(), to_mqtt_qos(qos), retain, payload)
                .await
                .map_err(|e| LinkError::protocol(format!("publish to {topic}: {e}")))
        })
    }

    fn stop_loop(&self) -> LinkFuture<'_, ()> {
        Box::pin(async move {
            self.inbound.halt();
            tracing::debug!(addr = %self.addr, "inbound delivery stopped");
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Event loop
// ═══════════════════════════════════════════════════════════════

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), LinkError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(connection_error(e)),
        }
    }
}

async fn run_event_loop(mut eventloop: EventLoop, inbound: Arc<Inbound>, token: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let message = Message {
                    topic: topic_string(&p.topic),
                    payload: p.payload.to_vec(),
                    qos: from_mqtt_qos(p.qos),
                    retain: p.retain,
                };
                inbound.deliver(message);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => tracing::info!("reconnected to broker"),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "broker connection error, retrying");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
    tracing::debug!("event loop finished");
}

fn connection_error(e: ConnectionError) -> LinkError {
    match e {
        ConnectionError::ConnectionRefused(code) => {
            LinkError::protocol(format!("broker refused connection: {code:?}"))
        }
        other => LinkError::io(other.to_string()),
    }
}

fn topic_string(raw: &impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(raw.as_ref()).into_owned()
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn from_mqtt_qos(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tape_api::ErrorKind;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl MessageHandler for Collect {
        fn on_message(&self, message: Message) {
            self.0.lock().unwrap().push(message.topic);
        }
    }

    fn message(topic: &str) -> Message {
        Message::new(topic, b"x".to_vec(), QoS::AtMostOnce, false)
    }

    #[test]
    fn defaults_match_a_local_broker() {
        let config = MqttConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert_eq!(config.client_id, "mqtt-tape");
        assert_eq!(config.keep_alive_secs, 60);
        assert!(!config.ssl.enable);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let config: MqttConfig =
            serde_json::from_str(r#"{"host": "broker.lan", "ssl": {"enable": true, "insecure": true}}"#).unwrap();
        assert_eq!(config.host, "broker.lan");
        assert_eq!(config.port, 1883);
        assert!(config.ssl.enable);
        assert!(config.ssl.insecure);
    }

    #[test]
    fn options_carry_address_and_credentials() {
        let config = MqttConfig {
            host: "broker.lan".into(),
            port: 8883,
            username: Some("alice".into()),
            ..MqttConfig::default()
        };
        let options = config.options().unwrap();
        assert_eq!(options.broker_address(), ("broker.lan".to_string(), 8883));
        assert_eq!(options.client_id(), "mqtt-tape");
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn empty_client_id_is_config_error() {
        let config = MqttConfig {
            client_id: String::new(),
            ..MqttConfig::default()
        };
        assert_eq!(config.options().unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn tls_without_ca_is_config_error() {
        let mut config = MqttConfig::default();
        config.ssl.enable = true;
        assert_eq!(config.options().unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn qos_maps_both_ways() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            assert_eq!(from_mqtt_qos(to_mqtt_qos(qos)), qos);
        }
    }

    #[test]
    fn topic_bytes_become_a_string() {
        assert_eq!(topic_string(&"a/b".to_string()), "a/b");
        assert_eq!(topic_string(&b"c/d".to_vec()), "c/d");
    }

    #[test]
    fn inbound_delivers_until_halted() {
        let inbound = Inbound::default();
        let collect = Arc::new(Collect::default());

        inbound.deliver(message("before-handler"));
        inbound.register(collect.clone()).unwrap();
        inbound.deliver(message("a"));
        inbound.halt();
        inbound.deliver(message("b"));

        assert_eq!(*collect.0.lock().unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn second_handler_is_rejected() {
        let inbound = Inbound::default();
        inbound.register(Arc::new(Collect::default())).unwrap();
        let err = inbound.register(Arc::new(Collect::default())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
