// ── Bus listener ──
//
// Drives the rumqttc event loop in a background task. Every successful
// CONNACK (the first one and every reconnect) re-issues the subscriptions,
// since the session is clean and the broker forgets them. Publishes are
// forwarded over a bounded channel; routing happens elsewhere.

use std::time::Duration;

use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use secrecy::ExposeSecret;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bifrost_api::ReconnectConfig;
use bifrost_api::backoff::calculate_backoff;

use crate::config::MqttConfig;
use crate::error::CoreError;
use crate::model::ConnectionState;

/// Requests buffered between `AsyncClient` and the event loop.
const CLIENT_CHANNEL_SIZE: usize = 10;

/// How long to keep polling after DISCONNECT so it actually reaches the broker.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// One raw message received from the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Owns the MQTT session. Consumed by [`spawn()`](Self::spawn).
pub struct BusListener {
    config: MqttConfig,
    subscriptions: Vec<String>,
    reconnect: ReconnectConfig,
    connection: watch::Sender<ConnectionState>,
}

impl std::fmt::Debug for BusListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusListener")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

impl BusListener {
    pub fn new(config: MqttConfig, subscriptions: Vec<String>, reconnect: ReconnectConfig) -> Self {
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            subscriptions,
            reconnect,
            connection,
        }
    }

    /// Subscribe to bus connection state changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Start the event loop. Connection failures are retried forever; the
    /// task ends only when `cancel` fires or `tx`'s receiver is dropped.
    pub fn spawn(self, tx: mpsc::Sender<BusMessage>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(tx, cancel))
    }

    async fn run(self, tx: mpsc::Sender<BusMessage>, cancel: CancellationToken) {
        let (client, mut eventloop) =
            AsyncClient::new(mqtt_options(&self.config), CLIENT_CHANNEL_SIZE);
        let mut attempt: u32 = 0;

        info!(host = %self.config.host, port = self.config.port, "connecting to MQTT broker");
        self.set_connection(ConnectionState::Connecting);

        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match event {
                // rumqttc reports a refused CONNACK as an error, so this one
                // is always a success.
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    attempt = 0;
                    self.subscribe_all(&client);
                    self.set_connection(ConnectionState::Connected);
                    info!(host = %self.config.host, "bus connected");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = BusMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                    };
                    let delivered = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        sent = tx.send(message) => sent.is_ok(),
                    };
                    if !delivered {
                        debug!("message receiver dropped, stopping bus listener");
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!(pkid = ack.pkid, "subscription acknowledged");
                }
                Ok(_) => {}
                Err(e) => {
                    let err = CoreError::from(e);
                    warn!(error = %err, attempt, "bus connection lost");
                    self.set_connection(ConnectionState::Disconnected);

                    let delay = calculate_backoff(attempt, &self.reconnect);
                    info!(
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        attempt,
                        "waiting before bus reconnect"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }

                    attempt = attempt.saturating_add(1);
                    self.set_connection(ConnectionState::Connecting);
                }
            }
        }

        if *self.connection.borrow() == ConnectionState::Connected {
            disconnect(&client, &mut eventloop).await;
        }
        self.set_connection(ConnectionState::Disconnected);
        debug!("bus listener exiting");
    }

    fn subscribe_all(&self, client: &AsyncClient) {
        for topic in &self.subscriptions {
            match client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                Ok(()) => debug!(topic = %topic, "subscribing"),
                Err(e) => warn!(topic = %topic, error = %e, "subscribe request failed"),
            }
        }
    }

    fn set_connection(&self, next: ConnectionState) {
        self.connection.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
    }
}

/// Send DISCONNECT and poll until it is written or the grace period ends.
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.try_disconnect() {
        debug!(error = %e, "disconnect request failed");
        return;
    }

    let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;

    if flushed.is_err() {
        debug!("broker disconnect timed out");
    }
}

/// Translate bridge settings into rumqttc options.
fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options =
        MqttOptions::new(config.client_id.as_str(), config.host.as_str(), config.port);
    options.set_keep_alive(config.keepalive);
    options.set_clean_session(true);

    if let Some(user) = &config.user {
        let password = config
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_owned())
            .unwrap_or_default();
        options.set_credentials(user.as_str(), password);
    }

    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mqtt() -> MqttConfig {
        MqttConfig {
            host: "broker.local".into(),
            port: 1884,
            client_id: "bifrost-test".into(),
            keepalive: Duration::from_secs(30),
            user: None,
            password: None,
        }
    }

    #[test]
    fn options_carry_endpoint_and_keepalive() {
        let options = mqtt_options(&mqtt());

        assert_eq!(options.broker_address(), ("broker.local".to_owned(), 1884));
        assert_eq!(options.client_id(), "bifrost-test");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(options.clean_session());
        assert!(options.credentials().is_none());
    }

    #[test]
    fn credentials_require_a_user() {
        let mut config = mqtt();
        config.password = Some(secrecy::SecretString::from("hunter2".to_owned()));
        assert!(mqtt_options(&config).credentials().is_none());

        config.user = Some("bridge".into());
        assert!(mqtt_options(&config).credentials().is_some());
    }

    #[test]
    fn user_without_password_still_logs_in() {
        let mut config = mqtt();
        config.user = Some("bridge".into());
        assert!(mqtt_options(&config).credentials().is_some());
    }

    #[tokio::test]
    async fn listener_retries_until_cancelled() {
        let mut config = mqtt();
        config.host = "127.0.0.1".into();
        config.port = 1;
        let reconnect = ReconnectConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let listener = BusListener::new(config, vec!["bifrost/#".into()], reconnect);
        let state = listener.watch_connection();
        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let task = listener.spawn(tx, cancel.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!task.is_finished(), "listener gave up on an unreachable broker");

        cancel.cancel();
        task.await.unwrap();

        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }
}
