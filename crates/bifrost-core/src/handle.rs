// ── Controller handle ──
//
// One background task per controller owns the WebSocket session and is the
// only writer of both the connection state and the controller state.
// Callers talk to it through a bounded channel and observe it through
// `watch` receivers, so nothing on the caller side ever blocks on the
// network.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bifrost_api::backoff::calculate_backoff;
use bifrost_api::pixelblaze::{DEFAULT_QUERY_TIMEOUT, Frame};
use bifrost_api::{PixelblazeClient, ReconnectConfig};

use crate::config::{BridgeConfig, ControllerConfig};
use crate::error::CoreError;
use crate::model::{Action, ConnectionState, ControllerState};

/// Commands buffered between a caller and the controller task. Anything
/// beyond this is dropped; a newer command will follow.
const ACTION_CHANNEL_SIZE: usize = 32;

// ── HandleOptions ────────────────────────────────────────────────────

/// Tuning shared by every handle in a registry.
#[derive(Debug, Clone)]
pub struct HandleOptions {
    pub reconnect: ReconnectConfig,
    pub query_timeout: Duration,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

impl HandleOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            reconnect: config.reconnect.clone(),
            query_timeout: config.query_timeout,
        }
    }
}

// ── ControllerHandle ─────────────────────────────────────────────────

/// Caller-side view of one controller.
///
/// Created by the [`DeviceRegistry`](crate::DeviceRegistry); shared as
/// `Arc<ControllerHandle>`. [`connect()`](Self::connect) spawns the task,
/// [`apply()`](Self::apply) hands it work, [`state()`](Self::state) reads
/// the last known state.
pub struct ControllerHandle {
    config: Arc<ControllerConfig>,
    options: HandleOptions,
    action_tx: mpsc::Sender<Action>,
    action_rx: Mutex<Option<mpsc::Receiver<Action>>>,
    connection: watch::Sender<ConnectionState>,
    state: watch::Sender<ControllerState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("name", &self.config.name)
            .field("address", &self.config.address.as_str())
            .field("connection", &*self.connection.borrow())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ControllerHandle {
    /// Create a handle. Does NOT connect -- call [`connect()`](Self::connect).
    ///
    /// `cancel` is normally a child of the registry's token so shutdown
    /// reaches every controller at once.
    pub fn new(
        config: ControllerConfig,
        options: HandleOptions,
        cancel: CancellationToken,
    ) -> Self {
        let (action_tx, action_rx) = mpsc::channel(ACTION_CHANNEL_SIZE);
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let (state, _) = watch::channel(ControllerState::initial(config.default_brightness));

        Self {
            config: Arc::new(config),
            options,
            action_tx,
            action_rx: Mutex::new(Some(action_rx)),
            connection,
            state,
            cancel,
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the background task that connects, serves commands and
    /// reconnects. Returns immediately; the first attempt runs in the task.
    ///
    /// Returns `false` if the task was already started.
    pub fn connect(&self) -> bool {
        self.connect_with(None)
    }

    /// Like [`connect()`](Self::connect), but `initial` is applied as soon
    /// as the first session opens. Used for the command that caused the
    /// handle to be created. It is dropped if that first attempt fails.
    pub(crate) fn connect_with(&self, initial: Option<Action>) -> bool {
        let Some(action_rx) = self
            .action_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };

        let worker = Worker {
            config: Arc::clone(&self.config),
            options: self.options.clone(),
            initial,
            action_rx,
            connection: self.connection.clone(),
            state: self.state.clone(),
            cancel: self.cancel.clone(),
        };

        let task = tokio::spawn(worker.run());
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        true
    }

    /// Signal the task to drain pending commands, close the session and exit.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Take the task's join handle, if the task was started and not yet taken.
    pub(crate) fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Wait for the background task to finish.
    pub async fn join(&self) {
        let task = self.take_task();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(controller = %self.config.name, error = %e, "controller task failed");
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Hand an action to the controller task.
    ///
    /// Returns `true` if the action was accepted. When the controller is
    /// not connected, or its queue is full, the action is dropped with a
    /// warning; it is never queued for later.
    pub fn apply(&self, action: Action) -> bool {
        let connection = *self.connection.borrow();
        if connection != ConnectionState::Connected {
            warn!(
                controller = %self.config.name,
                ?action,
                %connection,
                "controller not connected, dropping command"
            );
            return false;
        }

        match self.action_tx.try_send(action) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(action)) => {
                warn!(
                    controller = %self.config.name,
                    ?action,
                    "command queue full, dropping command"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(action)) => {
                warn!(
                    controller = %self.config.name,
                    ?action,
                    "controller task stopped, dropping command"
                );
                false
            }
        }
    }

    // ── State observation ────────────────────────────────────────────

    /// Last known controller state. Never blocks.
    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Subscribe to controller state changes.
    pub fn watch_state(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }
}

// ── Background task ──────────────────────────────────────────────────

/// Why a live session ended.
enum SessionEnd {
    Cancelled,
    Lost(CoreError),
}

/// One event observed while a session is live.
enum SessionEvent {
    Cancelled,
    Action(Action),
    Frame(Result<Frame, bifrost_api::Error>),
}

/// State owned by the controller task.
struct Worker {
    config: Arc<ControllerConfig>,
    options: HandleOptions,
    initial: Option<Action>,
    action_rx: mpsc::Receiver<Action>,
    connection: watch::Sender<ConnectionState>,
    state: watch::Sender<ControllerState>,
    cancel: CancellationToken,
}

impl Worker {
    /// Main loop: connect → serve → on loss, backoff → reconnect.
    async fn run(mut self) {
        let config = Arc::clone(&self.config);
        let name = config.name.as_str();
        let mut attempt: u32 = 0;

        loop {
            self.set_connection(ConnectionState::Connecting);

            let opened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = self.open_session() => result,
            };

            match opened {
                Ok(client) => {
                    attempt = 0;
                    // Anything that slipped in while we were down is stale.
                    self.discard_pending();
                    self.set_connection(ConnectionState::Connected);
                    info!(
                        controller = name,
                        address = %self.config.address,
                        "controller connected"
                    );

                    match self.serve(client).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Lost(e) => {
                            warn!(controller = name, error = %e, "controller connection lost");
                        }
                    }
                }
                Err(e) => {
                    warn!(controller = name, error = %e, attempt, "controller connect failed");
                    if let Some(action) = self.initial.take() {
                        warn!(
                            controller = name,
                            ?action,
                            "controller not connected, dropping command"
                        );
                    }
                }
            }

            self.set_connection(ConnectionState::Disconnected);
            self.discard_pending();

            let delay = calculate_backoff(attempt, &self.options.reconnect);
            info!(
                controller = name,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt,
                "waiting before reconnect"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            attempt = attempt.saturating_add(1);
        }

        self.set_connection(ConnectionState::Disconnected);
        debug!(controller = name, "controller task exiting");
    }

    /// Connect and resynchronize state from the controller.
    async fn open_session(&self) -> Result<PixelblazeClient, CoreError> {
        let mut client = PixelblazeClient::connect(&self.config.address)
            .await?
            .with_query_timeout(self.options.query_timeout);

        let device = client.get_state().await?;
        self.resync(device.brightness);
        Ok(client)
    }

    /// Serve commands and watch the socket until the session ends.
    async fn serve(&mut self, mut client: PixelblazeClient) -> SessionEnd {
        if let Some(action) = self.initial.take() {
            if let Err(e) = self.apply(&mut client, action).await {
                if e.is_connection_lost() {
                    return SessionEnd::Lost(CoreError::from(e));
                }
                warn!(controller = %self.config.name, error = %e, ?action, "command rejected");
            }
        }

        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => SessionEvent::Cancelled,
                action = self.action_rx.recv() => match action {
                    Some(action) => SessionEvent::Action(action),
                    None => SessionEvent::Cancelled,
                },
                frame = client.next_frame() => SessionEvent::Frame(frame),
            };

            match event {
                SessionEvent::Cancelled => {
                    self.finish(client).await;
                    return SessionEnd::Cancelled;
                }
                SessionEvent::Action(action) => {
                    if let Err(e) = self.apply(&mut client, action).await {
                        if e.is_connection_lost() {
                            return SessionEnd::Lost(CoreError::from(e));
                        }
                        warn!(
                            controller = %self.config.name,
                            error = %e,
                            ?action,
                            "command rejected"
                        );
                    }
                }
                SessionEvent::Frame(Ok(Frame::Config(device))) => {
                    debug!(
                        controller = %self.config.name,
                        brightness = device.brightness,
                        "controller pushed config"
                    );
                    self.resync(device.brightness);
                }
                SessionEvent::Frame(Ok(Frame::Other)) => {}
                SessionEvent::Frame(Err(e)) => return SessionEnd::Lost(CoreError::from(e)),
            }
        }
    }

    /// Send one action to the controller. State changes only once the
    /// write went out.
    async fn apply(
        &self,
        client: &mut PixelblazeClient,
        action: Action,
    ) -> Result<(), bifrost_api::Error> {
        let current = *self.state.borrow();
        let next = current.apply(action, self.config.default_brightness);

        match action {
            Action::TurnOnOrCycle if current.is_lit() => client.next_pattern().await?,
            Action::TurnOn | Action::TurnOnOrCycle | Action::TurnOff => {
                client.set_power(next.on, next.brightness).await?;
            }
            Action::BrightnessUp(_) | Action::BrightnessDown(_) => {
                if next.on {
                    client.set_brightness(next.brightness).await?;
                }
            }
        }

        debug!(
            controller = %self.config.name,
            ?action,
            on = next.on,
            brightness = next.brightness,
            "command applied"
        );
        self.state.send_replace(next);
        Ok(())
    }

    /// Shutdown path: apply what is already queued, then close the socket.
    async fn finish(&mut self, mut client: PixelblazeClient) {
        self.action_rx.close();
        while let Ok(action) = self.action_rx.try_recv() {
            if let Err(e) = self.apply(&mut client, action).await {
                warn!(controller = %self.config.name, error = %e, "command failed during shutdown");
                break;
            }
        }
        client.close().await;
        info!(controller = %self.config.name, "controller connection closed");
    }

    fn discard_pending(&mut self) {
        while let Ok(action) = self.action_rx.try_recv() {
            warn!(
                controller = %self.config.name,
                ?action,
                "controller not connected, dropping command"
            );
        }
    }

    fn resync(&self, device_brightness: f64) {
        self.state
            .send_modify(|state| *state = state.resync(device_brightness));
    }

    fn set_connection(&self, next: ConnectionState) {
        self.connection.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn lamp() -> ControllerConfig {
        ControllerConfig {
            name: "lamp".into(),
            address: "ws://127.0.0.1:9".parse().unwrap(),
            default_brightness: Some(0.3),
        }
    }

    #[tokio::test]
    async fn fresh_handle_is_disconnected_at_default() {
        let handle = ControllerHandle::new(
            lamp(),
            HandleOptions::default(),
            CancellationToken::new(),
        );

        assert_eq!(handle.connection_state(), ConnectionState::Disconnected);
        assert_eq!(
            handle.state(),
            ControllerState {
                on: false,
                brightness: 0.3
            }
        );
    }

    #[tokio::test]
    async fn apply_before_connect_is_dropped() {
        let handle = ControllerHandle::new(
            lamp(),
            HandleOptions::default(),
            CancellationToken::new(),
        );

        assert!(!handle.apply(Action::TurnOn));
        assert!(!handle.state().on);
    }

    #[tokio::test]
    async fn connect_only_spawns_once() {
        let cancel = CancellationToken::new();
        let handle = ControllerHandle::new(lamp(), HandleOptions::default(), cancel.clone());

        assert!(handle.connect());
        assert!(!handle.connect());

        cancel.cancel();
        handle.join().await;
        assert_eq!(handle.connection_state(), ConnectionState::Disconnected);
    }
}
