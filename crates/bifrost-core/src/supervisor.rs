// ── Bridge supervisor ──
//
// Wires the bus listener to the router and the device registry, then
// tears everything down in order: stop consuming the bus, let controllers
// drain what they already accepted, abort whatever overruns the deadline.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::handle::HandleOptions;
use crate::listener::{BusListener, BusMessage};
use crate::registry::DeviceRegistry;
use crate::router::{DispatchOutcome, Router, dispatch};

/// Messages buffered between the bus task and the dispatch loop.
const BUS_CHANNEL_SIZE: usize = 256;

/// The running bridge: one bus listener feeding one dispatch loop.
#[derive(Debug)]
pub struct Bridge {
    config: BridgeConfig,
    router: Router,
    registry: Arc<DeviceRegistry>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        let router = Router::from_config(&config);
        let registry = Arc::new(DeviceRegistry::new(
            config.controllers.clone(),
            HandleOptions::from_config(&config),
        ));
        Self {
            config,
            router,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Connect to the bus and serve until `shutdown` fires.
    ///
    /// Broker trouble is retried inside the listener, so `Ok` means a
    /// requested shutdown. If the bus task ends on its own the bridge still
    /// shuts down cleanly but reports an error.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), CoreError> {
        let listener = BusListener::new(
            self.config.mqtt.clone(),
            self.router.subscriptions(),
            self.config.reconnect.clone(),
        );
        let (tx, rx) = mpsc::channel(BUS_CHANNEL_SIZE);
        let bus_cancel = shutdown.child_token();
        let bus = listener.spawn(tx, bus_cancel.clone());

        info!(
            controllers = self.config.controllers.len(),
            switches = self.config.switches.len(),
            "bridge running"
        );

        self.serve(rx, &shutdown).await;
        let requested = shutdown.is_cancelled();

        info!("shutting down bridge");
        bus_cancel.cancel();
        let bus_result = bus.await;

        self.registry.shutdown(self.config.shutdown_timeout).await;
        info!("bridge stopped");

        bus_result.map_err(|e| CoreError::Internal(format!("bus task failed: {e}")))?;
        if requested {
            Ok(())
        } else {
            Err(CoreError::Bus {
                reason: "listener stopped without a shutdown request".into(),
            })
        }
    }

    /// Dispatch every message from `rx` until `cancel` fires or the
    /// channel closes. One bad message never stops the loop.
    pub async fn serve(&self, mut rx: mpsc::Receiver<BusMessage>, cancel: &CancellationToken) {
        let mut tally = Tally::default();
        loop {
            let message = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => {
                        warn!("bus listener stopped");
                        break;
                    }
                },
            };

            let outcome = dispatch(&self.router, &self.registry, &message.topic, &message.payload);
            tally.record(&outcome);
        }

        debug!(
            applied = tally.applied,
            dropped = tally.dropped,
            rejected = tally.rejected,
            "dispatch loop finished"
        );
    }
}

/// Message counts for the exit log line.
#[derive(Debug, Default)]
struct Tally {
    applied: u64,
    dropped: u64,
    rejected: u64,
}

impl Tally {
    fn record(&mut self, outcome: &DispatchOutcome) {
        let slot = match outcome {
            DispatchOutcome::Applied { .. } | DispatchOutcome::Deferred { .. } => &mut self.applied,
            DispatchOutcome::Dropped { .. } => &mut self.dropped,
            DispatchOutcome::Rejected(_) => &mut self.rejected,
        };
        *slot += 1;
    }
}
