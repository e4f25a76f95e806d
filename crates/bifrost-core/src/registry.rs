// ── Device registry ──
//
// Owns every `ControllerHandle`, keyed by logical name. Handles are created
// lazily on first use. `DashMap::entry` is the single insertion point: the
// shard lock it holds makes insert-if-absent atomic, so concurrent first
// use of a name creates and connects exactly one handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::CoreError;
use crate::handle::{ControllerHandle, HandleOptions};
use crate::model::Action;

/// The set of live controller handles plus the configuration they are
/// built from.
pub struct DeviceRegistry {
    configs: HashMap<String, ControllerConfig>,
    handles: DashMap<String, Arc<ControllerHandle>>,
    options: HandleOptions,
    cancel: CancellationToken,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("configured", &self.configs.len())
            .field("active", &self.handles.len())
            .finish_non_exhaustive()
    }
}

impl DeviceRegistry {
    /// Build a registry over `controllers`. Names are expected to be unique;
    /// if they are not, the last entry wins.
    pub fn new(controllers: Vec<ControllerConfig>, options: HandleOptions) -> Self {
        let configs = controllers
            .into_iter()
            .map(|config| (config.name.clone(), config))
            .collect();

        Self {
            configs,
            handles: DashMap::new(),
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Return the handle for `name`, creating and connecting it on first use.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<ControllerHandle>, CoreError> {
        self.get_or_create_with(name, None).map(|(handle, _)| handle)
    }

    /// Like [`get_or_create()`](Self::get_or_create), but a handle created
    /// by this call applies `initial` once its first session opens.
    ///
    /// The flag is `true` when this call created the handle; `initial` is
    /// ignored otherwise.
    pub fn get_or_create_with(
        &self,
        name: &str,
        initial: Option<Action>,
    ) -> Result<(Arc<ControllerHandle>, bool), CoreError> {
        if let Some(handle) = self.handles.get(name) {
            return Ok((Arc::clone(handle.value()), false));
        }

        if self.cancel.is_cancelled() {
            return Err(CoreError::ShuttingDown);
        }

        let config = self
            .configs
            .get(name)
            .ok_or_else(|| CoreError::UnknownDevice { name: name.into() })?;

        let mut created = false;
        let entry = self.handles.entry(name.to_owned()).or_insert_with(|| {
            let handle = Arc::new(ControllerHandle::new(
                config.clone(),
                self.options.clone(),
                self.cancel.child_token(),
            ));
            handle.connect_with(initial);
            info!(controller = name, address = %config.address, "controller handle created");
            created = true;
            handle
        });

        Ok((Arc::clone(entry.value()), created))
    }

    /// Look up an existing handle without creating one.
    pub fn get(&self, name: &str) -> Option<Arc<ControllerHandle>> {
        self.handles.get(name).map(|h| Arc::clone(h.value()))
    }

    /// Number of handles created so far.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every controller task.
    ///
    /// Each task applies commands it already accepted, then closes its
    /// connection. Tasks still running after `timeout` are aborted. No new
    /// handles are created once this has been called.
    pub async fn shutdown(&self, timeout: Duration) {
        self.cancel.cancel();

        let tasks: Vec<_> = self
            .handles
            .iter()
            .filter_map(|entry| entry.value().take_task())
            .collect();
        if tasks.is_empty() {
            return;
        }

        let aborts: Vec<_> = tasks.iter().map(tokio::task::JoinHandle::abort_handle).collect();
        debug!(controllers = tasks.len(), "waiting for controller tasks");

        match tokio::time::timeout(timeout, join_all(tasks)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = %e, "controller task failed");
                    }
                }
                info!("all controller connections closed");
            }
            Err(_) => {
                warn!(
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "controllers did not stop in time, aborting"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}
