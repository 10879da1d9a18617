//! Hot reload of the `[routing]` section.
//!
//! Only routing settings are applied live. Changes to any other section are
//! loaded and validated but need a restart to take effect.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{BridgeConfig, RoutingSettings};

/// Watches the configuration file and publishes routing changes.
pub struct ConfigWatcher {
    path: PathBuf,
    last: RoutingSettings,
    update_tx: mpsc::UnboundedSender<RoutingSettings>,
}

impl ConfigWatcher {
    /// `current` is the configuration the process started with.
    pub fn new(path: &Path, current: &BridgeConfig) -> (Self, mpsc::UnboundedReceiver<RoutingSettings>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                last: current.routing.clone(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            mut last,
            update_tx,
        } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    if let Some(routing) = reload(&watched, &mut last) {
                        let _ = update_tx.send(routing);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

/// Re-read `path` and return the routing settings if they differ from `last`.
///
/// An invalid file keeps the current settings.
fn reload(path: &Path, last: &mut RoutingSettings) -> Option<RoutingSettings> {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = ?path, error = %e, "Failed to reload config, keeping current routing");
            return None;
        }
    };

    if config.routing == *last {
        tracing::debug!(path = ?path, "Config changed outside [routing], restart to apply");
        return None;
    }

    tracing::info!(
        path = ?path,
        from = %last.mode,
        to = %config.routing.mode,
        percentage = config.routing.percentage,
        "Routing change detected"
    );
    *last = config.routing.clone();
    Some(config.routing)
}
