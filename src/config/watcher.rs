//! Configuration file watcher for endpoint reload.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::discovery::DiscoveryHandle;

/// Watches the configuration file and asks the discovery worker to refresh
/// whenever it changes. Pair with `FileDiscovery` reading the same file.
pub struct ConfigWatcher {
    path: PathBuf,
    discovery: DiscoveryHandle,
}

impl ConfigWatcher {
    pub fn new(path: &Path, discovery: DiscoveryHandle) -> Self {
        Self {
            path: path.to_path_buf(),
            discovery,
        }
    }

    /// Start watching the file in a background thread.
    ///
    /// Watching stops when the returned watcher is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let discovery = self.discovery.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Config file change detected, refreshing endpoints");
                        discovery.request_refresh();
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}
