//! Discovery from the driver configuration file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::config::schema::DriverConfig;
use crate::config::validation::parse_endpoints;
use crate::discovery::{Discovery, DiscoveryError};

/// Re-reads the `endpoints` list of a TOML config file on every round.
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    path: PathBuf,
}

impl FileDiscovery {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Discovery for FileDiscovery {
    async fn discover(&self, token: &CancellationToken) -> Result<Vec<String>, DiscoveryError> {
        let content = tokio::select! {
            _ = token.cancelled() => return Err(DiscoveryError::Canceled),
            content = tokio::fs::read_to_string(&self.path) => content?,
        };
        let config: DriverConfig = toml::from_str(&content)?;
        parse_endpoints(&config.endpoints).map_err(DiscoveryError::InvalidEndpoints)
    }
}
