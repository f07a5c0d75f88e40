//! Container deployer that records desired state for an external engine

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use ep_core::config::save_state;
use ep_etcd::{ContainerDeployer, ContainersState};

/// Writes the desired state to a JSON file and reports it as deployed
#[derive(Debug, Clone)]
pub struct StateFileDeployer {
    path: PathBuf,
}

impl StateFileDeployer {
    /// Deployer writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// State file location
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ContainerDeployer for StateFileDeployer {
    async fn deploy(
        &self,
        previous: &ContainersState,
        desired: &ContainersState,
    ) -> anyhow::Result<ContainersState> {
        for (name, container) in desired {
            match previous.get(name) {
                None => tracing::info!(
                    "Container {} to be created on {}",
                    name,
                    container.host.describe()
                ),
                Some(old) if old != container => tracing::info!("Container {} to be updated", name),
                Some(_) => tracing::debug!("Container {} unchanged", name),
            }
        }
        for name in previous.keys().filter(|name| !desired.contains_key(*name)) {
            tracing::info!("Container {} to be removed", name);
        }

        save_state(&self.path, desired)?;
        Ok(desired.clone())
    }
}
