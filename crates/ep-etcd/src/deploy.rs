//! Hand-off to the container engine
//!
//! etcd-pilot decides *what* should run; a [`ContainerDeployer`] makes the
//! hosts match. The engine itself lives outside this workspace.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use ep_core::error::EpError;
use ep_core::types::ContainerSpec;
use ep_transport::Host;

/// A container together with the host it runs on and the files it needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfiguredContainer {
    /// Where the container runs
    pub host: Host,
    /// Files written on the host before start, path -> content
    #[serde(default)]
    pub config_files: BTreeMap<String, String>,
    /// The container itself
    pub container: ContainerSpec,
}

/// Containers by member name
pub type ContainersState = BTreeMap<String, HostConfiguredContainer>;

/// Container engine collaborator
#[async_trait]
pub trait ContainerDeployer: Send + Sync {
    /// Converge hosts from `previous` to `desired`, returning what now runs
    async fn deploy(
        &self,
        previous: &ContainersState,
        desired: &ContainersState,
    ) -> anyhow::Result<ContainersState>;
}

/// Outcome of one reconciliation pass
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// State the container engine should converge to
    pub desired: ContainersState,
    /// Members added to the live cluster in this pass
    pub joined: Vec<String>,
    /// Members removed from the live cluster in this pass
    pub removed: Vec<String>,
    /// Members whose pass failed, with the failure
    pub failures: Vec<(String, EpError)>,
}

impl ReconcileReport {
    /// Whether every member pass succeeded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// One line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "{} desired, {} joined, {} removed, {} failed",
            self.desired.len(),
            self.joined.len(),
            self.removed.len(),
            self.failures.len()
        )
    }
}
