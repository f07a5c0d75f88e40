//! Cluster state builder and membership reconciliation
//!
//! [`Cluster::new`] resolves the per-member defaults that depend on the
//! whole cluster (initial cluster list, allowed peer CNs, transports,
//! bootstrap mode). [`Cluster::reconcile`] then brings the live membership
//! in line with the configured members before containers are deployed.

use std::collections::BTreeMap;
use std::time::Duration;

use ep_core::config::duration;
use ep_core::error::{ConfigError, EpError, MembershipError};
use ep_transport::{Host, SshConfig};

use crate::client::{ClientFactory, LiveMember};
use crate::config::{ClusterConfig, ClusterDefaults, MemberConfig};
use crate::deploy::{
    ContainerDeployer, ContainersState, HostConfiguredContainer, ReconcileReport,
};
use crate::member::{was_bootstrapped, Member, PEER_PORT};

/// Resolved cluster ready for planning and reconciliation
#[derive(Debug, Clone)]
pub struct Cluster {
    members: BTreeMap<String, Member>,
    previous: ContainersState,
    request_timeout: Duration,
    initial_cluster: String,
    peer_cert_allowed_cn: String,
}

/// Result of [`Cluster::deploy`]
#[derive(Debug)]
pub struct Deployment {
    /// Membership changes made before deploying
    pub report: ReconcileReport,
    /// State reported by the container deployer
    pub state: ContainersState,
}

impl Cluster {
    /// Resolve `config` into validated members
    pub fn new(config: ClusterConfig, defaults: &ClusterDefaults) -> Result<Self, ConfigError> {
        let ClusterConfig {
            image,
            ssh,
            request_timeout,
            members,
            state: previous,
        } = config;

        if members.is_empty() && previous.is_empty() {
            return Err(ConfigError::EmptyCluster);
        }

        let request_timeout = if request_timeout.is_empty() {
            defaults.request_timeout
        } else {
            duration::parse_field("requestTimeout", &request_timeout)?
        };

        let image = if image.is_empty() {
            defaults.image.clone()
        } else {
            image
        };

        let mut resolved: BTreeMap<String, MemberConfig> = BTreeMap::new();
        for (key, mut member) in members {
            if member.name.is_empty() {
                member.name = key;
            }
            if member.image.is_empty() {
                member.image = image.clone();
            }
            member.host = resolve_host(&member, ssh.as_ref(), defaults);

            if resolved.contains_key(&member.name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate member name: {}",
                    member.name
                )));
            }
            resolved.insert(member.name.clone(), member);
        }

        let initial_cluster = resolved
            .values()
            .map(|m| format!("{}=https://{}:{}", m.name, m.peer_address, PEER_PORT))
            .collect::<Vec<_>>()
            .join(",");
        let peer_cert_allowed_cn = resolved.keys().cloned().collect::<Vec<_>>().join(",");

        let mut built = BTreeMap::new();
        for (name, mut member) in resolved {
            if member.initial_cluster.is_empty() {
                member.initial_cluster = initial_cluster.clone();
            }
            if member.peer_cert_allowed_cn.is_empty() {
                member.peer_cert_allowed_cn = peer_cert_allowed_cn.clone();
            }
            if member.new_cluster.is_none() {
                member.new_cluster = Some(bootstrap_mode(&name, &previous));
            }
            built.insert(name, Member::new(member, request_timeout)?);
        }

        Ok(Self {
            members: built,
            previous,
            request_timeout,
            initial_cluster,
            peer_cert_allowed_cn,
        })
    }

    /// Members sorted by name
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Member by name
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    /// `name=peerURL,...` over all configured members
    pub fn initial_cluster(&self) -> &str {
        &self.initial_cluster
    }

    /// Comma separated member names
    pub fn peer_cert_allowed_cn(&self) -> &str {
        &self.peer_cert_allowed_cn
    }

    /// State deployed by the previous pass
    pub fn previous_state(&self) -> &ContainersState {
        &self.previous
    }

    /// Containers the configured members render to
    pub fn desired_state(&self) -> ContainersState {
        self.members
            .iter()
            .map(|(name, member)| (name.clone(), member.to_host_configured_container()))
            .collect()
    }

    /// Client endpoints of configured members that are already deployed
    pub fn existing_endpoints(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|(name, _)| self.previous.contains_key(*name))
            .map(|(_, member)| member.client_endpoint())
            .collect()
    }

    /// Names of configured members not yet deployed
    pub fn joining(&self) -> Vec<&str> {
        self.members
            .keys()
            .filter(|name| !self.previous.contains_key(*name))
            .map(String::as_str)
            .collect()
    }

    /// Names of deployed members no longer configured
    pub fn departing(&self) -> Vec<&str> {
        self.previous
            .keys()
            .filter(|name| !self.members.contains_key(*name))
            .map(String::as_str)
            .collect()
    }

    /// Bring the live membership in line with the configured members.
    ///
    /// Departing members are removed first, through their previous host.
    /// Joining members are then added through their own host. Nothing is
    /// done when no member has been deployed yet.
    pub async fn reconcile(&self, factory: &dyn ClientFactory) -> ReconcileReport {
        let mut report = ReconcileReport {
            desired: self.desired_state(),
            ..Default::default()
        };

        if self.previous.is_empty() {
            tracing::info!(
                "No members deployed yet, bootstrapping {}",
                self.initial_cluster
            );
            return report;
        }

        let endpoints = self.existing_endpoints();

        let departing = self
            .previous
            .iter()
            .filter(|(name, _)| !self.members.contains_key(*name));
        for (name, deployed) in departing {
            match self.leave(name, deployed, &endpoints, factory).await {
                Ok(()) => report.removed.push(name.clone()),
                Err(e) => {
                    tracing::warn!("Failed to remove member {}: {}", name, e);
                    report.desired.insert(name.clone(), deployed.clone());
                    report.failures.push((name.clone(), e));
                }
            }
        }

        let joining = self
            .members
            .iter()
            .filter(|(name, _)| !self.previous.contains_key(*name));
        for (name, member) in joining {
            tracing::info!("Joining member {} via {}", name, member.host().describe());
            match member.join(&endpoints, factory).await {
                Ok(()) => report.joined.push(name.clone()),
                Err(e) => {
                    tracing::warn!("Failed to add member {}: {}", name, e);
                    report.desired.remove(name);
                    report.failures.push((name.clone(), e));
                }
            }
        }

        tracing::info!("Reconciled membership: {}", report.summary());
        report
    }

    /// Reconcile membership, then hand previous and desired state to `deployer`
    pub async fn deploy(
        &self,
        factory: &dyn ClientFactory,
        deployer: &dyn ContainerDeployer,
    ) -> anyhow::Result<Deployment> {
        let report = self.reconcile(factory).await;
        let state = deployer.deploy(&self.previous, &report.desired).await?;
        Ok(Deployment { report, state })
    }

    /// Live membership as seen through the first deployed member
    pub async fn live_members(
        &self,
        factory: &dyn ClientFactory,
    ) -> Result<Vec<LiveMember>, EpError> {
        let endpoints = self.existing_endpoints();
        let member = self
            .members
            .iter()
            .find(|(name, _)| self.previous.contains_key(*name))
            .or_else(|| self.members.iter().next())
            .map(|(_, member)| member)
            .ok_or(EpError::ResolveIdentity(MembershipError::NoEndpoints))?;

        let endpoints = if endpoints.is_empty() {
            vec![member.client_endpoint()]
        } else {
            endpoints
        };
        member.live_members(&endpoints, factory).await
    }

    async fn leave(
        &self,
        name: &str,
        deployed: &HostConfiguredContainer,
        endpoints: &[String],
        factory: &dyn ClientFactory,
    ) -> Result<(), EpError> {
        let member = Member::from_deployed(name, deployed, self.request_timeout)?;
        tracing::info!("Removing member {} via {}", name, member.host().describe());

        // The last remaining member can only be reached through itself
        let endpoints = if endpoints.is_empty() {
            vec![member.client_endpoint()]
        } else {
            endpoints.to_vec()
        };
        member.leave(&endpoints, factory).await
    }
}

/// Pick the transport a member is reached through
fn resolve_host(
    member: &MemberConfig,
    cluster_ssh: Option<&SshConfig>,
    defaults: &ClusterDefaults,
) -> Host {
    let with_address = |ssh: SshConfig| {
        let mut ssh = ssh.with_defaults(&defaults.ssh);
        if ssh.address.is_empty() {
            ssh.address = member.peer_address.clone();
        }
        ssh
    };

    match (&member.host.direct, &member.host.ssh, cluster_ssh) {
        (None, Some(own), Some(base)) => Host::ssh(with_address(own.merged_over(base))),
        (None, Some(own), None) => Host::ssh(with_address(own.clone())),
        (None, None, Some(base)) => Host::ssh(with_address(base.clone())),
        (None, None, None) => Host::direct(),
        (Some(_), _, _) => member.host.clone(),
    }
}

/// New cluster when nothing is deployed, joining when this member is not
/// deployed yet, otherwise whatever the deployed container was started with
fn bootstrap_mode(name: &str, previous: &ContainersState) -> bool {
    if previous.is_empty() {
        return true;
    }
    previous
        .get(name)
        .map(|deployed| was_bootstrapped(&deployed.container))
        .unwrap_or(false)
}
