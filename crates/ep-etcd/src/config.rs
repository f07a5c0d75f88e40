//! Member and cluster configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use ep_core::error::ConfigError;
use ep_transport::{Host, SshConfig, SshDefaults};

use crate::deploy::ContainersState;

/// Image used when neither the member nor the cluster sets one
pub const DEFAULT_IMAGE: &str = "quay.io/coreos/etcd:v3.4.13";

/// Explicit defaults handed to the cluster builder
#[derive(Debug, Clone)]
pub struct ClusterDefaults {
    /// Fallback etcd image
    pub image: String,
    /// Fallback SSH port and timeouts
    pub ssh: SshDefaults,
    /// Deadline of a single membership request
    pub request_timeout: Duration,
}

impl Default for ClusterDefaults {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            ssh: SshDefaults::default(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// User supplied configuration of one member
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemberConfig {
    /// Member name, defaults to its key in the cluster
    pub name: String,

    /// etcd image
    pub image: String,

    /// Where the member container runs
    pub host: Host,

    /// Address other members reach this one on
    pub peer_address: String,

    /// PEM certificate for peer traffic
    pub peer_certificate: String,

    /// PEM key for peer traffic
    pub peer_key: String,

    /// PEM CA certificate peers are verified against
    #[serde(rename = "peerCACertificate")]
    pub peer_ca_certificate: String,

    /// PEM certificate for client traffic
    pub server_certificate: String,

    /// PEM key for client traffic
    pub server_key: String,

    /// PEM CA certificate clients are verified against
    #[serde(rename = "CACertificate", alias = "caCertificate")]
    pub ca_certificate: String,

    /// Rendered `name=peerURL,...` list, filled by the cluster
    pub initial_cluster: String,

    /// Allowed peer certificate CNs, filled by the cluster
    #[serde(rename = "peerCertAllowedCN")]
    pub peer_cert_allowed_cn: String,

    /// Bootstrap a new cluster (`true`) or join a running one (`false`).
    /// Decided by the cluster when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_cluster: Option<bool>,
}

impl MemberConfig {
    /// Whether any peer certificate material is set
    pub fn has_peer_certificates(&self) -> bool {
        !self.peer_ca_certificate.is_empty()
            || !self.peer_certificate.is_empty()
            || !self.peer_key.is_empty()
    }

    /// Check required fields and field combinations
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField("name".into()));
        }
        if self.peer_address.is_empty() {
            return Err(ConfigError::MissingField("peerAddress".into()));
        }
        if self.image.is_empty() {
            return Err(ConfigError::MissingField("image".into()));
        }

        self.host.validate()?;

        let peer_fields = [
            &self.peer_ca_certificate,
            &self.peer_certificate,
            &self.peer_key,
        ];
        if self.has_peer_certificates() && peer_fields.iter().any(|f| f.is_empty()) {
            return Err(ConfigError::IncompletePeerCertificates);
        }

        Ok(())
    }
}

/// User supplied configuration of the whole cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterConfig {
    /// etcd image for members that do not set one
    pub image: String,

    /// SSH settings shared by members without their own transport
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfig>,

    /// Deadline of a single membership request, e.g. `"5s"`
    pub request_timeout: String,

    /// Members by name
    pub members: BTreeMap<String, MemberConfig>,

    /// Containers deployed by the previous pass
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub state: ContainersState,
}
