//! Core domain types
//!
//! These records are the contract with the container engine: a member is
//! rendered into a [`ContainerSpec`] and the engine makes it so.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Port published by a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMap {
    /// Host IP to bind
    pub ip: String,
    /// Transport protocol, `tcp` or `udp`
    pub protocol: String,
    /// Port number, same on host and container side
    pub port: u16,
}

impl PortMap {
    /// TCP port bound on the given IP
    pub fn tcp(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            protocol: "tcp".to_string(),
            port,
        }
    }
}

/// Bind mount from host into a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Path on the host
    pub source: String,
    /// Path inside the container
    pub target: String,
}

impl Mount {
    /// Create a new mount
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Desired container description handed to the container engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Entrypoint override
    #[serde(default)]
    pub entrypoint: Vec<String>,
    /// Arguments passed to the entrypoint
    #[serde(default)]
    pub args: Vec<String>,
    /// Published ports
    #[serde(default)]
    pub ports: Vec<PortMap>,
    /// Bind mounts
    #[serde(default)]
    pub mounts: Vec<Mount>,
}

impl ContainerSpec {
    /// Whether `flag` appears in the args, either bare or as `flag=value`
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flag_value(flag).is_some() || self.args.iter().any(|a| a == flag)
    }

    /// Value of a `--flag=value` argument
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args.iter().find_map(|arg| {
            arg.strip_prefix(flag)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }
}

impl fmt::Display for ContainerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.image)
    }
}
