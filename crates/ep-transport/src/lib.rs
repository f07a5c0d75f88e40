//! ep-transport: Reaching container daemons and etcd members on remote hosts
//!
//! A [`Transport`] produces a [`Connection`], and a connection turns a remote
//! endpoint into one that can be dialed locally. The direct transport hands
//! addresses back untouched; the SSH transport opens a local listener per
//! forward and proxies every accepted connection through the SSH session.

pub mod address;
pub mod config;
pub mod direct;
pub mod endpoint;
pub mod forward;
pub mod ssh;

use async_trait::async_trait;

use ep_core::error::{ConfigError, ConnectionError, ForwardError};

pub use config::{DirectConfig, Host, SshConfig, SshDefaults};
pub use direct::Direct;
pub use endpoint::{EndpointAllocator, SequentialAllocator, UuidAllocator};
pub use ssh::SshTransport;

/// Something that can be connected to produce a [`Connection`]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection, retrying as the transport sees fit
    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// An established connection able to forward remote endpoints
#[async_trait]
pub trait Connection: Send + Sync {
    /// Make the remote `unix://` socket reachable locally.
    ///
    /// Returns a `unix://` address of the local end.
    async fn forward_unix_socket(&self, remote_path: &str) -> Result<String, ForwardError>;

    /// Make the remote `host:port` reachable locally.
    ///
    /// Returns a `host:port` address of the local end.
    async fn forward_tcp(&self, remote_address: &str) -> Result<String, ForwardError>;

    /// Stop all forwards and wait until their tasks have exited
    async fn close(&self);
}

/// Validate the host and build its transport
pub fn new_transport(host: &Host) -> Result<Box<dyn Transport>, ConfigError> {
    host.validate()?;

    match (&host.direct, &host.ssh) {
        (Some(_), None) => Ok(Box::new(Direct::new())),
        (None, Some(ssh)) => Ok(Box::new(SshTransport::new(ssh)?)),
        (None, None) => Err(ConfigError::NoTransport),
        (Some(_), Some(_)) => Err(ConfigError::AmbiguousTransport),
    }
}
