//! Direct transport
//!
//! Used when etcd-pilot runs on the same host as the target daemon. Nothing
//! is proxied; addresses are returned as given.

use async_trait::async_trait;

use ep_core::error::{ConnectionError, ForwardError};

use crate::address::split_host_port;
use crate::{Connection, Transport};

/// Pass-through transport
#[derive(Debug, Clone, Copy, Default)]
pub struct Direct;

impl Direct {
    /// Create a new direct transport
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for Direct {
    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        Ok(Box::new(DirectConnection))
    }
}

/// Connection of the direct transport
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectConnection;

#[async_trait]
impl Connection for DirectConnection {
    async fn forward_unix_socket(&self, remote_path: &str) -> Result<String, ForwardError> {
        Ok(remote_path.to_string())
    }

    async fn forward_tcp(&self, remote_address: &str) -> Result<String, ForwardError> {
        split_host_port(remote_address)?;
        Ok(remote_address.to_string())
    }

    async fn close(&self) {}
}
