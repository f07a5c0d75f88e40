//! Established SSH connection and its forwards

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::Handle;
use russh::Disconnect;

use ep_core::error::{ForwardError, ProxyError};

use super::connector::ClientHandler;
use crate::endpoint::EndpointAllocator;
use crate::forward::{Dialer, Forwarder, ProxyStream, RemoteTarget};
use crate::Connection;

/// Opens `direct-tcpip` and `direct-streamlocal` channels on the session
struct SessionDialer {
    session: Arc<Handle<ClientHandler>>,
}

#[async_trait]
impl Dialer for SessionDialer {
    async fn dial(&self, target: &RemoteTarget) -> Result<Box<dyn ProxyStream>, ProxyError> {
        let channel = match target {
            RemoteTarget::Tcp { host, port } => {
                self.session
                    .channel_open_direct_tcpip(host.clone(), u32::from(*port), "127.0.0.1", 0)
                    .await
            }
            RemoteTarget::Unix { path } => {
                self.session
                    .channel_open_direct_streamlocal(path.clone())
                    .await
            }
        }
        .map_err(|e| ProxyError::Dial {
            remote: target.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Box::new(channel.into_stream()))
    }
}

/// Connection to a remote host through an SSH session
pub struct SshConnection {
    /// SSH session handle, shared with the dialer
    session: Arc<Handle<ClientHandler>>,
    /// Server endpoint, for log lines
    endpoint: String,
    /// Local listeners and their proxies
    forwarder: Forwarder,
}

impl SshConnection {
    pub(crate) fn new(
        session: Handle<ClientHandler>,
        endpoint: String,
        allocator: Arc<dyn EndpointAllocator>,
        socket_dir: PathBuf,
    ) -> Self {
        let session = Arc::new(session);
        let dialer = Arc::new(SessionDialer {
            session: Arc::clone(&session),
        });

        Self {
            session,
            endpoint,
            forwarder: Forwarder::new(dialer, allocator, socket_dir),
        }
    }
}

#[async_trait]
impl Connection for SshConnection {
    async fn forward_unix_socket(&self, remote_path: &str) -> Result<String, ForwardError> {
        self.forwarder.forward_unix_socket(remote_path).await
    }

    async fn forward_tcp(&self, remote_address: &str) -> Result<String, ForwardError> {
        self.forwarder.forward_tcp(remote_address).await
    }

    async fn close(&self) {
        if self.forwarder.is_closed() {
            return;
        }
        self.forwarder.close().await;

        if let Err(e) = self
            .session
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await
        {
            tracing::debug!("Disconnect from {} failed: {}", self.endpoint, e);
        }
        tracing::info!("Closed connection to {}", self.endpoint);
    }
}
