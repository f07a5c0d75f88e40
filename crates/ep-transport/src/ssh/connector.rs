//! Outbound SSH connector
//!
//! Dials the SSH server once per retry interval until it succeeds or the
//! retry window closes. Authentication and host key rejections are final and
//! are not retried.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh_keys::key::PublicKey;

use ep_core::error::{ConfigError, ConnectionError};

use super::connection::SshConnection;
use crate::config::{HostKeyPolicy, SshConfig, SshSettings};
use crate::endpoint::{EndpointAllocator, UuidAllocator};
use crate::{Connection, Transport};

/// Transport tunneling through an SSH session
pub struct SshTransport {
    /// Validated settings
    settings: SshSettings,
    /// Names local sockets of Unix forwards
    allocator: Arc<dyn EndpointAllocator>,
    /// Directory for local sockets of Unix forwards
    socket_dir: PathBuf,
}

impl SshTransport {
    /// Validate `config` and create a transport for it
    pub fn new(config: &SshConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            settings: config.settings()?,
            allocator: Arc::new(UuidAllocator),
            socket_dir: std::env::temp_dir(),
        })
    }

    /// Use a different local endpoint allocator
    pub fn with_allocator(mut self, allocator: Arc<dyn EndpointAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Place local sockets of Unix forwards in `dir`
    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    /// Settings this transport connects with
    pub fn settings(&self) -> &SshSettings {
        &self.settings
    }

    /// Attempt a single authenticated dial
    async fn try_connect(&self) -> Result<Handle<ClientHandler>, ConnectionError> {
        let endpoint = self.settings.endpoint();
        let rejected = Arc::new(Mutex::new(None));
        let handler = ClientHandler::new(self.settings.host_key.clone(), Arc::clone(&rejected));

        tracing::debug!("Connecting to {}", endpoint);
        let connecting = client::connect(
            Arc::new(Config::default()),
            (self.settings.address.as_str(), self.settings.port),
            handler,
        );

        // A zero connection timeout waits on the dial without a deadline
        let timeout = self.settings.connection_timeout;
        let dialed = if timeout.is_zero() {
            Ok(connecting.await)
        } else {
            tokio::time::timeout(timeout, connecting).await
        };

        let mut session = match dialed {
            Err(_) => {
                return Err(ConnectionError::Ssh(format!(
                    "dialing {} timed out after {:?}",
                    endpoint, timeout
                )))
            }
            Ok(Err(e)) => {
                let fingerprint = rejected.lock().ok().and_then(|slot| slot.clone());
                return Err(match fingerprint {
                    Some(fingerprint) => ConnectionError::HostKeyVerificationFailed {
                        address: endpoint,
                        fingerprint,
                    },
                    None => {
                        ConnectionError::Ssh(format!("failed to connect to {}: {}", endpoint, e))
                    }
                });
            }
            Ok(Ok(session)) => session,
        };

        let user = self.settings.user.clone();
        tracing::debug!("Authenticating as user '{}'", user);

        let mut authenticated = false;
        if let Some(password) = &self.settings.password {
            authenticated = session
                .authenticate_password(user.clone(), password.clone())
                .await
                .map_err(|e| {
                    ConnectionError::Ssh(format!("password authentication error: {}", e))
                })?;
        }
        if !authenticated {
            if let Some(key) = &self.settings.private_key {
                authenticated = session
                    .authenticate_publickey(user.clone(), Arc::clone(key))
                    .await
                    .map_err(|e| {
                        ConnectionError::Ssh(format!("public key authentication error: {}", e))
                    })?;
            }
        }

        if !authenticated {
            return Err(ConnectionError::AuthenticationFailed(user));
        }

        Ok(session)
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        let endpoint = self.settings.endpoint();
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.try_connect().await {
                Ok(session) => {
                    tracing::info!("Connected to {} (attempt {})", endpoint, attempt);
                    return Ok(Box::new(SshConnection::new(
                        session,
                        endpoint,
                        Arc::clone(&self.allocator),
                        self.socket_dir.clone(),
                    )));
                }
                Err(e @ ConnectionError::AuthenticationFailed(_))
                | Err(e @ ConnectionError::HostKeyVerificationFailed { .. }) => {
                    tracing::error!("Giving up on {}: {}", endpoint, e);
                    return Err(e);
                }
                Err(e) => {
                    let elapsed = started.elapsed();
                    if elapsed + self.settings.retry_interval > self.settings.retry_timeout {
                        return Err(ConnectionError::Timeout {
                            address: endpoint,
                            elapsed,
                            last_error: e.to_string(),
                        });
                    }
                    tracing::warn!(
                        "Connection to {} failed: {}. Retrying in {:?}",
                        endpoint,
                        e,
                        self.settings.retry_interval
                    );
                    tokio::time::sleep(self.settings.retry_interval).await;
                }
            }
        }
    }
}

/// SSH client handler, checks the server host key
pub struct ClientHandler {
    /// Host key verification policy
    policy: HostKeyPolicy,
    /// Fingerprint of a rejected server key, read back after a failed dial
    rejected: Arc<Mutex<Option<String>>>,
}

impl ClientHandler {
    fn new(policy: HostKeyPolicy, rejected: Arc<Mutex<Option<String>>>) -> Self {
        Self { policy, rejected }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!("Server host key: {}", fingerprint);

        if self.policy == HostKeyPolicy::Insecure {
            tracing::warn!("Host key verification disabled, accepting {}", fingerprint);
            return Ok(true);
        }

        if self.policy.accepts(&fingerprint) {
            tracing::debug!("Host key verified against configured fingerprint");
            return Ok(true);
        }

        tracing::warn!(
            "Host key {} does not match the configured fingerprint",
            fingerprint
        );
        if let Ok(mut slot) = self.rejected.lock() {
            *slot = Some(fingerprint);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SshDefaults;
    use std::time::Duration;

    fn config(port: u16) -> SshConfig {
        SshConfig {
            address: "127.0.0.1".into(),
            port,
            user: "core".into(),
            password: Some("pw".into()),
            connection_timeout: "200ms".into(),
            retry_timeout: "600ms".into(),
            retry_interval: "100ms".into(),
            insecure_ignore_host_key: true,
            ..Default::default()
        }
        .with_defaults(&SshDefaults::default())
    }

    /// A port with nothing listening on it
    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_retry_timeout() {
        let port = closed_port().await;
        let transport = SshTransport::new(&config(port)).unwrap();

        let started = Instant::now();
        let result = transport.connect().await;
        let elapsed = started.elapsed();

        match result {
            Err(ConnectionError::Timeout { address, .. }) => {
                assert_eq!(address, format!("127.0.0.1:{}", port))
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("connected to a closed port"),
        }
        assert!(
            elapsed >= Duration::from_millis(400),
            "retried for {:?}",
            elapsed
        );
        assert!(
            elapsed < Duration::from_secs(5),
            "retried for {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_zero_connection_timeout_means_no_deadline() {
        let port = closed_port().await;
        let transport = SshTransport::new(&SshConfig {
            connection_timeout: "0".into(),
            retry_timeout: "0".into(),
            ..config(port)
        })
        .unwrap();
        assert!(transport.settings().connection_timeout.is_zero());

        // The dial itself fails (refused), it is not cut short by a zero deadline
        match transport.connect().await {
            Err(ConnectionError::Timeout { last_error, .. }) => {
                assert!(!last_error.contains("timed out"), "{}", last_error)
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("connected to a closed port"),
        }
    }

    #[tokio::test]
    async fn test_connect_zero_retry_timeout_tries_once() {
        let port = closed_port().await;
        let transport = SshTransport::new(&SshConfig {
            retry_timeout: "0".into(),
            ..config(port)
        })
        .unwrap();

        let started = Instant::now();
        assert!(matches!(
            transport.connect().await,
            Err(ConnectionError::Timeout { .. })
        ));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_silent_server_hits_connection_timeout() {
        // Accepts TCP but never speaks SSH
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let transport = SshTransport::new(&SshConfig {
            retry_timeout: "0".into(),
            ..config(port)
        })
        .unwrap();

        match transport.connect().await {
            Err(ConnectionError::Timeout { last_error, .. }) => {
                assert!(last_error.contains("timed out"), "{}", last_error)
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("connected to a silent server"),
        }
    }
}
