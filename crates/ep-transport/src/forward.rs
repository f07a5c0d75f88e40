//! Local listeners proxied to remote endpoints
//!
//! Each forward binds a fresh local listener and runs an accept loop. Every
//! accepted connection dials the remote endpoint through a [`Dialer`] and
//! copies bytes in both directions until either side finishes, then closes
//! the local side.
//!
//! All loops and proxies are tracked by the owning [`Forwarder`]. Closing it
//! cancels them and waits until every task has exited.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use ep_core::error::{ForwardError, ProxyError};

use crate::address::{parse_unix, split_host_port, UNIX_SCHEME};
use crate::endpoint::EndpointAllocator;

/// Byte stream on either end of a proxied pair
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ProxyStream for T {}

/// Remote endpoint of a forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteTarget {
    /// TCP endpoint as seen from the remote host
    Tcp { host: String, port: u16 },
    /// Unix socket on the remote host
    Unix { path: String },
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteTarget::Tcp { host, port } if host.contains(':') => {
                write!(f, "[{}]:{}", host, port)
            }
            RemoteTarget::Tcp { host, port } => write!(f, "{}:{}", host, port),
            RemoteTarget::Unix { path } => write!(f, "{}{}", UNIX_SCHEME, path),
        }
    }
}

/// Opens streams to remote endpoints
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Open a new stream to `target`
    async fn dial(&self, target: &RemoteTarget) -> Result<Box<dyn ProxyStream>, ProxyError>;
}

/// Bound local listener of one forward
enum LocalListener {
    Tcp(TcpListener),
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
}

impl LocalListener {
    async fn accept(&self) -> std::io::Result<Box<dyn ProxyStream>> {
        match self {
            LocalListener::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            LocalListener::Unix { listener, .. } => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
        }
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        if let LocalListener::Unix { path, .. } = self {
            if let Err(e) = std::fs::remove_file(&*path) {
                tracing::debug!("Failed to remove socket {:?}: {}", path, e);
            }
        }
    }
}

/// Runs and supervises forwards for one connection
pub struct Forwarder {
    dialer: Arc<dyn Dialer>,
    allocator: Arc<dyn EndpointAllocator>,
    socket_dir: PathBuf,
    cancel: CancellationToken,
    tasks: TaskTracker,
    /// Active forwards, local endpoint -> remote target
    forwards: Arc<DashMap<String, RemoteTarget>>,
}

impl Forwarder {
    /// Create a forwarder placing Unix sockets in `socket_dir`
    pub fn new(
        dialer: Arc<dyn Dialer>,
        allocator: Arc<dyn EndpointAllocator>,
        socket_dir: PathBuf,
    ) -> Self {
        Self {
            dialer,
            allocator,
            socket_dir,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            forwards: Arc::new(DashMap::new()),
        }
    }

    /// Forward a remote `unix://` socket to a fresh local socket
    pub async fn forward_unix_socket(&self, remote_path: &str) -> Result<String, ForwardError> {
        let path = parse_unix(remote_path)?;
        self.ensure_open()?;

        let local_path = self.allocator.socket_path(&self.socket_dir, path);
        let local = format!("{}{}", UNIX_SCHEME, local_path.display());
        let listener = UnixListener::bind(&local_path).map_err(|source| ForwardError::Bind {
            endpoint: local.clone(),
            source,
        })?;

        self.start(
            LocalListener::Unix {
                listener,
                path: local_path,
            },
            local.clone(),
            RemoteTarget::Unix {
                path: path.to_string(),
            },
        );
        Ok(local)
    }

    /// Forward a remote `host:port` to a fresh loopback port
    pub async fn forward_tcp(&self, remote_address: &str) -> Result<String, ForwardError> {
        let (host, port) = split_host_port(remote_address)?;
        self.ensure_open()?;

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|source| ForwardError::Bind {
                endpoint: "127.0.0.1:0".to_string(),
                source,
            })?;
        let local = listener
            .local_addr()
            .map_err(|source| ForwardError::Bind {
                endpoint: "127.0.0.1:0".to_string(),
                source,
            })?
            .to_string();

        self.start(
            LocalListener::Tcp(listener),
            local.clone(),
            RemoteTarget::Tcp { host, port },
        );
        Ok(local)
    }

    /// Number of forwards whose accept loop is still running
    pub fn active_forwards(&self) -> usize {
        self.forwards.len()
    }

    /// Whether [`Forwarder::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel every accept loop and proxy, then wait for them to exit
    pub async fn close(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        tracing::debug!("All forwards closed");
    }

    fn ensure_open(&self) -> Result<(), ForwardError> {
        if self.cancel.is_cancelled() {
            return Err(ForwardError::Closed);
        }
        Ok(())
    }

    fn start(&self, listener: LocalListener, local: String, target: RemoteTarget) {
        tracing::info!("Forwarding {} to {}", local, target);
        self.forwards.insert(local.clone(), target.clone());

        self.tasks.spawn(accept_loop(
            listener,
            local,
            target,
            Arc::clone(&self.dialer),
            self.cancel.clone(),
            self.tasks.clone(),
            Arc::clone(&self.forwards),
        ));
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        // Stop accept loops and proxies even if close() was never called
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: LocalListener,
    local: String,
    target: RemoteTarget,
    dialer: Arc<dyn Dialer>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    forwards: Arc<DashMap<String, RemoteTarget>>,
) {
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(stream) => stream,
                Err(source) => {
                    let err = ProxyError::Accept { endpoint: local.clone(), source };
                    tracing::error!("Stopping forward: {}", err);
                    break;
                }
            }
        };

        tracing::debug!("Accepted connection on {}", local);
        let dialer = Arc::clone(&dialer);
        let target = target.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            if let Err(e) = proxy(stream, dialer.as_ref(), &target, cancel).await {
                tracing::warn!("Proxy to {} failed: {}", target, e);
            }
        });
    }

    forwards.remove(&local);
    tracing::debug!("Stopped forwarding {} to {}", local, target);
}

/// Copy bytes between `local` and a new stream to `target`.
///
/// The pair is done as soon as one direction reaches EOF or fails.
async fn proxy(
    local: Box<dyn ProxyStream>,
    dialer: &dyn Dialer,
    target: &RemoteTarget,
    cancel: CancellationToken,
) -> Result<(), ProxyError> {
    let remote = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        remote = dialer.dial(target) => remote?,
    };

    let (mut local_read, mut local_write) = tokio::io::split(local);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        copied = tokio::io::copy(&mut local_read, &mut remote_write) => copied
            .map(|bytes| tracing::trace!("{} bytes sent to {}", bytes, target))
            .map_err(|source| ProxyError::Copy { direction: "local to remote", source }),
        copied = tokio::io::copy(&mut remote_read, &mut local_write) => copied
            .map(|bytes| tracing::trace!("{} bytes received from {}", bytes, target))
            .map_err(|source| ProxyError::Copy { direction: "remote to local", source }),
    };

    let _ = local_write.shutdown().await;
    let _ = remote_write.shutdown().await;
    outcome
}
