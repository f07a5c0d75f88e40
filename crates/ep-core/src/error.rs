//! Core error types for etcd-pilot
//!
//! Every fallible synchronous operation reports the stage it failed in
//! through [`EpError`]. The per-stage enums carry the cause.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type, one variant per reconciliation stage
#[derive(Error, Debug)]
pub enum EpError {
    /// Configuration did not validate
    #[error("validate: {0}")]
    Validate(#[from] ConfigError),

    /// Transport could not be connected
    #[error("connect: {0}")]
    Connect(#[from] ConnectionError),

    /// Forwarding setup failed
    #[error("forward: {0}")]
    Forward(#[from] ForwardError),

    /// Live member identity could not be resolved
    #[error("resolve identity: {0}")]
    ResolveIdentity(#[source] MembershipError),

    /// Adding or removing a member failed
    #[error("membership change: {0}")]
    MembershipMutate(#[source] MembershipError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// JSON state error
    #[error("state file error: {0}")]
    State(#[from] serde_json::Error),

    /// Missing required field
    #[error("missing required field: {0}")]
    MissingField(String),

    /// Neither `direct` nor `ssh` is set on a host
    #[error("host must configure exactly one transport, none is set")]
    NoTransport,

    /// Both `direct` and `ssh` are set on a host
    #[error("host must configure exactly one transport, got both direct and ssh")]
    AmbiguousTransport,

    /// SSH has neither a password nor a private key
    #[error("ssh: at least one authentication method (password or privateKey) must be set")]
    NoAuthMethod,

    /// Private key could not be parsed
    #[error("ssh: failed to parse private key: {0}")]
    InvalidPrivateKey(String),

    /// Host key policy missing
    #[error("ssh: hostKeyFingerprint must be set unless host key verification is disabled")]
    HostKeyPolicy,

    /// Duration string could not be parsed
    #[error("field {field}: invalid duration {value:?}: {reason}")]
    InvalidDuration {
        field: String,
        value: String,
        reason: String,
    },

    /// Peer certificate material is partially set
    #[error("peerCACertificate, peerCertificate and peerKey must be set together")]
    IncompletePeerCertificates,

    /// Cluster has no members and no previous state
    #[error("cluster must define at least one member or have previous state")]
    EmptyCluster,

    /// A member failed validation
    #[error("member {name}: {source}")]
    Member {
        name: String,
        #[source]
        source: Box<ConfigError>,
    },
}

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Every dial attempt failed within the retry window
    #[error("timed out connecting to {address} after {elapsed:?}: {last_error}")]
    Timeout {
        address: String,
        elapsed: Duration,
        last_error: String,
    },

    /// Authentication failed
    #[error("authentication failed for user {0}")]
    AuthenticationFailed(String),

    /// Host key verification failed
    #[error("host key verification failed for {address}: got {fingerprint}")]
    HostKeyVerificationFailed {
        address: String,
        fingerprint: String,
    },

    /// SSH protocol error
    #[error("ssh error: {0}")]
    Ssh(String),
}

/// Errors raised while setting up a forward
#[derive(Error, Debug)]
pub enum ForwardError {
    /// Unix socket forward requested with another scheme
    #[error("address {0:?} must start with unix://")]
    InvalidScheme(String),

    /// Address could not be parsed
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Local listener could not be bound
    #[error("failed to listen on {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Connection already closed
    #[error("connection is closed")]
    Closed,
}

/// Errors returned by the live cluster
#[derive(Error, Debug)]
pub enum MembershipError {
    /// No client endpoints to talk to
    #[error("no endpoints given")]
    NoEndpoints,

    /// Client could not be constructed
    #[error("client setup failed: {0}")]
    ClientSetup(String),

    /// Request did not complete within the deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Request failed on the wire
    #[error("request failed: {0}")]
    Request(String),

    /// Member with these peer URLs is already registered
    #[error("member already exists: {0}")]
    AlreadyExists(String),

    /// Member ID is not registered
    #[error("member {0:x} not found")]
    NotFound(u64),

    /// Store rejected the request
    #[error("store returned code {code}: {message}")]
    Rejected { code: i32, message: String },

    /// Response could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors inside an established tunnel. Only reported asynchronously.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Accept failed on the local listener
    #[error("accept on {endpoint} failed: {source}")]
    Accept {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Remote endpoint could not be dialed through the tunnel
    #[error("dialing {remote} failed: {reason}")]
    Dial { remote: String, reason: String },

    /// Copying bytes between the pair failed
    #[error("copy {direction} failed: {source}")]
    Copy {
        direction: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Attach the member name to a validation error
    pub fn for_member(self, name: impl Into<String>) -> Self {
        ConfigError::Member {
            name: name.into(),
            source: Box::new(self),
        }
    }
}
