//! Transport configuration
//!
//! A [`Host`] carries exactly one transport: `direct: {}` when the daemon is
//! local, or `ssh: {...}` when it has to be reached through a tunnel.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use ep_core::config::duration;
use ep_core::error::ConfigError;
use russh_keys::key::KeyPair;

/// Defaults applied to SSH settings left empty in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SshDefaults {
    /// SSH port
    pub port: u16,
    /// Timeout of a single dial attempt
    pub connection_timeout: String,
    /// How long to keep retrying failed dials
    pub retry_timeout: String,
    /// Pause between dial attempts
    pub retry_interval: String,
}

impl Default for SshDefaults {
    fn default() -> Self {
        Self {
            port: 22,
            connection_timeout: "30s".to_string(),
            retry_timeout: "60s".to_string(),
            retry_interval: "1s".to_string(),
        }
    }
}

/// Transport for a daemon on the local machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectConfig {}

/// Transport tunneled through an SSH session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SshConfig {
    /// Host name or IP of the SSH server
    pub address: String,

    /// SSH port, `0` means unset
    pub port: u16,

    /// Login user
    pub user: String,

    /// Password authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// PEM/OpenSSH encoded private key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    /// Timeout of a single dial attempt, e.g. `"30s"`; `"0"` waits without a deadline
    pub connection_timeout: String,

    /// How long to keep retrying failed dials
    pub retry_timeout: String,

    /// Pause between dial attempts
    pub retry_interval: String,

    /// Expected server host key fingerprint, with or without the `SHA256:` prefix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_key_fingerprint: Option<String>,

    /// Accept any server host key
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub insecure_ignore_host_key: bool,
}

/// How the server host key is checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Key must match this fingerprint
    Fingerprint(String),
    /// Any key is accepted
    Insecure,
}

impl HostKeyPolicy {
    /// Whether a server key with `fingerprint` is acceptable
    pub fn accepts(&self, fingerprint: &str) -> bool {
        match self {
            HostKeyPolicy::Insecure => true,
            HostKeyPolicy::Fingerprint(expected) => {
                let normalize = |f: &str| f.trim().trim_start_matches("SHA256:").to_string();
                normalize(expected) == normalize(fingerprint)
            }
        }
    }
}

/// Validated, typed SSH settings used by the connector
#[derive(Clone)]
pub struct SshSettings {
    /// Server host
    pub address: String,
    /// Server port
    pub port: u16,
    /// Login user
    pub user: String,
    /// Password, if configured
    pub password: Option<String>,
    /// Decoded private key, if configured
    pub private_key: Option<Arc<KeyPair>>,
    /// Timeout of a single dial attempt, zero for none
    pub connection_timeout: Duration,
    /// How long to keep retrying failed dials
    pub retry_timeout: Duration,
    /// Pause between dial attempts
    pub retry_interval: Duration,
    /// Host key verification policy
    pub host_key: HostKeyPolicy,
}

impl SshSettings {
    /// `host:port` of the server
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl std::fmt::Debug for SshSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSettings")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("connection_timeout", &self.connection_timeout)
            .field("retry_timeout", &self.retry_timeout)
            .field("retry_interval", &self.retry_interval)
            .field("host_key", &self.host_key)
            .finish()
    }
}

impl SshConfig {
    /// Fill every unset field from `defaults`
    pub fn with_defaults(mut self, defaults: &SshDefaults) -> Self {
        if self.port == 0 {
            self.port = defaults.port;
        }
        if self.connection_timeout.is_empty() {
            self.connection_timeout = defaults.connection_timeout.clone();
        }
        if self.retry_timeout.is_empty() {
            self.retry_timeout = defaults.retry_timeout.clone();
        }
        if self.retry_interval.is_empty() {
            self.retry_interval = defaults.retry_interval.clone();
        }
        self
    }

    /// Overlay this configuration on top of `base`; fields set here win
    pub fn merged_over(&self, base: &SshConfig) -> SshConfig {
        fn pick(own: &str, base: &str) -> String {
            let value = if own.is_empty() { base } else { own };
            value.to_string()
        }

        SshConfig {
            address: pick(&self.address, &base.address),
            port: if self.port != 0 { self.port } else { base.port },
            user: pick(&self.user, &base.user),
            password: self.password.clone().or_else(|| base.password.clone()),
            private_key: self.private_key.clone().or_else(|| base.private_key.clone()),
            connection_timeout: pick(&self.connection_timeout, &base.connection_timeout),
            retry_timeout: pick(&self.retry_timeout, &base.retry_timeout),
            retry_interval: pick(&self.retry_interval, &base.retry_interval),
            host_key_fingerprint: self
                .host_key_fingerprint
                .clone()
                .or_else(|| base.host_key_fingerprint.clone()),
            insecure_ignore_host_key: self.insecure_ignore_host_key
                || base.insecure_ignore_host_key,
        }
    }

    /// Check the configuration without connecting
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings().map(|_| ())
    }

    /// Validate and convert into typed settings
    pub fn settings(&self) -> Result<SshSettings, ConfigError> {
        if self.address.is_empty() {
            return Err(ConfigError::MissingField("ssh.address".into()));
        }
        if self.user.is_empty() {
            return Err(ConfigError::MissingField("ssh.user".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("ssh.port must be set".into()));
        }

        let connection_timeout =
            duration::parse_field("ssh.connectionTimeout", &self.connection_timeout)?;
        let retry_timeout = duration::parse_field("ssh.retryTimeout", &self.retry_timeout)?;
        let retry_interval = duration::parse_field("ssh.retryInterval", &self.retry_interval)?;

        if self.password.is_none() && self.private_key.is_none() {
            return Err(ConfigError::NoAuthMethod);
        }

        let private_key = match &self.private_key {
            Some(pem) => Some(Arc::new(
                russh_keys::decode_secret_key(pem, None)
                    .map_err(|e| ConfigError::InvalidPrivateKey(e.to_string()))?,
            )),
            None => None,
        };

        let host_key = match (&self.host_key_fingerprint, self.insecure_ignore_host_key) {
            (_, true) => HostKeyPolicy::Insecure,
            (Some(fingerprint), false) if !fingerprint.trim().is_empty() => {
                HostKeyPolicy::Fingerprint(fingerprint.clone())
            }
            _ => return Err(ConfigError::HostKeyPolicy),
        };

        Ok(SshSettings {
            address: self.address.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            private_key,
            connection_timeout,
            retry_timeout,
            retry_interval,
            host_key,
        })
    }
}

/// A machine running one or more containers, and how to reach it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Local daemon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct: Option<DirectConfig>,

    /// Daemon behind SSH
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfig>,
}

impl Host {
    /// Host reached directly
    pub fn direct() -> Self {
        Self {
            direct: Some(DirectConfig::default()),
            ssh: None,
        }
    }

    /// Host reached over SSH
    pub fn ssh(config: SshConfig) -> Self {
        Self {
            direct: None,
            ssh: Some(config),
        }
    }

    /// Check that exactly one valid transport is configured
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.direct, &self.ssh) {
            (None, None) => Err(ConfigError::NoTransport),
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousTransport),
            (Some(_), None) => Ok(()),
            (None, Some(ssh)) => ssh.validate(),
        }
    }

    /// Short description for log lines
    pub fn describe(&self) -> String {
        match (&self.direct, &self.ssh) {
            (_, Some(ssh)) => format!("ssh://{}@{}:{}", ssh.user, ssh.address, ssh.port),
            (Some(_), None) => "direct".to_string(),
            (None, None) => "unconfigured".to_string(),
        }
    }
}
