//! Live cluster membership client
//!
//! [`EtcdClient`] talks to etcd's v3 JSON gateway
//! (`/v3/cluster/member/{list,add,remove}`). Endpoints are tried in order
//! until one answers; an answer carrying an error status is final.

use async_trait::async_trait;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use ep_core::error::MembershipError;

use crate::member::Member;

/// gRPC status code for `NotFound`
const GRPC_NOT_FOUND: i32 = 5;

/// gRPC status code for `FailedPrecondition`, used by etcd for duplicate peer URLs
const GRPC_FAILED_PRECONDITION: i32 = 9;

/// Member as reported by the running cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveMember {
    /// Cluster assigned member ID
    #[serde(rename = "ID", deserialize_with = "u64_from_string_or_number")]
    pub id: u64,
    /// Member name, empty until the member has started
    #[serde(default)]
    pub name: String,
    /// Peer URLs
    #[serde(rename = "peerURLs", default)]
    pub peer_urls: Vec<String>,
}

/// Membership operations against the running cluster
#[async_trait]
pub trait MembershipClient: Send + Sync {
    /// All current members
    async fn list_members(&self) -> Result<Vec<LiveMember>, MembershipError>;

    /// Register a member with `peer_urls`, returning its new ID
    async fn add_member(&self, peer_urls: &[String]) -> Result<u64, MembershipError>;

    /// Remove the member with `id`
    async fn remove_member(&self, id: u64) -> Result<(), MembershipError>;
}

/// Builds clients for a member over already forwarded endpoints
pub trait ClientFactory: Send + Sync {
    /// Client reaching the cluster through `endpoints`
    fn client(
        &self,
        member: &Member,
        endpoints: &[String],
    ) -> Result<Box<dyn MembershipClient>, MembershipError>;
}

/// Factory producing [`EtcdClient`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct EtcdClientFactory;

impl ClientFactory for EtcdClientFactory {
    fn client(
        &self,
        member: &Member,
        endpoints: &[String],
    ) -> Result<Box<dyn MembershipClient>, MembershipError> {
        Ok(Box::new(member.etcd_client(endpoints)?))
    }
}

/// PEM material for TLS to the client port
#[derive(Clone, Default)]
pub struct TlsMaterial {
    /// CA the server certificate is verified against
    pub ca_certificate: String,
    /// Client certificate
    pub certificate: String,
    /// Client key
    pub key: String,
}

/// etcd v3 JSON gateway client
#[derive(Debug, Clone)]
pub struct EtcdClient {
    http: reqwest::Client,
    endpoints: Vec<String>,
    timeout: Duration,
}

#[derive(Serialize)]
struct AddRequest<'a> {
    #[serde(rename = "peerURLs")]
    peer_urls: &'a [String],
}

#[derive(Serialize)]
struct RemoveRequest {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    members: Vec<LiveMember>,
}

#[derive(Deserialize)]
struct AddResponse {
    member: LiveMember,
}

#[derive(Deserialize)]
struct Empty {}

/// Error body of the gateway
#[derive(Deserialize)]
struct GatewayError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: String,
}

impl EtcdClient {
    /// Create a client for `endpoints` (`host:port` or full URLs).
    ///
    /// Bare `host:port` endpoints are reached over plain HTTP, matching the
    /// client URLs members advertise.
    pub fn new(
        endpoints: &[String],
        tls: Option<&TlsMaterial>,
        timeout: Duration,
    ) -> Result<Self, MembershipError> {
        if endpoints.is_empty() {
            return Err(MembershipError::NoEndpoints);
        }

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(timeout);

        if let Some(tls) = tls {
            let ca = reqwest::Certificate::from_pem(tls.ca_certificate.as_bytes())
                .map_err(|e| {
                    MembershipError::ClientSetup(format!("invalid CA certificate: {}", e))
                })?;
            let mut pem = tls.certificate.clone();
            if !pem.ends_with('\n') {
                pem.push('\n');
            }
            pem.push_str(&tls.key);
            let identity = reqwest::Identity::from_pem(pem.as_bytes()).map_err(|e| {
                MembershipError::ClientSetup(format!("invalid client certificate: {}", e))
            })?;
            builder = builder.add_root_certificate(ca).identity(identity);
        }

        let http = builder
            .build()
            .map_err(|e| MembershipError::ClientSetup(e.to_string()))?;

        let endpoints = endpoints
            .iter()
            .map(|endpoint| {
                let endpoint = endpoint.trim_end_matches('/');
                if endpoint.contains("://") {
                    endpoint.to_string()
                } else {
                    format!("http://{}", endpoint)
                }
            })
            .collect();

        Ok(Self {
            http,
            endpoints,
            timeout,
        })
    }

    /// Base URLs in the order they are tried
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn call<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, MembershipError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut last_error = MembershipError::NoEndpoints;

        for endpoint in &self.endpoints {
            let url = format!("{}{}", endpoint, path);
            tracing::debug!("POST {}", url);

            let response = match self.http.post(&url).json(body).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = if e.is_timeout() {
                        MembershipError::Timeout(self.timeout)
                    } else {
                        MembershipError::Request(format!("{}: {}", url, e))
                    };
                    tracing::debug!("Endpoint {} failed: {}", endpoint, last_error);
                    continue;
                }
            };

            let status = response.status();
            let text = response.text().await.map_err(|e| {
                if e.is_timeout() {
                    MembershipError::Timeout(self.timeout)
                } else {
                    MembershipError::Request(e.to_string())
                }
            })?;

            if !status.is_success() {
                return Err(match serde_json::from_str::<GatewayError>(&text) {
                    Ok(err) => MembershipError::Rejected {
                        code: err.code,
                        message: if err.message.is_empty() { err.error } else { err.message },
                    },
                    Err(_) => MembershipError::Rejected {
                        code: -1,
                        message: format!("HTTP {}: {}", status, text.trim()),
                    },
                });
            }

            return serde_json::from_str(&text)
                .map_err(|e| MembershipError::InvalidResponse(format!("{}: {}", path, e)));
        }

        Err(last_error)
    }
}

#[async_trait]
impl MembershipClient for EtcdClient {
    async fn list_members(&self) -> Result<Vec<LiveMember>, MembershipError> {
        let response: ListResponse = self
            .call("/v3/cluster/member/list", &serde_json::json!({}))
            .await?;
        Ok(response.members)
    }

    async fn add_member(&self, peer_urls: &[String]) -> Result<u64, MembershipError> {
        let result: Result<AddResponse, _> = self
            .call("/v3/cluster/member/add", &AddRequest { peer_urls })
            .await;

        match result {
            Ok(response) => Ok(response.member.id),
            Err(MembershipError::Rejected { code, message })
                if code == GRPC_FAILED_PRECONDITION =>
            {
                tracing::debug!("Add rejected as duplicate: {}", message);
                Err(MembershipError::AlreadyExists(peer_urls.join(",")))
            }
            Err(e) => Err(e),
        }
    }

    async fn remove_member(&self, id: u64) -> Result<(), MembershipError> {
        let result: Result<Empty, _> = self
            .call(
                "/v3/cluster/member/remove",
                &RemoveRequest { id: id.to_string() },
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(MembershipError::Rejected { code, .. }) if code == GRPC_NOT_FOUND => {
                Err(MembershipError::NotFound(id))
            }
            Err(e) => Err(e),
        }
    }
}

/// The gateway encodes uint64 as a JSON string; accept numbers too
fn u64_from_string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(de::Error::custom),
    }
}
