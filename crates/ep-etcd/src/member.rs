//! etcd member: container rendering and live membership
//!
//! A [`Member`] is immutable once built. It renders its container and,
//! when asked, connects through its host's transport to add itself to or
//! remove itself from the running cluster.

use std::collections::BTreeMap;
use std::time::Duration;

use ep_core::error::{ConfigError, EpError, ForwardError, MembershipError};
use ep_core::types::{ContainerSpec, Mount, PortMap};
use ep_transport::{new_transport, Connection, Host};

use crate::client::{ClientFactory, EtcdClient, LiveMember, MembershipClient, TlsMaterial};
use crate::config::MemberConfig;
use crate::deploy::HostConfiguredContainer;

/// Port etcd serves clients on
pub const CLIENT_PORT: u16 = 2379;

/// Port etcd talks to peers on
pub const PEER_PORT: u16 = 2380;

/// Token shared by all members bootstrapping the same cluster
pub const INITIAL_CLUSTER_TOKEN: &str = "etcd-cluster-2";

const ENTRYPOINT: &str = "/usr/local/bin/etcd";
const CERT_DIR: &str = "/etc/kubernetes/pki/etcd";
const DATA_DIR: &str = "/var/lib/etcd";

const PEER_CA_FILE: &str = "peer-ca.crt";
const PEER_CERT_FILE: &str = "peer.crt";
const PEER_KEY_FILE: &str = "peer.key";
const CA_FILE: &str = "ca.crt";
const SERVER_CERT_FILE: &str = "server.crt";
const SERVER_KEY_FILE: &str = "server.key";

fn cert_path(file: &str) -> String {
    format!("{}/{}", CERT_DIR, file)
}

/// Validated member ready for rendering and reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    config: MemberConfig,
    new_cluster: bool,
    request_timeout: Duration,
}

impl Member {
    /// Validate `config` and build the member.
    ///
    /// An unset `newCluster` means a new cluster is bootstrapped.
    pub fn new(config: MemberConfig, request_timeout: Duration) -> Result<Self, ConfigError> {
        config
            .validate()
            .map_err(|e| e.for_member(config.name.clone()))?;

        Ok(Self {
            new_cluster: config.new_cluster.unwrap_or(true),
            config,
            request_timeout,
        })
    }

    /// Rebuild a member from the container deployed for it.
    ///
    /// Used to remove members that are no longer configured.
    pub fn from_deployed(
        name: &str,
        deployed: &HostConfiguredContainer,
        request_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let file = |file_name: &str| {
            deployed
                .config_files
                .get(&cert_path(file_name))
                .cloned()
                .unwrap_or_default()
        };

        let peer_address = deployed
            .container
            .flag_value("--initial-advertise-peer-urls")
            .and_then(|url| url.strip_prefix("https://"))
            .and_then(|rest| rest.strip_suffix(&format!(":{}", PEER_PORT)))
            .map(str::to_string)
            .or_else(|| deployed.container.ports.first().map(|p| p.ip.clone()))
            .unwrap_or_default();

        let config = MemberConfig {
            name: name.to_string(),
            image: deployed.container.image.clone(),
            host: deployed.host.clone(),
            peer_address,
            peer_certificate: file(PEER_CERT_FILE),
            peer_key: file(PEER_KEY_FILE),
            peer_ca_certificate: file(PEER_CA_FILE),
            server_certificate: file(SERVER_CERT_FILE),
            server_key: file(SERVER_KEY_FILE),
            ca_certificate: file(CA_FILE),
            initial_cluster: deployed
                .container
                .flag_value("--initial-cluster")
                .unwrap_or_default()
                .to_string(),
            peer_cert_allowed_cn: deployed
                .container
                .flag_value("--peer-cert-allowed-cn")
                .unwrap_or_default()
                .to_string(),
            new_cluster: Some(was_bootstrapped(&deployed.container)),
        };

        Self::new(config, request_timeout)
    }

    /// Member name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Address peers reach this member on
    pub fn peer_address(&self) -> &str {
        &self.config.peer_address
    }

    /// Host the member runs on
    pub fn host(&self) -> &Host {
        &self.config.host
    }

    /// Whether the member bootstraps a new cluster
    pub fn is_new_cluster(&self) -> bool {
        self.new_cluster
    }

    /// Configuration the member was built from
    pub fn config(&self) -> &MemberConfig {
        &self.config
    }

    /// URLs peers reach this member on
    pub fn peer_urls(&self) -> Vec<String> {
        vec![format!("https://{}:{}", self.config.peer_address, PEER_PORT)]
    }

    /// `host:port` of the client port as seen from the member's host
    pub fn client_endpoint(&self) -> String {
        format!("{}:{}", self.config.peer_address, CLIENT_PORT)
    }

    /// Certificate files written on the host, path -> PEM
    pub fn config_files(&self) -> BTreeMap<String, String> {
        let c = &self.config;
        [
            (PEER_CA_FILE, &c.peer_ca_certificate),
            (PEER_CERT_FILE, &c.peer_certificate),
            (PEER_KEY_FILE, &c.peer_key),
            (CA_FILE, &c.ca_certificate),
            (SERVER_CERT_FILE, &c.server_certificate),
            (SERVER_KEY_FILE, &c.server_key),
        ]
        .into_iter()
        .filter(|(_, content)| !content.is_empty())
        .map(|(file, content)| (cert_path(file), content.clone()))
        .collect()
    }

    /// etcd command line
    pub fn args(&self) -> Vec<String> {
        let c = &self.config;
        let mut args = vec![
            format!("--name={}", c.name),
            format!(
                "--initial-advertise-peer-urls=https://{}:{}",
                c.peer_address, PEER_PORT
            ),
            format!("--listen-peer-urls=https://0.0.0.0:{}", PEER_PORT),
            format!("--listen-client-urls=http://0.0.0.0:{}", CLIENT_PORT),
            format!(
                "--advertise-client-urls=http://{}:{}",
                c.peer_address, CLIENT_PORT
            ),
            format!("--initial-cluster={}", c.initial_cluster),
            format!("--data-dir=/{}.etcd", c.name),
            format!("--peer-trusted-ca-file={}", cert_path(PEER_CA_FILE)),
            format!("--peer-cert-file={}", cert_path(PEER_CERT_FILE)),
            format!("--peer-key-file={}", cert_path(PEER_KEY_FILE)),
            "--peer-client-cert-auth".to_string(),
        ];

        if !c.peer_cert_allowed_cn.is_empty() {
            args.push(format!("--peer-cert-allowed-cn={}", c.peer_cert_allowed_cn));
        }

        if !c.server_certificate.is_empty() {
            args.push(format!("--trusted-ca-file={}", cert_path(CA_FILE)));
            args.push(format!("--cert-file={}", cert_path(SERVER_CERT_FILE)));
            args.push(format!("--key-file={}", cert_path(SERVER_KEY_FILE)));
        }

        if self.new_cluster {
            args.push(format!("--initial-cluster-token={}", INITIAL_CLUSTER_TOKEN));
        } else {
            args.push("--initial-cluster-state=existing".to_string());
        }

        args
    }

    /// Container running this member
    pub fn container(&self) -> ContainerSpec {
        let c = &self.config;
        ContainerSpec {
            name: c.name.clone(),
            image: c.image.clone(),
            entrypoint: vec![ENTRYPOINT.to_string()],
            args: self.args(),
            ports: vec![
                PortMap::tcp(&c.peer_address, CLIENT_PORT),
                PortMap::tcp(&c.peer_address, PEER_PORT),
            ],
            mounts: vec![
                Mount::new(
                    format!("{}/{}.etcd", DATA_DIR, c.name),
                    format!("/{}.etcd", c.name),
                ),
                Mount::new(format!("{}/", CERT_DIR), CERT_DIR),
            ],
        }
    }

    /// Container, host and files handed to the container engine
    pub fn to_host_configured_container(&self) -> HostConfiguredContainer {
        HostConfiguredContainer {
            host: self.config.host.clone(),
            config_files: self.config_files(),
            container: self.container(),
        }
    }

    /// Connect the member's transport
    pub async fn connect(&self) -> Result<Box<dyn Connection>, EpError> {
        let transport = new_transport(&self.config.host)?;
        Ok(transport.connect().await?)
    }

    /// Make each remote client endpoint reachable locally
    pub async fn forward_endpoints(
        &self,
        connection: &dyn Connection,
        endpoints: &[String],
    ) -> Result<Vec<String>, ForwardError> {
        let mut forwarded = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let local = connection.forward_tcp(endpoint).await?;
            tracing::debug!("Endpoint {} reachable at {}", endpoint, local);
            forwarded.push(local);
        }
        Ok(forwarded)
    }

    /// TLS material for the client port, when peer certificates are set
    pub fn tls_material(&self) -> Option<TlsMaterial> {
        let c = &self.config;
        if !c.has_peer_certificates() {
            return None;
        }
        let ca_certificate = if c.ca_certificate.is_empty() {
            c.peer_ca_certificate.clone()
        } else {
            c.ca_certificate.clone()
        };
        Some(TlsMaterial {
            ca_certificate,
            certificate: c.peer_certificate.clone(),
            key: c.peer_key.clone(),
        })
    }

    /// Client for the live cluster over `endpoints`
    pub fn etcd_client(&self, endpoints: &[String]) -> Result<EtcdClient, MembershipError> {
        EtcdClient::new(
            endpoints,
            self.tls_material().as_ref(),
            self.request_timeout,
        )
    }

    /// Live ID of this member, `0` when it is not part of the cluster
    pub async fn get_id(&self, client: &dyn MembershipClient) -> Result<u64, MembershipError> {
        let own_peer_urls = self.peer_urls();
        let members = client.list_members().await?;

        Ok(members
            .iter()
            .find(|m| {
                m.name == self.config.name
                    || m.peer_urls.iter().any(|url| own_peer_urls.contains(url))
            })
            .map(|m| m.id)
            .unwrap_or(0))
    }

    /// Add this member to the cluster unless it is already there
    pub async fn add(&self, client: &dyn MembershipClient) -> Result<(), EpError> {
        let id = self.get_id(client).await.map_err(EpError::ResolveIdentity)?;
        if id != 0 {
            tracing::debug!("Member {} already in cluster as {:x}", self.name(), id);
            return Ok(());
        }

        match client.add_member(&self.peer_urls()).await {
            Ok(id) => {
                tracing::info!("Added member {} as {:x}", self.name(), id);
                Ok(())
            }
            Err(MembershipError::AlreadyExists(urls)) => {
                tracing::warn!("Member {} was added concurrently ({})", self.name(), urls);
                Ok(())
            }
            Err(e) => Err(EpError::MembershipMutate(e)),
        }
    }

    /// Remove this member from the cluster if it is there
    pub async fn remove(&self, client: &dyn MembershipClient) -> Result<(), EpError> {
        let id = self.get_id(client).await.map_err(EpError::ResolveIdentity)?;
        if id == 0 {
            tracing::debug!("Member {} not in cluster, nothing to remove", self.name());
            return Ok(());
        }

        match client.remove_member(id).await {
            Ok(()) => {
                tracing::info!("Removed member {} ({:x})", self.name(), id);
                Ok(())
            }
            Err(MembershipError::NotFound(id)) => {
                tracing::warn!("Member {} ({:x}) was removed concurrently", self.name(), id);
                Ok(())
            }
            Err(e) => Err(EpError::MembershipMutate(e)),
        }
    }

    /// Connect, add this member through `endpoints`, disconnect
    pub async fn join(
        &self,
        endpoints: &[String],
        factory: &dyn ClientFactory,
    ) -> Result<(), EpError> {
        let connection = self.connect().await?;
        let result = self.join_over(connection.as_ref(), endpoints, factory).await;
        connection.close().await;
        result
    }

    /// Connect, remove this member through `endpoints`, disconnect
    pub async fn leave(
        &self,
        endpoints: &[String],
        factory: &dyn ClientFactory,
    ) -> Result<(), EpError> {
        let connection = self.connect().await?;
        let result = self.leave_over(connection.as_ref(), endpoints, factory).await;
        connection.close().await;
        result
    }

    /// Connect, list the live members through `endpoints`, disconnect
    pub async fn live_members(
        &self,
        endpoints: &[String],
        factory: &dyn ClientFactory,
    ) -> Result<Vec<LiveMember>, EpError> {
        let connection = self.connect().await?;
        let result = self.list_over(connection.as_ref(), endpoints, factory).await;
        connection.close().await;
        result
    }

    async fn list_over(
        &self,
        connection: &dyn Connection,
        endpoints: &[String],
        factory: &dyn ClientFactory,
    ) -> Result<Vec<LiveMember>, EpError> {
        let client = self.client_over(connection, endpoints, factory).await?;
        client.list_members().await.map_err(EpError::ResolveIdentity)
    }

    async fn join_over(
        &self,
        connection: &dyn Connection,
        endpoints: &[String],
        factory: &dyn ClientFactory,
    ) -> Result<(), EpError> {
        let client = self.client_over(connection, endpoints, factory).await?;
        self.add(client.as_ref()).await
    }

    async fn leave_over(
        &self,
        connection: &dyn Connection,
        endpoints: &[String],
        factory: &dyn ClientFactory,
    ) -> Result<(), EpError> {
        let client = self.client_over(connection, endpoints, factory).await?;
        self.remove(client.as_ref()).await
    }

    async fn client_over(
        &self,
        connection: &dyn Connection,
        endpoints: &[String],
        factory: &dyn ClientFactory,
    ) -> Result<Box<dyn MembershipClient>, EpError> {
        let forwarded = self.forward_endpoints(connection, endpoints).await?;
        factory
            .client(self, &forwarded)
            .map_err(EpError::ResolveIdentity)
    }
}

/// Whether a deployed container was started as part of a new cluster
pub fn was_bootstrapped(container: &ContainerSpec) -> bool {
    !container.has_flag("--initial-cluster-state")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory stand-in for the live cluster
    #[derive(Default)]
    struct FakeCluster {
        members: Mutex<Vec<LiveMember>>,
        next_id: Mutex<u64>,
        calls: Mutex<Vec<String>>,
        unreachable: bool,
        fail_mutations: bool,
    }

    impl FakeCluster {
        fn with(members: Vec<LiveMember>) -> Self {
            Self {
                members: Mutex::new(members),
                next_id: Mutex::new(100),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn len(&self) -> usize {
            self.members.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MembershipClient for FakeCluster {
        async fn list_members(&self) -> Result<Vec<LiveMember>, MembershipError> {
            self.calls.lock().unwrap().push("list".into());
            if self.unreachable {
                return Err(MembershipError::Request("connection refused".into()));
            }
            Ok(self.members.lock().unwrap().clone())
        }

        async fn add_member(&self, peer_urls: &[String]) -> Result<u64, MembershipError> {
            self.calls.lock().unwrap().push(format!("add {}", peer_urls.join(",")));
            if self.fail_mutations {
                return Err(MembershipError::Rejected {
                    code: 14,
                    message: "etcdserver: unhealthy cluster".into(),
                });
            }
            let mut members = self.members.lock().unwrap();
            if members
                .iter()
                .any(|m| m.peer_urls.iter().any(|u| peer_urls.contains(u)))
            {
                return Err(MembershipError::AlreadyExists(peer_urls.join(",")));
            }
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            members.push(LiveMember {
                id: *next_id,
                name: String::new(),
                peer_urls: peer_urls.to_vec(),
            });
            Ok(*next_id)
        }

        async fn remove_member(&self, id: u64) -> Result<(), MembershipError> {
            self.calls.lock().unwrap().push(format!("remove {}", id));
            if self.fail_mutations {
                return Err(MembershipError::Rejected {
                    code: 14,
                    message: "etcdserver: unhealthy cluster".into(),
                });
            }
            let mut members = self.members.lock().unwrap();
            let before = members.len();
            members.retain(|m| m.id != id);
            if members.len() == before {
                return Err(MembershipError::NotFound(id));
            }
            Ok(())
        }
    }

    /// Reports a member as absent, then races with a concurrent change
    struct RacingCluster {
        error: fn() -> MembershipError,
        listed_id: u64,
    }

    #[async_trait]
    impl MembershipClient for RacingCluster {
        async fn list_members(&self) -> Result<Vec<LiveMember>, MembershipError> {
            Ok(vec![LiveMember {
                id: self.listed_id,
                name: "etcd-foo".into(),
                peer_urls: vec!["https://10.0.0.5:2380".into()],
            }]
            .into_iter()
            .filter(|m| m.id != 0)
            .collect())
        }

        async fn add_member(&self, _: &[String]) -> Result<u64, MembershipError> {
            Err((self.error)())
        }

        async fn remove_member(&self, _: u64) -> Result<(), MembershipError> {
            Err((self.error)())
        }
    }

    fn config(name: &str, peer_address: &str) -> MemberConfig {
        MemberConfig {
            name: name.into(),
            image: "quay.io/coreos/etcd:v3.4.13".into(),
            host: Host::direct(),
            peer_address: peer_address.into(),
            initial_cluster: format!("{}=https://{}:2380", name, peer_address),
            ..Default::default()
        }
    }

    fn member(name: &str, peer_address: &str) -> Member {
        Member::new(config(name, peer_address), Duration::from_secs(1)).unwrap()
    }

    fn live(id: u64, name: &str, peer_url: &str) -> LiveMember {
        LiveMember {
            id,
            name: name.into(),
            peer_urls: vec![peer_url.into()],
        }
    }

    #[test]
    fn test_peer_urls() {
        assert_eq!(
            member("etcd-foo", "10.0.0.5").peer_urls(),
            vec!["https://10.0.0.5:2380"]
        );
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = Member::new(config("etcd-foo", ""), Duration::from_secs(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "member etcd-foo: missing required field: peerAddress"
        );
    }

    #[test]
    fn test_render_new_cluster_member() {
        let args = member("etcd-foo", "10.0.0.5").args();
        for expected in [
            "--listen-client-urls=http://0.0.0.0:2379",
            "--listen-peer-urls=https://0.0.0.0:2380",
            "--advertise-client-urls=http://10.0.0.5:2379",
            "--initial-advertise-peer-urls=https://10.0.0.5:2380",
            "--initial-cluster=etcd-foo=https://10.0.0.5:2380",
            "--name=etcd-foo",
            "--peer-trusted-ca-file=/etc/kubernetes/pki/etcd/peer-ca.crt",
            "--peer-cert-file=/etc/kubernetes/pki/etcd/peer.crt",
            "--peer-client-cert-auth",
            "--data-dir=/etcd-foo.etcd",
            "--initial-cluster-token=etcd-cluster-2",
        ] {
            assert!(args.iter().any(|a| a == expected), "missing {}", expected);
        }
        assert!(!args.iter().any(|a| a.starts_with("--initial-cluster-state")));
    }

    #[test]
    fn test_render_joining_member() {
        let joining = Member::new(
            MemberConfig {
                new_cluster: Some(false),
                ..config("etcd-foo", "10.0.0.5")
            },
            Duration::from_secs(1),
        )
        .unwrap();
        let args = joining.args();
        assert!(args.iter().any(|a| a == "--initial-cluster-state=existing"));
        assert!(!args.iter().any(|a| a.starts_with("--initial-cluster-token")));
    }

    #[test]
    fn test_render_optional_flags() {
        let plain = member("etcd-foo", "10.0.0.5").container();
        assert!(!plain.has_flag("--peer-cert-allowed-cn"));
        assert!(!plain.has_flag("--cert-file"));

        let full = Member::new(
            MemberConfig {
                peer_cert_allowed_cn: "etcd-foo,etcd-bar".into(),
                server_certificate: "server".into(),
                server_key: "key".into(),
                ca_certificate: "ca".into(),
                ..config("etcd-foo", "10.0.0.5")
            },
            Duration::from_secs(1),
        )
        .unwrap()
        .container();
        assert_eq!(
            full.flag_value("--peer-cert-allowed-cn"),
            Some("etcd-foo,etcd-bar")
        );
        assert_eq!(
            full.flag_value("--cert-file"),
            Some("/etc/kubernetes/pki/etcd/server.crt")
        );
    }

    #[test]
    fn test_container_layout() {
        let hcc = Member::new(
            MemberConfig {
                peer_ca_certificate: "ca".into(),
                peer_certificate: "cert".into(),
                peer_key: "key".into(),
                ..config("etcd-foo", "10.0.0.5")
            },
            Duration::from_secs(1),
        )
        .unwrap()
        .to_host_configured_container();

        let container = &hcc.container;
        assert_eq!(container.name, "etcd-foo");
        assert_eq!(container.entrypoint, vec!["/usr/local/bin/etcd"]);
        assert_eq!(
            container.ports,
            vec![PortMap::tcp("10.0.0.5", 2379), PortMap::tcp("10.0.0.5", 2380)]
        );
        assert!(container
            .mounts
            .contains(&Mount::new("/var/lib/etcd/etcd-foo.etcd", "/etcd-foo.etcd")));

        assert_eq!(hcc.config_files.len(), 3);
        assert_eq!(
            hcc.config_files.get("/etc/kubernetes/pki/etcd/peer.key").map(String::as_str),
            Some("key")
        );
        assert_eq!(hcc.host, Host::direct());
    }

    #[test]
    fn test_from_deployed_roundtrip() {
        let original = Member::new(
            MemberConfig {
                peer_ca_certificate: "ca".into(),
                peer_certificate: "cert".into(),
                peer_key: "key".into(),
                new_cluster: Some(false),
                ..config("etcd-foo", "10.0.0.5")
            },
            Duration::from_secs(1),
        )
        .unwrap();

        let rebuilt = Member::from_deployed(
            "etcd-foo",
            &original.to_host_configured_container(),
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(rebuilt.peer_urls(), original.peer_urls());
        assert!(!rebuilt.is_new_cluster());
        assert_eq!(rebuilt.container(), original.container());
        assert!(rebuilt.tls_material().is_some());
    }

    #[tokio::test]
    async fn test_forward_endpoints_direct() {
        let member = member("etcd-foo", "10.0.0.5");
        let connection = member.connect().await.unwrap();
        let endpoints = vec!["10.0.0.5:2379".to_string(), "10.0.0.6:2379".to_string()];
        assert_eq!(
            member
                .forward_endpoints(connection.as_ref(), &endpoints)
                .await
                .unwrap(),
            endpoints
        );

        let bad = vec!["10.0.0.5:2379".to_string(), "10.0.0.6".to_string()];
        assert!(member
            .forward_endpoints(connection.as_ref(), &bad)
            .await
            .is_err());
    }

    #[test]
    fn test_etcd_client_needs_endpoints() {
        assert!(matches!(
            member("etcd-foo", "10.0.0.5").etcd_client(&[]),
            Err(MembershipError::NoEndpoints)
        ));
    }

    #[tokio::test]
    async fn test_get_id_by_name() {
        let cluster = FakeCluster::with(vec![
            live(3, "etcd-bar", "https://10.0.0.6:2380"),
            live(7, "etcd-foo", "https://10.9.9.9:2380"),
        ]);
        let id = member("etcd-foo", "10.0.0.5").get_id(&cluster).await.unwrap();
        assert_eq!(id, 7);
    }

    #[tokio::test]
    async fn test_get_id_by_peer_url() {
        // Added but not yet started members have no name
        let cluster = FakeCluster::with(vec![live(9, "", "https://10.0.0.5:2380")]);
        let id = member("etcd-foo", "10.0.0.5").get_id(&cluster).await.unwrap();
        assert_eq!(id, 9);
    }

    #[tokio::test]
    async fn test_get_id_absent_is_zero() {
        let cluster = FakeCluster::with(vec![live(3, "etcd-bar", "https://10.0.0.6:2380")]);
        let id = member("etcd-foo", "10.0.0.5").get_id(&cluster).await.unwrap();
        assert_eq!(id, 0);
    }

    #[tokio::test]
    async fn test_present_member_scenario() {
        let cluster = FakeCluster::with(vec![live(7, "etcd-foo", "https://10.0.0.5:2380")]);
        let member = member("etcd-foo", "10.0.0.5");

        assert_eq!(member.get_id(&cluster).await.unwrap(), 7);

        member.add(&cluster).await.unwrap();
        assert!(!cluster.calls().iter().any(|c| c.starts_with("add")));

        member.remove(&cluster).await.unwrap();
        assert!(cluster.calls().contains(&"remove 7".to_string()));
        assert_eq!(cluster.len(), 0);
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let cluster = FakeCluster::with(vec![live(3, "etcd-bar", "https://10.0.0.6:2380")]);
        let member = member("etcd-foo", "10.0.0.5");

        member.add(&cluster).await.unwrap();
        member.add(&cluster).await.unwrap();

        assert_eq!(cluster.len(), 2);
        let adds = cluster.calls().iter().filter(|c| c.starts_with("add")).count();
        assert_eq!(adds, 1);
    }

    #[tokio::test]
    async fn test_remove_absent_member_is_noop() {
        let cluster = FakeCluster::with(vec![live(3, "etcd-bar", "https://10.0.0.6:2380")]);
        member("etcd-foo", "10.0.0.5").remove(&cluster).await.unwrap();
        assert_eq!(cluster.calls(), vec!["list"]);
        assert_eq!(cluster.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_cluster_aborts_add_and_remove() {
        let cluster = FakeCluster {
            unreachable: true,
            ..FakeCluster::default()
        };
        let member = member("etcd-foo", "10.0.0.5");

        assert!(matches!(
            member.add(&cluster).await,
            Err(EpError::ResolveIdentity(_))
        ));
        assert!(matches!(
            member.remove(&cluster).await,
            Err(EpError::ResolveIdentity(_))
        ));
        assert_eq!(cluster.calls(), vec!["list", "list"]);
    }

    #[tokio::test]
    async fn test_mutation_failures_surface() {
        let cluster = FakeCluster {
            fail_mutations: true,
            ..FakeCluster::with(vec![live(7, "etcd-foo", "https://10.0.0.5:2380")])
        };

        assert!(matches!(
            member("etcd-new", "10.0.0.9").add(&cluster).await,
            Err(EpError::MembershipMutate(MembershipError::Rejected { code: 14, .. }))
        ));
        assert!(matches!(
            member("etcd-foo", "10.0.0.5").remove(&cluster).await,
            Err(EpError::MembershipMutate(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_changes_are_swallowed() {
        let member = member("etcd-foo", "10.0.0.5");

        let raced_add = RacingCluster {
            error: || MembershipError::AlreadyExists("https://10.0.0.5:2380".into()),
            listed_id: 0,
        };
        member.add(&raced_add).await.unwrap();

        let raced_remove = RacingCluster {
            error: || MembershipError::NotFound(7),
            listed_id: 7,
        };
        member.remove(&raced_remove).await.unwrap();
    }
}
