//! ep-etcd: etcd members as containers, and their live membership
//!
//! [`Cluster`] turns a [`ClusterConfig`] into rendered containers and keeps
//! the running cluster's membership in line with it. Membership calls go
//! through etcd's JSON gateway, reached over each member's transport.

pub mod client;
pub mod cluster;
pub mod config;
pub mod deploy;
pub mod member;

pub use client::{ClientFactory, EtcdClient, EtcdClientFactory, LiveMember, MembershipClient};
pub use cluster::{Cluster, Deployment};
pub use config::{ClusterConfig, ClusterDefaults, MemberConfig};
pub use deploy::{ContainerDeployer, ContainersState, HostConfiguredContainer, ReconcileReport};
pub use member::Member;
