//! ep-core: Core abstractions and configuration for etcd-pilot
//!
//! This crate provides the error taxonomy, configuration helpers and the
//! container records shared by the transport, etcd and CLI crates.

pub mod config;
pub mod error;
pub mod types;

pub use error::EpError;
pub use types::{ContainerSpec, Mount, PortMap};
