//! etcd-pilot: command-line front end
//!
//! Loads a cluster description, shows the plan, lists the live membership
//! and runs reconciliation passes that record the resulting container state.

pub mod commands;
pub mod deployer;
pub mod output;
