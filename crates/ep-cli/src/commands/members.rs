//! Members command implementation

use anyhow::{Context, Result};

use ep_etcd::{Cluster, EtcdClientFactory};

use crate::output::format_live_members;

/// List the live membership through a deployed member
pub async fn members_command(cluster: &Cluster) -> Result<()> {
    let members = cluster
        .live_members(&EtcdClientFactory)
        .await
        .context("Failed to list live members")?;

    println!("{}", format_live_members(&members));
    Ok(())
}
