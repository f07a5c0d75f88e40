//! Reconcile command implementation

use anyhow::{bail, Context, Result};

use ep_etcd::{Cluster, EtcdClientFactory};

use crate::deployer::StateFileDeployer;
use crate::output::{format_report, print_error, print_success, print_warning};

/// Run one membership pass and record the resulting state
pub async fn reconcile_command(cluster: &Cluster, deployer: &StateFileDeployer) -> Result<()> {
    let deployment = cluster
        .deploy(&EtcdClientFactory, deployer)
        .await
        .context("Failed to deploy containers")?;

    println!("{}", format_report(&deployment.report));

    if deployment.report.is_success() {
        print_success(&format!(
            "{} members recorded in {}",
            deployment.state.len(),
            deployer.path().display()
        ));
        return Ok(());
    }

    for (name, e) in &deployment.report.failures {
        print_error(&format!("{}: {}", name, e));
    }
    print_warning("Failed changes were not recorded, rerun to retry them");
    bail!(
        "{} of {} member changes failed",
        deployment.report.failures.len(),
        deployment.report.failures.len()
            + deployment.report.joined.len()
            + deployment.report.removed.len()
    )
}
