//! Plan command implementation

use anyhow::Result;

use ep_etcd::Cluster;

use crate::output::{format_plan, print_info};

/// Show what a reconciliation pass would deploy, without touching any host
pub fn plan_command(cluster: &Cluster, json: bool) -> Result<()> {
    if json {
        let state = serde_json::to_string_pretty(&cluster.desired_state())?;
        println!("{}", state);
        return Ok(());
    }

    let table = format_plan(cluster.members(), cluster.previous_state());
    println!("{}", table);

    let departing = cluster.departing();
    if !departing.is_empty() {
        print_info(&format!("Will remove: {}", departing.join(", ")));
    }
    print_info(&format!("Initial cluster: {}", cluster.initial_cluster()));
    Ok(())
}
