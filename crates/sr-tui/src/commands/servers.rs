//! Headless server listing

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::output::{format_servers, print_info, print_success};
use sr_client::{Command, Controller};

/// Fetch the catalog, optionally rank it by latency, and print it
pub async fn servers_command(controller: &Arc<Controller>, probe: bool) -> Result<()> {
    controller
        .execute(Command::RefreshCatalog)
        .await
        .context("Failed to refresh server list")?;

    if probe {
        print_info("Testing server latency...");
        controller
            .execute(Command::RunLatencyProbe)
            .await
            .context("Latency test failed")?;
    }

    let snapshot = controller.state().snapshot();
    println!(
        "{}",
        format_servers(&snapshot.servers, snapshot.active_server.as_ref())
    );

    if probe {
        let reachable = snapshot
            .servers
            .iter()
            .filter(|s| s.latency.is_measured())
            .count();
        print_success(&format!(
            "{} of {} servers reachable",
            reachable,
            snapshot.servers.len()
        ));
    }

    Ok(())
}
