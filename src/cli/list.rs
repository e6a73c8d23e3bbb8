use anyhow::Result;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Table};
use reqwest::Client;

use crate::api::ControlPlane;
use crate::config::Config;

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
    table
}

pub async fn clusters(http_client: &Client, config: &Config, managed_only: bool) -> Result<()> {
    let api = ControlPlane::new(http_client, config)?;
    let mut clusters = api.list_clusters(None).await?;
    if managed_only {
        clusters.retain(|c| c.managed);
    }

    if clusters.is_empty() {
        println!("No clusters found.");
        return Ok(());
    }

    let mut table = new_table(&["ID", "NAME", "STATE", "PROVIDER", "REGION", "VERSION"]);
    for cluster in clusters {
        table.add_row(vec![
            Cell::new(&cluster.id),
            Cell::new(&cluster.name),
            Cell::new(&cluster.state),
            Cell::new(&cluster.cloud_provider),
            Cell::new(&cluster.region),
            Cell::new(&cluster.version),
        ]);
    }
    println!("{}", table);
    Ok(())
}

pub async fn machine_pools(http_client: &Client, config: &Config, cluster: &str) -> Result<()> {
    let api = ControlPlane::new(http_client, config)?;
    let cluster = api.find_cluster(cluster).await?;
    let pools = api.list_machine_pools(&cluster.id).await?;

    if pools.is_empty() {
        println!("No machine pools found for cluster '{}'.", cluster.name);
        return Ok(());
    }

    let mut table = new_table(&["ID", "INSTANCE TYPE", "REPLICAS", "AVAILABILITY ZONES"]);
    for pool in pools {
        table.add_row(vec![
            Cell::new(&pool.id),
            Cell::new(&pool.instance_type),
            Cell::new(pool.replicas),
            Cell::new(pool.availability_zones.join(", ")),
        ]);
    }
    println!("{}", table);
    Ok(())
}

pub async fn users(http_client: &Client, config: &Config, cluster: &str) -> Result<()> {
    let api = ControlPlane::new(http_client, config)?;
    let cluster = api.find_cluster(cluster).await?;
    let users = api.list_users(&cluster.id).await?;

    if users.is_empty() {
        println!("No users found for cluster '{}'.", cluster.name);
        return Ok(());
    }

    let mut table = new_table(&["ID", "USERNAME", "GROUP"]);
    for user in users {
        table.add_row(vec![
            Cell::new(&user.id),
            Cell::new(&user.username),
            Cell::new(&user.group),
        ]);
    }
    println!("{}", table);
    Ok(())
}

pub async fn providers(http_client: &Client, config: &Config) -> Result<()> {
    let api = ControlPlane::new(http_client, config)?;
    let providers = api.list_providers().await?;

    if providers.is_empty() {
        println!("No cloud providers found.");
        return Ok(());
    }

    let mut table = new_table(&["ID", "DISPLAY NAME"]);
    for provider in providers {
        table.add_row(vec![Cell::new(&provider.id), Cell::new(&provider.display_name)]);
    }
    println!("{}", table);
    Ok(())
}

pub async fn versions(http_client: &Client, config: &Config) -> Result<()> {
    let api = ControlPlane::new(http_client, config)?;
    let versions = api.list_versions().await?;

    if versions.is_empty() {
        println!("No versions found.");
        return Ok(());
    }

    let mut table = new_table(&["ID", "RAW ID", "ENABLED", "DEFAULT"]);
    for version in versions {
        table.add_row(vec![
            Cell::new(&version.id),
            Cell::new(&version.raw_id),
            Cell::new(version.enabled),
            Cell::new(if version.is_default { "yes" } else { "" }),
        ]);
    }
    println!("{}", table);
    Ok(())
}

pub async fn quota(http_client: &Client, config: &Config) -> Result<()> {
    let api = ControlPlane::new(http_client, config)?;
    let quota = api.list_quota().await?;

    if quota.is_empty() {
        println!("No quota costs found.");
        return Ok(());
    }

    let mut table = new_table(&["QUOTA ID", "CONSUMED", "ALLOWED"]);
    for cost in quota {
        table.add_row(vec![
            Cell::new(&cost.quota_id),
            Cell::new(cost.consumed),
            Cell::new(cost.allowed),
        ]);
    }
    println!("{}", table);
    Ok(())
}
