use anyhow::{Context, Result};
use clap::ValueEnum;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Table};
use reqwest::Client;
use std::path::Path;
use tracing::info;

use crate::api::models::{WifConfig, WifPool};
use crate::api::{validate_resource_key, ControlPlane};
use crate::config::Config;
use crate::gcp::rest::GcpRestClient;
use crate::gcp::types::JwkSet;
use crate::gcp::{self, CloudIdentity, GcpError};
use crate::wif::{scripts, WifReconciler};

/// How changes reach the cloud: `auto` calls the IAM APIs directly, `manual`
/// renders a script for the operator to review and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Auto,
    Manual,
}

/// Build the live cloud client from the caller's environment. Cloud
/// credentials are deliberately not persisted in the CLI config; access
/// tokens are short-lived and `gcloud` already manages them.
fn cloud_identity(http_client: &Client) -> Result<GcpRestClient> {
    let token = std::env::var("GCP_ACCESS_TOKEN")
        .ok()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "GCP_ACCESS_TOKEN is not set. Run: export GCP_ACCESS_TOKEN=$(gcloud auth print-access-token)"
            )
        })?;
    Ok(GcpRestClient::new(http_client.clone(), token))
}

/// Reject a malformed configuration before any cloud call is made. The
/// control plane owns these fields, but a broken JWKS or issuer would
/// otherwise only surface as an opaque API error mid-provisioning.
fn validate_config(config: &WifConfig) -> Result<()> {
    if config.project_id.is_empty() || config.pool.pool_id.is_empty() {
        anyhow::bail!("federation configuration '{}' has no project or pool id", config.id);
    }
    if config.provider.provider_id.is_empty() {
        anyhow::bail!("federation configuration '{}' has no provider id", config.id);
    }
    let issuer = url::Url::parse(&config.provider.issuer_url)
        .with_context(|| format!("invalid issuer URL '{}'", config.provider.issuer_url))?;
    if issuer.scheme() != "https" {
        anyhow::bail!("issuer URL '{}' must use https", config.provider.issuer_url);
    }
    JwkSet::parse(&config.provider.jwks)
        .with_context(|| format!("federation configuration '{}' has an invalid JWKS", config.id))?;
    Ok(())
}

async fn reconcile_create(cloud: &dyn CloudIdentity, config: &WifConfig) -> Result<()> {
    let engine = WifReconciler::new(cloud, config);
    engine.ensure_workload_identity_pool().await?;
    engine.ensure_workload_identity_provider().await?;
    engine.ensure_service_accounts().await?;
    Ok(())
}

async fn reconcile_update(cloud: &dyn CloudIdentity, config: &WifConfig) -> Result<()> {
    let engine = WifReconciler::new(cloud, config);
    engine.grant_support_access().await?;
    engine.ensure_workload_identity_pool().await?;
    engine.ensure_workload_identity_provider().await?;
    engine.ensure_service_accounts().await?;
    Ok(())
}

fn announce_script(target_dir: &Path) {
    println!(
        "✓ Wrote {} and {} to {}",
        scripts::SETUP_SCRIPT_NAME,
        scripts::JWKS_FILE_NAME,
        target_dir.display()
    );
    println!("Review the script, then run it to provision the cloud resources:");
    println!(
        "  cd {} && ./{}",
        target_dir.display(),
        scripts::SETUP_SCRIPT_NAME
    );
}

/// Create a federation configuration on the control plane, then provision
/// (auto) or render (manual) the cloud-side resources it describes.
pub async fn create(
    http_client: &Client,
    config: &Config,
    name: &str,
    project: &str,
    pool_id: Option<&str>,
    mode: Mode,
    target_dir: &Path,
) -> Result<()> {
    validate_resource_key(name)?;
    validate_resource_key(project)?;
    if let Some(pool_id) = pool_id {
        validate_resource_key(pool_id)?;
    }

    let cloud = cloud_identity(http_client)?;
    let project_number = cloud
        .project_number(project)
        .await
        .with_context(|| format!("Failed to resolve project number for '{}'", project))?;

    let request = WifConfig {
        display_name: name.to_string(),
        project_id: project.to_string(),
        project_number,
        pool: WifPool {
            pool_id: pool_id
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}-pool", name)),
        },
        ..WifConfig::default()
    };

    let api = ControlPlane::new(http_client, config)?;
    let created = api.create_wif_config(&request).await?;
    info!(id = %created.id, "federation configuration created");
    validate_config(&created)?;

    match mode {
        Mode::Auto => {
            reconcile_create(&cloud, &created)
                .await
                .context("Failed to provision workload identity federation")?;
            println!("✓ Federation configuration '{}' created and provisioned", name);
            println!("  Run 'strato wif verify {}' to confirm the setup.", name);
        }
        Mode::Manual => {
            scripts::write_setup(target_dir, &created)?;
            println!("✓ Federation configuration '{}' created", name);
            announce_script(target_dir);
        }
    }
    Ok(())
}

/// Re-converge the cloud resources for an existing configuration. Safe to
/// re-run; completed work is skipped.
pub async fn update(
    http_client: &Client,
    config: &Config,
    key: &str,
    mode: Mode,
    target_dir: &Path,
) -> Result<()> {
    let api = ControlPlane::new(http_client, config)?;
    let found = api.find_wif_config(key).await?;
    validate_config(&found)?;

    match mode {
        Mode::Auto => {
            let cloud = cloud_identity(http_client)?;
            reconcile_update(&cloud, &found)
                .await
                .context("Failed to update workload identity federation")?;

            let status = api.wif_status(&found.id).await?;
            if !status.configured {
                anyhow::bail!(
                    "federation configuration '{}' is still misconfigured after the update: {}",
                    found.display_name,
                    status.description
                );
            }
            println!("✓ Federation configuration '{}' is up to date", found.display_name);
        }
        Mode::Manual => {
            scripts::write_setup(target_dir, &found)?;
            announce_script(target_dir);
        }
    }
    Ok(())
}

/// Tear down the cloud resources of a configuration and delete it from the
/// control plane. Only service accounts and the pool are removed; see the
/// delete script for the rationale.
pub async fn delete(
    http_client: &Client,
    config: &Config,
    key: &str,
    mode: Mode,
    dry_run: bool,
) -> Result<()> {
    let api = ControlPlane::new(http_client, config)?;
    let found = api.find_wif_config(key).await?;

    if dry_run {
        println!("{}", scripts::delete_script(&found));
        println!("Dry run: no changes were made.");
        return Ok(());
    }

    match mode {
        Mode::Auto => {
            let cloud = cloud_identity(http_client)?;
            for account in &found.service_accounts {
                let email = gcp::service_account_email(&account.account_id, &found.project_id);
                match cloud.delete_service_account(&found.project_id, &email).await {
                    // Already gone counts as deleted.
                    Ok(()) | Err(GcpError::NotFound(_)) => {}
                    Err(e) => {
                        return Err(e).with_context(|| {
                            format!("Failed to delete service account '{}'", email)
                        })
                    }
                }
            }
            let pool_name = gcp::pool_resource(&found.project_id, &found.pool.pool_id);
            match cloud.delete_pool(&pool_name).await {
                Ok(()) | Err(GcpError::NotFound(_)) => {}
                Err(e) => {
                    return Err(e).context("Failed to delete the workload identity pool")
                }
            }
        }
        Mode::Manual => {
            println!("Run the following commands to remove the cloud resources:");
            println!();
            println!("{}", scripts::delete_script(&found));
        }
    }

    api.delete_wif_config(&found.id).await?;
    println!("✓ Federation configuration '{}' deleted", found.display_name);
    Ok(())
}

/// Print the raw configuration resource as JSON.
pub async fn get(http_client: &Client, config: &Config, key: &str) -> Result<()> {
    let api = ControlPlane::new(http_client, config)?;
    let found = api.find_wif_config(key).await?;
    println!("{}", serde_json::to_string_pretty(&found)?);
    Ok(())
}

pub async fn describe(http_client: &Client, config: &Config, key: &str) -> Result<()> {
    let api = ControlPlane::new(http_client, config)?;
    let found = api.find_wif_config(key).await?;

    println!("Federation Configuration:");
    println!("  ID:         {}", found.id);
    println!("  Name:       {}", found.display_name);
    println!("  Project:    {} ({})", found.project_id, found.project_number);
    println!("  Pool:       {}", found.pool.pool_id);
    println!("  Provider:   {}", found.provider.provider_id);
    println!("  Issuer URL: {}", found.provider.issuer_url);
    println!("  Audiences:  {}", found.provider.allowed_audiences.join(", "));
    println!("  Support:    {}", found.support.principal);

    if found.service_accounts.is_empty() {
        println!("  No service accounts declared.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("ACCOUNT ID").add_attribute(Attribute::Bold),
            Cell::new("ACCESS METHOD").add_attribute(Attribute::Bold),
            Cell::new("ROLES").add_attribute(Attribute::Bold),
        ]);
    for account in &found.service_accounts {
        let roles = account
            .roles
            .iter()
            .map(|r| r.role_id.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            Cell::new(&account.account_id),
            Cell::new(String::from(account.access_method.clone())),
            Cell::new(roles),
        ]);
    }
    println!("{}", table);
    Ok(())
}

pub async fn list(http_client: &Client, config: &Config) -> Result<()> {
    let api = ControlPlane::new(http_client, config)?;
    let configs = api.list_wif_configs(None).await?;

    if configs.is_empty() {
        println!("No federation configurations found.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("ID").add_attribute(Attribute::Bold),
            Cell::new("NAME").add_attribute(Attribute::Bold),
            Cell::new("PROJECT").add_attribute(Attribute::Bold),
            Cell::new("POOL").add_attribute(Attribute::Bold),
            Cell::new("ISSUER").add_attribute(Attribute::Bold),
        ]);
    for item in configs {
        table.add_row(vec![
            Cell::new(&item.id),
            Cell::new(&item.display_name),
            Cell::new(&item.project_id),
            Cell::new(&item.pool.pool_id),
            Cell::new(&item.provider.issuer_url),
        ]);
    }
    println!("{}", table);
    Ok(())
}

/// Check the control plane's view of the configuration and exit non-zero if
/// it reports drift.
pub async fn verify(http_client: &Client, config: &Config, key: &str) -> Result<()> {
    let api = ControlPlane::new(http_client, config)?;
    let found = api.find_wif_config(key).await?;
    let status = api.wif_status(&found.id).await?;

    if status.configured {
        println!(
            "✓ Federation configuration '{}' is properly configured",
            found.display_name
        );
        return Ok(());
    }
    anyhow::bail!(
        "federation configuration '{}' is misconfigured: {}. Run 'strato wif update {}' to repair it",
        found.display_name,
        status.description,
        found.display_name
    );
}

/// Write the setup script and JWKS file without touching the cloud.
pub async fn generate(
    http_client: &Client,
    config: &Config,
    key: &str,
    target_dir: &Path,
) -> Result<()> {
    let api = ControlPlane::new(http_client, config)?;
    let found = api.find_wif_config(key).await?;
    validate_config(&found)?;
    scripts::write_setup(target_dir, &found)?;
    announce_script(target_dir);
    Ok(())
}
