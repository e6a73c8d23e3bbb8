//! Renders the desired federation state as `gcloud` invocations for
//! operators who apply changes manually instead of letting the CLI call the
//! cloud API ("manual mode").
//!
//! Script text is a pure function of the federation configuration, so
//! repeated generation is byte-identical. The JWKS document is written to a
//! sibling JSON file and referenced by relative path; inlining it would make
//! the script hostage to shell quoting of arbitrary key material.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::api::models::{AccessMethod, RoleSpec, WifConfig};
use crate::gcp::service_account_email;
use super::reconciler::{federated_principal, TOKEN_CREATOR_ROLE, WORKLOAD_IDENTITY_USER_ROLE};

pub const SETUP_SCRIPT_NAME: &str = "setup-wif.sh";
pub const JWKS_FILE_NAME: &str = "jwks.json";

/// The shell script that provisions the full federation setup, in dependency
/// order: pool, provider, service accounts, custom roles, role bindings,
/// access grants, support access.
pub fn setup_script(config: &WifConfig) -> String {
    let project = &config.project_id;
    let pool_id = &config.pool.pool_id;
    let mut lines: Vec<String> = vec![
        "#!/bin/sh".into(),
        format!("# Workload identity federation setup for {}", config.display_name),
        "set -e".into(),
        String::new(),
    ];

    lines.push("# Identity pool".into());
    lines.push(format!(
        "gcloud iam workload-identity-pools create {} --project={} --location=global --display-name={} --description=\"Workload identity pool created by Strato for {}\"",
        pool_id, project, pool_id, config.display_name
    ));
    lines.push(String::new());

    lines.push("# OIDC provider (key set read from the JSON file next to this script)".into());
    lines.push(format!(
        "gcloud iam workload-identity-pools providers create-oidc {} --project={} --location=global --workload-identity-pool={} --issuer-uri={} --jwk-json-path={} --allowed-audiences={} --attribute-mapping=google.subject=assertion.sub",
        config.provider.provider_id,
        project,
        pool_id,
        config.provider.issuer_url,
        JWKS_FILE_NAME,
        config.provider.allowed_audiences.join(",")
    ));
    lines.push(String::new());

    lines.push("# Service accounts".into());
    for account in &config.service_accounts {
        lines.push(format!(
            "gcloud iam service-accounts create {} --project={} --display-name={}",
            account.account_id, project, account.account_id
        ));
    }
    lines.push(String::new());

    lines.push("# Custom roles".into());
    let mut created_roles: Vec<&str> = Vec::new();
    for account in &config.service_accounts {
        push_role_creation(&mut lines, project, &account.roles, &mut created_roles);
    }
    lines.push(String::new());

    lines.push("# Role bindings".into());
    for account in &config.service_accounts {
        let member = format!(
            "serviceAccount:{}",
            service_account_email(&account.account_id, project)
        );
        for role in &account.roles {
            lines.push(format!(
                "gcloud projects add-iam-policy-binding {} --member={} --role={}",
                project,
                member,
                role.resource_id(project)
            ));
        }
    }
    lines.push(String::new());

    lines.push("# Access grants".into());
    for account in &config.service_accounts {
        let email = service_account_email(&account.account_id, project);
        match &account.access_method {
            AccessMethod::Impersonate => {
                if let Some(impersonator) = &account.impersonator_principal {
                    lines.push(format!(
                        "gcloud iam service-accounts add-iam-policy-binding {} --project={} --member={} --role={}",
                        email, project, impersonator, TOKEN_CREATOR_ROLE
                    ));
                }
            }
            AccessMethod::WorkloadIdentity => {
                if let Some(request) = &account.credential_request {
                    for name in &request.service_account_names {
                        let principal = federated_principal(
                            config.project_number,
                            pool_id,
                            &request.namespace,
                            name,
                        );
                        lines.push(format!(
                            "gcloud iam service-accounts add-iam-policy-binding {} --project={} --member=\"{}\" --role={}",
                            email, project, principal, WORKLOAD_IDENTITY_USER_ROLE
                        ));
                    }
                }
            }
            // Attached at the instance level; nothing to grant.
            AccessMethod::Vm => {}
            AccessMethod::Other(_) => {}
        }
    }
    lines.push(String::new());

    lines.push("# Support access".into());
    push_role_creation(&mut lines, project, &config.support.roles, &mut created_roles);
    for role in &config.support.roles {
        lines.push(format!(
            "gcloud projects add-iam-policy-binding {} --member={} --role={}",
            project,
            config.support.principal,
            role.resource_id(project)
        ));
    }

    lines.push(String::new());
    lines.join("\n")
}

fn push_role_creation<'a>(
    lines: &mut Vec<String>,
    project: &str,
    roles: &'a [RoleSpec],
    created: &mut Vec<&'a str>,
) {
    for role in roles {
        if role.predefined || created.contains(&role.role_id.as_str()) {
            continue;
        }
        created.push(role.role_id.as_str());
        lines.push(format!(
            "gcloud iam roles create {} --project={} --title={} --stage=GA --permissions={}",
            role.role_id,
            project,
            role.role_id,
            role.permissions.join(",")
        ));
        lines.push("# If the role already exists, append the permissions instead:".to_string());
        lines.push(format!(
            "#   gcloud iam roles update {} --project={} --add-permissions={}",
            role.role_id,
            project,
            role.permissions.join(",")
        ));
    }
}

/// The companion teardown script. Only service accounts and the pool are
/// reversed: the provider dies with the pool, and custom roles are left in
/// place because their deletion is a soft-delete that blocks re-creation
/// under the same id for days.
pub fn delete_script(config: &WifConfig) -> String {
    let project = &config.project_id;
    let mut lines: Vec<String> = vec![
        "#!/bin/sh".into(),
        format!(
            "# Workload identity federation teardown for {}",
            config.display_name
        ),
        String::new(),
    ];
    for account in &config.service_accounts {
        lines.push(format!(
            "gcloud iam service-accounts delete {} --project={} --quiet",
            service_account_email(&account.account_id, project),
            project
        ));
    }
    lines.push(format!(
        "gcloud iam workload-identity-pools delete {} --project={} --location=global --quiet",
        config.pool.pool_id, project
    ));
    lines.push(String::new());
    lines.join("\n")
}

/// Write the setup script and the JWKS document into `target_dir` with
/// owner-only permissions.
pub fn write_setup(target_dir: &Path, config: &WifConfig) -> Result<()> {
    if !target_dir.is_dir() {
        anyhow::bail!(
            "target directory '{}' does not exist or is not a directory",
            target_dir.display()
        );
    }

    let jwks_path = target_dir.join(JWKS_FILE_NAME);
    fs::write(&jwks_path, &config.provider.jwks)
        .with_context(|| format!("failed to write {}", jwks_path.display()))?;
    set_mode(&jwks_path, 0o600)?;

    let script_path = target_dir.join(SETUP_SCRIPT_NAME);
    fs::write(&script_path, setup_script(config))
        .with_context(|| format!("failed to write {}", script_path.display()))?;
    set_mode(&script_path, 0o700)?;

    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
