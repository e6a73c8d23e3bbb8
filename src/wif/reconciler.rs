//! Converges Google Cloud identity resources to match one [`WifConfig`].
//!
//! Every `ensure_*` operation is idempotent and safe to re-run: each step
//! checks whether cloud state already matches the desired state before
//! writing, so a failed run can simply be repeated and completed work is
//! skipped. Network-dependent steps run inside the bounded retry loop from
//! [`super::retry`] to ride out the backend's eventual-consistency window.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use crate::api::models::{AccessMethod, RoleSpec, ServiceAccountSpec, WifConfig};
use crate::gcp::{
    self, jwks_equal, CloudIdentity, GcpError, OidcConfig, Pool, Provider, ResourceState, Role,
    RoleStage,
};
use super::retry::{retry_with_backoff, Attempt};

pub const TOKEN_CREATOR_ROLE: &str = "roles/iam.serviceAccountTokenCreator";
pub const WORKLOAD_IDENTITY_USER_ROLE: &str = "roles/iam.workloadIdentityUser";

/// Subject mapping applied to every provider this engine creates.
const ATTRIBUTE_MAPPING: (&str, &str) = ("google.subject", "assertion.sub");

const DEFAULT_RETRY_BUDGET: Duration = Duration::from_secs(300);
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// The federated principal a Kubernetes service account maps to through the
/// workload identity pool.
pub fn federated_principal(
    project_number: u64,
    pool_id: &str,
    namespace: &str,
    service_account_name: &str,
) -> String {
    format!(
        "principal://iam.googleapis.com/projects/{}/locations/global/workloadIdentityPools/{}/subject/system:serviceaccount:{}:{}",
        project_number, pool_id, namespace, service_account_name
    )
}

pub struct WifReconciler<'a> {
    gcp: &'a dyn CloudIdentity,
    config: &'a WifConfig,
    retry_budget: Duration,
    retry_interval: Duration,
}

impl<'a> WifReconciler<'a> {
    pub fn new(gcp: &'a dyn CloudIdentity, config: &'a WifConfig) -> Self {
        Self {
            gcp,
            config,
            retry_budget: DEFAULT_RETRY_BUDGET,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Override the retry policy. Tests shrink it to milliseconds.
    pub fn with_retry(mut self, budget: Duration, interval: Duration) -> Self {
        self.retry_budget = budget;
        self.retry_interval = interval;
        self
    }

    async fn retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Attempt<T>>,
    {
        retry_with_backoff(self.retry_budget, self.retry_interval, op).await
    }

    /// Make sure the workload identity pool exists, is not soft-deleted and
    /// is enabled.
    pub async fn ensure_workload_identity_pool(&self) -> Result<()> {
        let name = gcp::pool_resource(&self.config.project_id, &self.config.pool.pool_id);
        match self.gcp.get_pool(&name).await {
            Ok(pool) => {
                if pool.state == ResourceState::Deleted {
                    info!(pool = %name, "workload identity pool is soft-deleted, undeleting");
                    self.retry(|| async { self.gcp.undelete_pool(&name).await.into() })
                        .await
                        .context("failed to undelete workload identity pool")?;
                } else if pool.disabled {
                    info!(pool = %name, "workload identity pool is disabled, enabling");
                    self.retry(|| async { self.gcp.enable_pool(&name).await.into() })
                        .await
                        .context("failed to enable workload identity pool")?;
                }
            }
            Err(GcpError::NotFound(_)) => {
                info!(pool = %name, "creating workload identity pool");
                let pool = Pool {
                    name: name.clone(),
                    display_name: self.config.pool.pool_id.clone(),
                    description: format!(
                        "Workload identity pool created by Strato for {}",
                        self.config.display_name
                    ),
                    state: ResourceState::Active,
                    disabled: false,
                };
                self.retry(|| async {
                    self.gcp
                        .create_pool(&self.config.project_id, &self.config.pool.pool_id, &pool)
                        .await
                        .into()
                })
                .await
                .context("failed to create workload identity pool")?;
            }
            Err(e) => {
                return Err(e).context("failed to look up workload identity pool");
            }
        }
        Ok(())
    }

    /// Make sure the OIDC provider exists and matches the desired issuer,
    /// JWKS, audiences and attribute mapping. An update is only issued when
    /// a field actually differs, to avoid needless API churn.
    pub async fn ensure_workload_identity_provider(&self) -> Result<()> {
        let pool_name = gcp::pool_resource(&self.config.project_id, &self.config.pool.pool_id);
        let name = gcp::provider_resource(
            &self.config.project_id,
            &self.config.pool.pool_id,
            &self.config.provider.provider_id,
        );
        let desired = self.desired_provider(&name);

        match self.gcp.get_provider(&name).await {
            Ok(existing) => {
                if provider_differs(&existing, &desired) {
                    info!(provider = %name, "workload identity provider drifted, updating");
                    self.retry(|| async { self.gcp.update_provider(&desired).await.into() })
                        .await
                        .context("failed to update workload identity provider")?;
                }
            }
            Err(GcpError::NotFound(_)) => {
                info!(provider = %name, "creating workload identity provider");
                self.retry(|| async {
                    match self
                        .gcp
                        .create_provider(&pool_name, &self.config.provider.provider_id, &desired)
                        .await
                    {
                        Ok(()) => Attempt::Ready(()),
                        // Two providers must never coexist for one pool, so a
                        // conflict here is a real failure, not reuse.
                        Err(e @ GcpError::AlreadyExists(_)) => Attempt::Abort(e.into()),
                        Err(e) => Attempt::Retry(e.into()),
                    }
                })
                .await
                .context("failed to create workload identity provider")?;
            }
            Err(e) => {
                return Err(e).context("failed to look up workload identity provider");
            }
        }
        Ok(())
    }

    fn desired_provider(&self, name: &str) -> Provider {
        let spec = &self.config.provider;
        Provider {
            name: name.to_string(),
            display_name: spec.provider_id.clone(),
            description: format!(
                "Workload identity provider created by Strato for {}",
                self.config.display_name
            ),
            state: ResourceState::Active,
            disabled: false,
            oidc: OidcConfig {
                issuer_uri: spec.issuer_url.clone(),
                jwks_json: spec.jwks.clone(),
                allowed_audiences: spec.allowed_audiences.clone(),
            },
            attribute_mapping: [ATTRIBUTE_MAPPING]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Provision every declared service account: the account itself, its
    /// custom roles, its project-policy bindings and its access grant.
    ///
    /// Accounts are processed sequentially; the first account that fails
    /// aborts the run with context naming it. Prior accounts keep whatever
    /// was already applied, and a re-run skips completed work.
    pub async fn ensure_service_accounts(&self) -> Result<()> {
        for spec in &self.config.service_accounts {
            self.ensure_service_account(spec)
                .await
                .with_context(|| {
                    format!("failed to reconcile service account '{}'", spec.account_id)
                })?;
        }
        Ok(())
    }

    async fn ensure_service_account(&self, spec: &ServiceAccountSpec) -> Result<()> {
        let project = &self.config.project_id;
        let email = gcp::service_account_email(&spec.account_id, project);

        let account = match self.gcp.get_service_account(project, &email).await {
            Ok(existing) => existing,
            Err(GcpError::NotFound(_)) => {
                info!(account = %email, "creating service account");
                self.retry(|| async {
                    match self
                        .gcp
                        .create_service_account(
                            project,
                            &spec.account_id,
                            &spec.account_id,
                            &format!(
                                "Service account created by Strato for {}",
                                self.config.display_name
                            ),
                        )
                        .await
                    {
                        Ok(account) => Attempt::Ready(account),
                        // Lost a creation race: fetch and reuse the winner.
                        Err(GcpError::AlreadyExists(_)) => {
                            match self.gcp.get_service_account(project, &email).await {
                                Ok(account) => Attempt::Ready(account),
                                Err(e) => Attempt::Retry(e.into()),
                            }
                        }
                        Err(e) => Attempt::Retry(e.into()),
                    }
                })
                .await
                .context("failed to create service account")?
            }
            Err(e) => {
                return Err(e).context("failed to look up service account");
            }
        };

        if account.disabled {
            info!(account = %email, "service account is disabled, enabling");
            self.retry(|| async { self.gcp.enable_service_account(project, &email).await.into() })
                .await
                .context("failed to enable service account")?;
        }

        self.ensure_roles(&spec.roles).await?;

        let member = format!("serviceAccount:{}", email);
        self.bind_project_roles(&member, &spec.roles)
            .await
            .context("failed to bind roles on the project policy")?;

        match &spec.access_method {
            AccessMethod::Impersonate => self.grant_impersonation(spec, &email).await?,
            AccessMethod::WorkloadIdentity => self.grant_workload_identity(spec, &email).await?,
            // Granted through instance attachment, outside this engine.
            AccessMethod::Vm => {}
            AccessMethod::Other(other) => {
                warn!(
                    account = %spec.account_id,
                    access_method = %other,
                    "unknown access method, skipping access grant"
                );
            }
        }

        Ok(())
    }

    /// Reconcile the support principal's roles and project bindings, using
    /// the same machinery as service accounts but with the member string
    /// stored on the configuration (a group principal).
    pub async fn grant_support_access(&self) -> Result<()> {
        let support = &self.config.support;
        if support.principal.is_empty() {
            anyhow::bail!("federation configuration has no support principal");
        }
        self.ensure_roles(&support.roles)
            .await
            .context("failed to reconcile support roles")?;
        self.bind_project_roles(&support.principal, &support.roles)
            .await
            .context("failed to bind support roles on the project policy")
    }

    /// Reconcile the custom roles referenced by `roles`. Predefined roles
    /// are assumed correct and skipped.
    async fn ensure_roles(&self, roles: &[RoleSpec]) -> Result<()> {
        for role in roles {
            if role.predefined {
                continue;
            }
            self.ensure_custom_role(role)
                .await
                .with_context(|| format!("failed to reconcile custom role '{}'", role.role_id))?;
        }
        Ok(())
    }

    async fn ensure_custom_role(&self, spec: &RoleSpec) -> Result<()> {
        let project = &self.config.project_id;
        let name = gcp::custom_role_resource(project, &spec.role_id);

        let mut existing = match self.gcp.get_role(&name).await {
            Ok(role) => role,
            Err(GcpError::NotFound(_)) => {
                info!(role = %name, "creating custom role");
                let role = Role {
                    name: name.clone(),
                    title: spec.role_id.clone(),
                    description: format!(
                        "Custom role created by Strato for {}",
                        self.config.display_name
                    ),
                    included_permissions: spec.permissions.clone(),
                    stage: RoleStage::Ga,
                    deleted: false,
                };
                return self
                    .retry(|| async {
                        self.gcp.create_role(project, &spec.role_id, &role).await.into()
                    })
                    .await
                    .context("failed to create custom role");
            }
            Err(e) => {
                return Err(e).context("failed to look up custom role");
            }
        };

        if existing.deleted {
            info!(role = %name, "custom role is soft-deleted, undeleting");
            self.retry(|| async { self.gcp.undelete_role(&name).await.into() })
                .await
                .context("failed to undelete custom role")?;
            existing.deleted = false;
        }

        let mut needs_update = false;
        if existing.stage == RoleStage::Disabled {
            existing.stage = RoleStage::Ga;
            needs_update = true;
        }

        // Permissions only ever grow: anything added out-of-band stays, and
        // shrinking is left to manual administrative action.
        let missing: Vec<String> = spec
            .permissions
            .iter()
            .filter(|p| !existing.included_permissions.contains(p))
            .cloned()
            .collect();
        if !missing.is_empty() {
            existing.included_permissions.extend(missing);
            needs_update = true;
        }

        if needs_update {
            info!(role = %name, "updating custom role");
            self.retry(|| async { self.gcp.update_role(&name, &existing).await.into() })
                .await
                .context("failed to update custom role")?;
        }

        Ok(())
    }

    /// Add `member` to the project policy for every declared role, then
    /// write the policy back once if and only if anything changed. Batching
    /// the write keeps the read-modify-write window small.
    async fn bind_project_roles(&self, member: &str, roles: &[RoleSpec]) -> Result<()> {
        if roles.is_empty() {
            return Ok(());
        }
        let project = &self.config.project_id;
        let mut policy = self
            .retry(|| async { self.gcp.get_project_policy(project).await.into() })
            .await
            .context("failed to fetch the project IAM policy")?;

        let mut changed = false;
        for role in roles {
            changed |= policy.grant(&role.resource_id(project), member);
        }

        if changed {
            info!(member = %member, project = %project, "updating project IAM policy");
            self.retry(|| async { self.gcp.set_project_policy(project, &policy).await.into() })
                .await
                .context("failed to write the project IAM policy")?;
        }
        Ok(())
    }

    /// Grant the configured impersonator `roles/iam.serviceAccountTokenCreator`
    /// on the service account's own access policy.
    async fn grant_impersonation(&self, spec: &ServiceAccountSpec, email: &str) -> Result<()> {
        let impersonator = spec.impersonator_principal.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "service account '{}' uses the impersonate access method but has no impersonator principal",
                spec.account_id
            )
        })?;

        let project = &self.config.project_id;
        let mut policy = self
            .retry(|| async {
                self.gcp.get_service_account_policy(project, email).await.into()
            })
            .await
            .context("failed to fetch the service account IAM policy")?;

        if policy.grant(TOKEN_CREATOR_ROLE, impersonator) {
            info!(account = %email, impersonator = %impersonator, "granting impersonation access");
            self.retry(|| async {
                self.gcp
                    .set_service_account_policy(project, email, &policy)
                    .await
                    .into()
            })
            .await
            .context("failed to write the service account IAM policy")?;
        }
        Ok(())
    }

    /// Grant every declared Kubernetes service account a federated-principal
    /// binding to `roles/iam.workloadIdentityUser` on the account's own
    /// access policy.
    async fn grant_workload_identity(&self, spec: &ServiceAccountSpec, email: &str) -> Result<()> {
        let request = spec.credential_request.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "service account '{}' uses the workload identity access method but has no credential request",
                spec.account_id
            )
        })?;

        let project = &self.config.project_id;
        let mut policy = self
            .retry(|| async {
                self.gcp.get_service_account_policy(project, email).await.into()
            })
            .await
            .context("failed to fetch the service account IAM policy")?;

        let mut changed = false;
        for name in &request.service_account_names {
            let principal = federated_principal(
                self.config.project_number,
                &self.config.pool.pool_id,
                &request.namespace,
                name,
            );
            changed |= policy.grant(WORKLOAD_IDENTITY_USER_ROLE, &principal);
        }

        if changed {
            info!(account = %email, "granting workload identity federation access");
            self.retry(|| async {
                self.gcp
                    .set_service_account_policy(project, email, &policy)
                    .await
                    .into()
            })
            .await
            .context("failed to write the service account IAM policy")?;
        }
        Ok(())
    }
}

/// Field-by-field drift check between the fetched provider and the desired
/// one. JWKS documents are compared structurally so backend re-serialization
/// does not read as drift.
fn provider_differs(existing: &Provider, desired: &Provider) -> bool {
    existing.display_name != desired.display_name
        || existing.description != desired.description
        || existing.state != desired.state
        || existing.disabled != desired.disabled
        || existing.oidc.issuer_uri != desired.oidc.issuer_uri
        || existing.oidc.allowed_audiences != desired.oidc.allowed_audiences
        || existing.attribute_mapping != desired.attribute_mapping
        || !jwks_equal(&existing.oidc.jwks_json, &desired.oidc.jwks_json)
}
