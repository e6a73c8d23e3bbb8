//! Client-side interface to the Google Cloud identity backend.
//!
//! The reconciliation engine only ever talks to the [`CloudIdentity`] trait,
//! so tests can drive it against an in-memory fake while the CLI wires in the
//! REST implementation from [`rest`].

pub mod rest;
pub mod types;

pub use types::{
    jwks_equal, Binding, JwkSet, OidcConfig, Policy, Pool, Provider, ResourceState, Role,
    RoleStage, ServiceAccount,
};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GcpError {
    #[error("{0} was not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("GCP API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response payload: {0}")]
    Json(#[from] serde_json::Error),
}

pub type GcpResult<T> = std::result::Result<T, GcpError>;

/// The capability set the reconciler needs from the cloud IAM backend.
///
/// `get_*` calls distinguish [`GcpError::NotFound`] from other failures;
/// creation calls distinguish [`GcpError::AlreadyExists`]. Everything is
/// assumed at-least-once and eventually consistent, which is why callers wrap
/// these in the retry loop from `wif::retry`.
#[async_trait]
pub trait CloudIdentity: Send + Sync {
    async fn get_pool(&self, name: &str) -> GcpResult<Pool>;
    async fn create_pool(&self, project: &str, pool_id: &str, pool: &Pool) -> GcpResult<()>;
    async fn undelete_pool(&self, name: &str) -> GcpResult<()>;
    async fn enable_pool(&self, name: &str) -> GcpResult<()>;
    async fn delete_pool(&self, name: &str) -> GcpResult<()>;

    async fn get_provider(&self, name: &str) -> GcpResult<Provider>;
    async fn create_provider(
        &self,
        pool_name: &str,
        provider_id: &str,
        provider: &Provider,
    ) -> GcpResult<()>;
    async fn update_provider(&self, provider: &Provider) -> GcpResult<()>;

    async fn create_service_account(
        &self,
        project: &str,
        account_id: &str,
        display_name: &str,
        description: &str,
    ) -> GcpResult<ServiceAccount>;
    async fn get_service_account(&self, project: &str, email: &str) -> GcpResult<ServiceAccount>;
    async fn enable_service_account(&self, project: &str, email: &str) -> GcpResult<()>;
    async fn delete_service_account(&self, project: &str, email: &str) -> GcpResult<()>;

    async fn get_role(&self, name: &str) -> GcpResult<Role>;
    async fn create_role(&self, project: &str, role_id: &str, role: &Role) -> GcpResult<()>;
    async fn update_role(&self, name: &str, role: &Role) -> GcpResult<()>;
    async fn undelete_role(&self, name: &str) -> GcpResult<()>;

    async fn get_project_policy(&self, project: &str) -> GcpResult<Policy>;
    async fn set_project_policy(&self, project: &str, policy: &Policy) -> GcpResult<()>;
    async fn get_service_account_policy(&self, project: &str, email: &str) -> GcpResult<Policy>;
    async fn set_service_account_policy(
        &self,
        project: &str,
        email: &str,
        policy: &Policy,
    ) -> GcpResult<()>;

    /// Resolve a project id to its numeric project number, needed to build
    /// workload identity principal strings.
    async fn project_number(&self, project_id: &str) -> GcpResult<u64>;
}

pub fn pool_resource(project: &str, pool_id: &str) -> String {
    format!(
        "projects/{}/locations/global/workloadIdentityPools/{}",
        project, pool_id
    )
}

pub fn provider_resource(project: &str, pool_id: &str, provider_id: &str) -> String {
    format!("{}/providers/{}", pool_resource(project, pool_id), provider_id)
}

pub fn custom_role_resource(project: &str, role_id: &str) -> String {
    format!("projects/{}/roles/{}", project, role_id)
}

pub fn service_account_email(account_id: &str, project: &str) -> String {
    format!("{}@{}.iam.gserviceaccount.com", account_id, project)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_names() {
        assert_eq!(
            pool_resource("my-proj", "my-pool"),
            "projects/my-proj/locations/global/workloadIdentityPools/my-pool"
        );
        assert_eq!(
            provider_resource("my-proj", "my-pool", "oidc"),
            "projects/my-proj/locations/global/workloadIdentityPools/my-pool/providers/oidc"
        );
        assert_eq!(custom_role_resource("my-proj", "reader"), "projects/my-proj/roles/reader");
    }

    #[test]
    fn derived_service_account_email() {
        assert_eq!(
            service_account_email("sa-1", "my-proj"),
            "sa-1@my-proj.iam.gserviceaccount.com"
        );
    }
}
