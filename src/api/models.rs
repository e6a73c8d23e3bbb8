//! Shared request/response types for the Strato Cluster Manager API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub state: String,
    pub cloud_provider: String,
    pub region: String,
    pub version: String,
    pub managed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MachinePool {
    pub id: String,
    pub instance_type: String,
    pub replicas: u32,
    pub availability_zones: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClusterUser {
    pub id: String,
    pub username: String,
    pub group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CloudProviderInfo {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VersionInfo {
    pub id: String,
    pub raw_id: String,
    pub enabled: bool,
    #[serde(rename = "default")]
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QuotaCost {
    pub quota_id: String,
    pub allowed: u64,
    pub consumed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub email: String,
    pub organization: String,
}

/// One page of a paginated list response.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total: u32,
}

/// How a workload obtains credentials for a provisioned service account.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AccessMethod {
    /// A named principal impersonates the service account directly.
    Impersonate,
    /// Kubernetes workloads exchange OIDC tokens through the identity pool.
    WorkloadIdentity,
    /// Access comes from instance-level attachment; nothing to grant here.
    #[default]
    Vm,
    /// Unknown methods from newer control planes; logged and skipped.
    Other(String),
}

impl From<String> for AccessMethod {
    fn from(value: String) -> Self {
        match value.as_str() {
            "impersonate" => AccessMethod::Impersonate,
            "workload_identity" => AccessMethod::WorkloadIdentity,
            "vm" => AccessMethod::Vm,
            _ => AccessMethod::Other(value),
        }
    }
}

impl From<AccessMethod> for String {
    fn from(value: AccessMethod) -> Self {
        match value {
            AccessMethod::Impersonate => "impersonate".to_string(),
            AccessMethod::WorkloadIdentity => "workload_identity".to_string(),
            AccessMethod::Vm => "vm".to_string(),
            AccessMethod::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RoleSpec {
    pub role_id: String,
    pub predefined: bool,
    /// Only meaningful for custom roles (`predefined == false`).
    pub permissions: Vec<String>,
}

impl RoleSpec {
    /// The IAM resource id this role binds as: `roles/{id}` for predefined
    /// roles, `projects/{project}/roles/{id}` for project-owned custom ones.
    pub fn resource_id(&self, project: &str) -> String {
        if self.predefined {
            format!("roles/{}", self.role_id)
        } else {
            crate::gcp::custom_role_resource(project, &self.role_id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CredentialRequest {
    pub namespace: String,
    pub service_account_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceAccountSpec {
    pub account_id: String,
    pub roles: Vec<RoleSpec>,
    pub access_method: AccessMethod,
    /// Only meaningful when `access_method == WorkloadIdentity`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_request: Option<CredentialRequest>,
    /// Only meaningful when `access_method == Impersonate`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonator_principal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SupportSpec {
    /// Full IAM member string, e.g. `group:cloud-support@stratocloud.io`.
    pub principal: String,
    pub roles: Vec<RoleSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WifPool {
    pub pool_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WifProviderSpec {
    pub provider_id: String,
    pub issuer_url: String,
    /// Raw JWKS document; compared structurally, never byte-for-byte.
    pub jwks: String,
    pub allowed_audiences: Vec<String>,
}

/// The federation configuration resource owned by the control plane. The
/// CLI reads it and converges cloud-side state to match; the resource itself
/// is created and deleted through the control plane API only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WifConfig {
    pub id: String,
    pub display_name: String,
    pub project_id: String,
    pub project_number: u64,
    pub pool: WifPool,
    pub provider: WifProviderSpec,
    pub service_accounts: Vec<ServiceAccountSpec>,
    pub support: SupportSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WifStatus {
    pub configured: bool,
    pub description: String,
}
