//! Shared test support: an in-memory [`CloudIdentity`] backend that records
//! every mutating call, plus builders for federation configurations.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use strato_cli::api::models::{
    AccessMethod, CredentialRequest, RoleSpec, ServiceAccountSpec, SupportSpec, WifConfig,
    WifPool, WifProviderSpec,
};
use strato_cli::gcp::{
    self, CloudIdentity, GcpError, GcpResult, Policy, Pool, Provider, ResourceState, Role,
    ServiceAccount,
};

pub const JWKS: &str = r#"{"keys":[{"kty":"RSA","kid":"k1","n":"sXchQ","e":"AQAB"}]}"#;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FakeState {
    pub pools: BTreeMap<String, Pool>,
    pub providers: BTreeMap<String, Provider>,
    pub service_accounts: BTreeMap<String, ServiceAccount>,
    pub roles: BTreeMap<String, Role>,
    pub project_policies: BTreeMap<String, Policy>,
    pub account_policies: BTreeMap<String, Policy>,
    pub project_numbers: BTreeMap<String, u64>,
}

/// In-memory cloud backend. Every call that changes state appends an entry
/// to `mutations`, so tests can assert idempotence as "no further mutating
/// calls" rather than just "same end state".
#[derive(Default)]
pub struct FakeCloudIdentity {
    state: Mutex<FakeState>,
    mutations: Mutex<Vec<String>>,
}

impl FakeCloudIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FakeState {
        self.state.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.lock().unwrap().len()
    }

    fn record(&self, call: String) {
        self.mutations.lock().unwrap().push(call);
    }

    pub fn seed_pool(&self, pool: Pool) {
        let mut state = self.state.lock().unwrap();
        state.pools.insert(pool.name.clone(), pool);
    }

    pub fn seed_provider(&self, provider: Provider) {
        let mut state = self.state.lock().unwrap();
        state.providers.insert(provider.name.clone(), provider);
    }

    pub fn seed_service_account(&self, account: ServiceAccount) {
        let mut state = self.state.lock().unwrap();
        state.service_accounts.insert(account.email.clone(), account);
    }

    pub fn seed_role(&self, role: Role) {
        let mut state = self.state.lock().unwrap();
        state.roles.insert(role.name.clone(), role);
    }
}

#[async_trait]
impl CloudIdentity for FakeCloudIdentity {
    async fn get_pool(&self, name: &str) -> GcpResult<Pool> {
        self.state
            .lock()
            .unwrap()
            .pools
            .get(name)
            .cloned()
            .ok_or_else(|| GcpError::NotFound("workload identity pool".into()))
    }

    async fn create_pool(&self, _project: &str, _pool_id: &str, pool: &Pool) -> GcpResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.pools.contains_key(&pool.name) {
            return Err(GcpError::AlreadyExists("workload identity pool".into()));
        }
        state.pools.insert(pool.name.clone(), pool.clone());
        drop(state);
        self.record(format!("create_pool {}", pool.name));
        Ok(())
    }

    async fn undelete_pool(&self, name: &str) -> GcpResult<()> {
        let mut state = self.state.lock().unwrap();
        let pool = state
            .pools
            .get_mut(name)
            .ok_or_else(|| GcpError::NotFound("workload identity pool".into()))?;
        pool.state = ResourceState::Active;
        drop(state);
        self.record(format!("undelete_pool {}", name));
        Ok(())
    }

    async fn enable_pool(&self, name: &str) -> GcpResult<()> {
        let mut state = self.state.lock().unwrap();
        let pool = state
            .pools
            .get_mut(name)
            .ok_or_else(|| GcpError::NotFound("workload identity pool".into()))?;
        pool.disabled = false;
        drop(state);
        self.record(format!("enable_pool {}", name));
        Ok(())
    }

    async fn delete_pool(&self, name: &str) -> GcpResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .pools
            .remove(name)
            .ok_or_else(|| GcpError::NotFound("workload identity pool".into()))?;
        drop(state);
        self.record(format!("delete_pool {}", name));
        Ok(())
    }

    async fn get_provider(&self, name: &str) -> GcpResult<Provider> {
        self.state
            .lock()
            .unwrap()
            .providers
            .get(name)
            .cloned()
            .ok_or_else(|| GcpError::NotFound("workload identity provider".into()))
    }

    async fn create_provider(
        &self,
        _pool_name: &str,
        _provider_id: &str,
        provider: &Provider,
    ) -> GcpResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.providers.contains_key(&provider.name) {
            return Err(GcpError::AlreadyExists("workload identity provider".into()));
        }
        state.providers.insert(provider.name.clone(), provider.clone());
        drop(state);
        self.record(format!("create_provider {}", provider.name));
        Ok(())
    }

    async fn update_provider(&self, provider: &Provider) -> GcpResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.providers.contains_key(&provider.name) {
            return Err(GcpError::NotFound("workload identity provider".into()));
        }
        state.providers.insert(provider.name.clone(), provider.clone());
        drop(state);
        self.record(format!("update_provider {}", provider.name));
        Ok(())
    }

    async fn create_service_account(
        &self,
        project: &str,
        account_id: &str,
        display_name: &str,
        description: &str,
    ) -> GcpResult<ServiceAccount> {
        let email = gcp::service_account_email(account_id, project);
        let mut state = self.state.lock().unwrap();
        if state.service_accounts.contains_key(&email) {
            return Err(GcpError::AlreadyExists("service account".into()));
        }
        let account = ServiceAccount {
            name: format!("projects/{}/serviceAccounts/{}", project, email),
            email: email.clone(),
            display_name: display_name.to_string(),
            description: description.to_string(),
            disabled: false,
        };
        state.service_accounts.insert(email.clone(), account.clone());
        drop(state);
        self.record(format!("create_service_account {}", email));
        Ok(account)
    }

    async fn get_service_account(&self, _project: &str, email: &str) -> GcpResult<ServiceAccount> {
        self.state
            .lock()
            .unwrap()
            .service_accounts
            .get(email)
            .cloned()
            .ok_or_else(|| GcpError::NotFound("service account".into()))
    }

    async fn enable_service_account(&self, _project: &str, email: &str) -> GcpResult<()> {
        let mut state = self.state.lock().unwrap();
        let account = state
            .service_accounts
            .get_mut(email)
            .ok_or_else(|| GcpError::NotFound("service account".into()))?;
        account.disabled = false;
        drop(state);
        self.record(format!("enable_service_account {}", email));
        Ok(())
    }

    async fn delete_service_account(&self, _project: &str, email: &str) -> GcpResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .service_accounts
            .remove(email)
            .ok_or_else(|| GcpError::NotFound("service account".into()))?;
        drop(state);
        self.record(format!("delete_service_account {}", email));
        Ok(())
    }

    async fn get_role(&self, name: &str) -> GcpResult<Role> {
        self.state
            .lock()
            .unwrap()
            .roles
            .get(name)
            .cloned()
            .ok_or_else(|| GcpError::NotFound("role".into()))
    }

    async fn create_role(&self, _project: &str, _role_id: &str, role: &Role) -> GcpResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.roles.contains_key(&role.name) {
            return Err(GcpError::AlreadyExists("role".into()));
        }
        state.roles.insert(role.name.clone(), role.clone());
        drop(state);
        self.record(format!("create_role {}", role.name));
        Ok(())
    }

    async fn update_role(&self, name: &str, role: &Role) -> GcpResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.roles.contains_key(name) {
            return Err(GcpError::NotFound("role".into()));
        }
        state.roles.insert(name.to_string(), role.clone());
        drop(state);
        self.record(format!("update_role {}", name));
        Ok(())
    }

    async fn undelete_role(&self, name: &str) -> GcpResult<()> {
        let mut state = self.state.lock().unwrap();
        let role = state
            .roles
            .get_mut(name)
            .ok_or_else(|| GcpError::NotFound("role".into()))?;
        role.deleted = false;
        drop(state);
        self.record(format!("undelete_role {}", name));
        Ok(())
    }

    async fn get_project_policy(&self, project: &str) -> GcpResult<Policy> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .project_policies
            .get(project)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_project_policy(&self, project: &str, policy: &Policy) -> GcpResult<()> {
        self.state
            .lock()
            .unwrap()
            .project_policies
            .insert(project.to_string(), policy.clone());
        self.record(format!("set_project_policy {}", project));
        Ok(())
    }

    async fn get_service_account_policy(&self, _project: &str, email: &str) -> GcpResult<Policy> {
        let state = self.state.lock().unwrap();
        if !state.service_accounts.contains_key(email) {
            return Err(GcpError::NotFound("service account".into()));
        }
        Ok(state.account_policies.get(email).cloned().unwrap_or_default())
    }

    async fn set_service_account_policy(
        &self,
        _project: &str,
        email: &str,
        policy: &Policy,
    ) -> GcpResult<()> {
        self.state
            .lock()
            .unwrap()
            .account_policies
            .insert(email.to_string(), policy.clone());
        self.record(format!("set_service_account_policy {}", email));
        Ok(())
    }

    async fn project_number(&self, project_id: &str) -> GcpResult<u64> {
        self.state
            .lock()
            .unwrap()
            .project_numbers
            .get(project_id)
            .copied()
            .ok_or_else(|| GcpError::NotFound("project".into()))
    }
}

// --- configuration builders ---

pub fn base_config() -> WifConfig {
    WifConfig {
        id: "wif-1".to_string(),
        display_name: "demo".to_string(),
        project_id: "my-proj".to_string(),
        project_number: 1234,
        pool: WifPool {
            pool_id: "my-pool".to_string(),
        },
        provider: WifProviderSpec {
            provider_id: "oidc".to_string(),
            issuer_url: "https://issuer.example.com".to_string(),
            jwks: JWKS.to_string(),
            allowed_audiences: vec!["strato".to_string()],
        },
        service_accounts: Vec::new(),
        support: SupportSpec {
            principal: "group:cloud-support@stratocloud.io".to_string(),
            roles: vec![custom_role("strato_support", &["resourcemanager.projects.get"])],
        },
    }
}

pub fn custom_role(role_id: &str, permissions: &[&str]) -> RoleSpec {
    RoleSpec {
        role_id: role_id.to_string(),
        predefined: false,
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
    }
}

pub fn predefined_role(role_id: &str) -> RoleSpec {
    RoleSpec {
        role_id: role_id.to_string(),
        predefined: true,
        permissions: Vec::new(),
    }
}

pub fn workload_identity_account(account_id: &str, ksa_names: &[&str]) -> ServiceAccountSpec {
    ServiceAccountSpec {
        account_id: account_id.to_string(),
        roles: vec![custom_role("strato_worker", &["compute.instances.get"])],
        access_method: AccessMethod::WorkloadIdentity,
        credential_request: Some(CredentialRequest {
            namespace: "ns1".to_string(),
            service_account_names: ksa_names.iter().map(|n| n.to_string()).collect(),
        }),
        impersonator_principal: None,
    }
}

pub fn impersonate_account(account_id: &str, impersonator: &str) -> ServiceAccountSpec {
    ServiceAccountSpec {
        account_id: account_id.to_string(),
        roles: vec![predefined_role("compute.viewer")],
        access_method: AccessMethod::Impersonate,
        credential_request: None,
        impersonator_principal: Some(impersonator.to_string()),
    }
}

pub fn vm_account(account_id: &str) -> ServiceAccountSpec {
    ServiceAccountSpec {
        account_id: account_id.to_string(),
        roles: Vec::new(),
        access_method: AccessMethod::Vm,
        credential_request: None,
        impersonator_principal: None,
    }
}
