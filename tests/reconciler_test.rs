mod common;

use std::time::Duration;

use common::{
    base_config, custom_role, impersonate_account, predefined_role, vm_account,
    workload_identity_account, FakeCloudIdentity, JWKS,
};
use strato_cli::api::models::{AccessMethod, ServiceAccountSpec, WifConfig};
use strato_cli::gcp::{
    self, OidcConfig, Pool, Provider, ResourceState, Role, RoleStage, ServiceAccount,
};
use strato_cli::wif::reconciler::{
    federated_principal, TOKEN_CREATOR_ROLE, WORKLOAD_IDENTITY_USER_ROLE,
};
use strato_cli::wif::WifReconciler;

fn reconciler<'a>(cloud: &'a FakeCloudIdentity, config: &'a WifConfig) -> WifReconciler<'a> {
    // Shrink the retry policy so failure paths do not stall the test run.
    WifReconciler::new(cloud, config).with_retry(Duration::from_millis(40), Duration::from_millis(1))
}

async fn reconcile_everything(cloud: &FakeCloudIdentity, config: &WifConfig) {
    let engine = reconciler(cloud, config);
    engine.ensure_workload_identity_pool().await.unwrap();
    engine.ensure_workload_identity_provider().await.unwrap();
    engine.ensure_service_accounts().await.unwrap();
    engine.grant_support_access().await.unwrap();
}

#[tokio::test]
async fn provisions_everything_on_an_empty_backend() {
    let cloud = FakeCloudIdentity::new();
    let mut config = base_config();
    config.service_accounts = vec![workload_identity_account("sa-1", &["ksa1"])];

    let engine = reconciler(&cloud, &config);
    engine.ensure_workload_identity_pool().await.unwrap();
    engine.ensure_workload_identity_provider().await.unwrap();
    engine.ensure_service_accounts().await.unwrap();

    let state = cloud.state();

    let pool_name = gcp::pool_resource("my-proj", "my-pool");
    let pool = state.pools.get(&pool_name).expect("pool exists");
    assert_eq!(pool.state, ResourceState::Active);
    assert!(!pool.disabled);

    let provider_name = gcp::provider_resource("my-proj", "my-pool", "oidc");
    let provider = state.providers.get(&provider_name).expect("provider exists");
    assert_eq!(provider.oidc.issuer_uri, "https://issuer.example.com");
    assert_eq!(provider.oidc.jwks_json, JWKS);
    assert_eq!(
        provider.attribute_mapping.get("google.subject").map(String::as_str),
        Some("assertion.sub")
    );

    let email = gcp::service_account_email("sa-1", "my-proj");
    assert!(state.service_accounts.contains_key(&email));

    let policy = state.account_policies.get(&email).expect("account policy exists");
    let expected = "principal://iam.googleapis.com/projects/1234/locations/global/workloadIdentityPools/my-pool/subject/system:serviceaccount:ns1:ksa1";
    assert!(
        policy.has_member(WORKLOAD_IDENTITY_USER_ROLE, expected),
        "missing federated principal binding: {:?}",
        policy
    );
}

#[tokio::test]
async fn second_run_issues_no_further_mutations() {
    let cloud = FakeCloudIdentity::new();
    let mut config = base_config();
    config.service_accounts = vec![
        workload_identity_account("sa-1", &["ksa1", "ksa2"]),
        impersonate_account("sa-2", "user:admin@example.com"),
        vm_account("sa-3"),
    ];

    reconcile_everything(&cloud, &config).await;
    let state_after_first = cloud.state();
    let mutations_after_first = cloud.mutation_count();

    reconcile_everything(&cloud, &config).await;

    assert_eq!(
        cloud.mutation_count(),
        mutations_after_first,
        "second run mutated the backend: {:?}",
        &cloud.mutations()[mutations_after_first..]
    );
    assert_eq!(cloud.state(), state_after_first);
}

#[tokio::test]
async fn role_permissions_grow_but_never_shrink() {
    let cloud = FakeCloudIdentity::new();
    let role_name = gcp::custom_role_resource("my-proj", "strato_worker");
    cloud.seed_role(Role {
        name: role_name.clone(),
        title: "strato_worker".to_string(),
        description: String::new(),
        included_permissions: vec![
            "legacy.permission.added.by.hand".to_string(),
            "compute.instances.get".to_string(),
        ],
        stage: RoleStage::Ga,
        deleted: false,
    });

    let mut config = base_config();
    let mut account = workload_identity_account("sa-1", &["ksa1"]);
    account.roles = vec![custom_role(
        "strato_worker",
        &["compute.instances.get", "compute.instances.list"],
    )];
    config.service_accounts = vec![account];

    reconciler(&cloud, &config)
        .ensure_service_accounts()
        .await
        .unwrap();

    let role = cloud.state().roles.get(&role_name).cloned().unwrap();
    assert_eq!(
        role.included_permissions,
        vec![
            "legacy.permission.added.by.hand".to_string(),
            "compute.instances.get".to_string(),
            "compute.instances.list".to_string(),
        ],
        "expected the union of existing and desired permissions"
    );
}

#[tokio::test]
async fn matching_role_is_not_rewritten() {
    let cloud = FakeCloudIdentity::new();
    let role_name = gcp::custom_role_resource("my-proj", "strato_worker");
    cloud.seed_role(Role {
        name: role_name,
        title: "strato_worker".to_string(),
        description: String::new(),
        included_permissions: vec!["compute.instances.get".to_string()],
        stage: RoleStage::Ga,
        deleted: false,
    });

    let mut config = base_config();
    config.service_accounts = vec![workload_identity_account("sa-1", &["ksa1"])];

    reconciler(&cloud, &config)
        .ensure_service_accounts()
        .await
        .unwrap();

    assert!(
        !cloud.mutations().iter().any(|m| m.starts_with("update_role")),
        "matching role was rewritten: {:?}",
        cloud.mutations()
    );
}

#[tokio::test]
async fn duplicate_role_binding_is_applied_once() {
    let cloud = FakeCloudIdentity::new();
    let mut config = base_config();
    let account = ServiceAccountSpec {
        account_id: "sa-1".to_string(),
        // The same role twice; the policy must end up with one entry.
        roles: vec![predefined_role("compute.viewer"), predefined_role("compute.viewer")],
        access_method: AccessMethod::Vm,
        credential_request: None,
        impersonator_principal: None,
    };
    config.service_accounts = vec![account];

    reconciler(&cloud, &config)
        .ensure_service_accounts()
        .await
        .unwrap();

    let policy = cloud
        .state()
        .project_policies
        .get("my-proj")
        .cloned()
        .unwrap();
    let binding = policy
        .bindings
        .iter()
        .find(|b| b.role == "roles/compute.viewer")
        .expect("binding exists");
    assert_eq!(binding.members.len(), 1);

    let writes = cloud
        .mutations()
        .iter()
        .filter(|m| m.starts_with("set_project_policy"))
        .count();
    assert_eq!(writes, 1, "expected a single batched policy write");
}

#[tokio::test]
async fn soft_deleted_pool_is_undeleted_not_recreated() {
    let cloud = FakeCloudIdentity::new();
    let pool_name = gcp::pool_resource("my-proj", "my-pool");
    cloud.seed_pool(Pool {
        name: pool_name.clone(),
        display_name: "my-pool".to_string(),
        description: String::new(),
        state: ResourceState::Deleted,
        disabled: false,
    });

    let config = base_config();
    reconciler(&cloud, &config)
        .ensure_workload_identity_pool()
        .await
        .unwrap();

    assert_eq!(cloud.mutations(), vec![format!("undelete_pool {}", pool_name)]);
    assert_eq!(
        cloud.state().pools.get(&pool_name).unwrap().state,
        ResourceState::Active
    );
}

#[tokio::test]
async fn disabled_pool_is_enabled() {
    let cloud = FakeCloudIdentity::new();
    let pool_name = gcp::pool_resource("my-proj", "my-pool");
    cloud.seed_pool(Pool {
        name: pool_name.clone(),
        display_name: "my-pool".to_string(),
        description: String::new(),
        state: ResourceState::Active,
        disabled: true,
    });

    let config = base_config();
    reconciler(&cloud, &config)
        .ensure_workload_identity_pool()
        .await
        .unwrap();

    assert_eq!(cloud.mutations(), vec![format!("enable_pool {}", pool_name)]);
    assert!(!cloud.state().pools.get(&pool_name).unwrap().disabled);
}

#[tokio::test]
async fn soft_deleted_role_is_undeleted_before_any_update() {
    let cloud = FakeCloudIdentity::new();
    let role_name = gcp::custom_role_resource("my-proj", "strato_worker");
    cloud.seed_role(Role {
        name: role_name.clone(),
        title: "strato_worker".to_string(),
        description: String::new(),
        included_permissions: Vec::new(),
        stage: RoleStage::Ga,
        deleted: true,
    });

    let mut config = base_config();
    config.service_accounts = vec![workload_identity_account("sa-1", &["ksa1"])];

    reconciler(&cloud, &config)
        .ensure_service_accounts()
        .await
        .unwrap();

    let mutations = cloud.mutations();
    let undelete = mutations
        .iter()
        .position(|m| m == &format!("undelete_role {}", role_name))
        .expect("role was undeleted");
    let update = mutations
        .iter()
        .position(|m| m == &format!("update_role {}", role_name))
        .expect("permissions were filled in after undelete");
    assert!(undelete < update, "undelete must precede the update");
    assert!(
        !mutations.iter().any(|m| m.starts_with("create_role")),
        "soft-deleted role must not be recreated: {:?}",
        mutations
    );
}

#[tokio::test]
async fn disabled_role_stage_is_restored_to_ga() {
    let cloud = FakeCloudIdentity::new();
    let role_name = gcp::custom_role_resource("my-proj", "strato_worker");
    cloud.seed_role(Role {
        name: role_name.clone(),
        title: "strato_worker".to_string(),
        description: String::new(),
        included_permissions: vec!["compute.instances.get".to_string()],
        stage: RoleStage::Disabled,
        deleted: false,
    });

    let mut config = base_config();
    config.service_accounts = vec![workload_identity_account("sa-1", &["ksa1"])];

    reconciler(&cloud, &config)
        .ensure_service_accounts()
        .await
        .unwrap();

    assert_eq!(cloud.state().roles.get(&role_name).unwrap().stage, RoleStage::Ga);
}

#[tokio::test]
async fn vm_access_method_grants_nothing() {
    let cloud = FakeCloudIdentity::new();
    let mut config = base_config();
    config.service_accounts = vec![vm_account("sa-1")];

    reconciler(&cloud, &config)
        .ensure_service_accounts()
        .await
        .unwrap();

    let email = gcp::service_account_email("sa-1", "my-proj");
    assert_eq!(cloud.mutations(), vec![format!("create_service_account {}", email)]);
    assert!(cloud.state().account_policies.is_empty());
}

#[tokio::test]
async fn impersonation_grants_exactly_one_token_creator() {
    let cloud = FakeCloudIdentity::new();
    let mut config = base_config();
    config.service_accounts = vec![impersonate_account("sa-1", "user:admin@example.com")];

    reconciler(&cloud, &config)
        .ensure_service_accounts()
        .await
        .unwrap();

    let email = gcp::service_account_email("sa-1", "my-proj");
    let policy = cloud.state().account_policies.get(&email).cloned().unwrap();
    let binding = policy
        .bindings
        .iter()
        .find(|b| b.role == TOKEN_CREATOR_ROLE)
        .expect("token creator binding exists");
    assert_eq!(binding.members, vec!["user:admin@example.com".to_string()]);
}

#[tokio::test]
async fn impersonation_without_a_principal_is_an_error() {
    let cloud = FakeCloudIdentity::new();
    let mut config = base_config();
    let mut account = impersonate_account("sa-1", "unused");
    account.impersonator_principal = None;
    config.service_accounts = vec![account];

    let err = reconciler(&cloud, &config)
        .ensure_service_accounts()
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("impersonator principal"), "got: {:#}", err);
}

#[tokio::test]
async fn workload_identity_grants_one_principal_per_kubernetes_account() {
    let cloud = FakeCloudIdentity::new();
    let mut config = base_config();
    config.service_accounts = vec![workload_identity_account("sa-1", &["ksa1", "ksa2"])];

    reconciler(&cloud, &config)
        .ensure_service_accounts()
        .await
        .unwrap();

    let email = gcp::service_account_email("sa-1", "my-proj");
    let policy = cloud.state().account_policies.get(&email).cloned().unwrap();
    let binding = policy
        .bindings
        .iter()
        .find(|b| b.role == WORKLOAD_IDENTITY_USER_ROLE)
        .expect("workload identity binding exists");
    assert_eq!(binding.members.len(), 2);
    for ksa in ["ksa1", "ksa2"] {
        let principal = federated_principal(1234, "my-pool", "ns1", ksa);
        assert!(binding.members.contains(&principal), "missing {}", principal);
    }

    let writes = cloud
        .mutations()
        .iter()
        .filter(|m| m.starts_with("set_service_account_policy"))
        .count();
    assert_eq!(writes, 1, "both principals must land in one policy write");
}

#[tokio::test]
async fn unknown_access_method_is_skipped_not_fatal() {
    let cloud = FakeCloudIdentity::new();
    let mut config = base_config();
    let mut account = vm_account("sa-1");
    account.access_method = AccessMethod::Other("quantum_tunnel".to_string());
    config.service_accounts = vec![account];

    reconciler(&cloud, &config)
        .ensure_service_accounts()
        .await
        .unwrap();

    assert!(cloud.state().account_policies.is_empty());
}

#[tokio::test]
async fn disabled_service_account_is_enabled() {
    let cloud = FakeCloudIdentity::new();
    let email = gcp::service_account_email("sa-1", "my-proj");
    cloud.seed_service_account(ServiceAccount {
        name: format!("projects/my-proj/serviceAccounts/{}", email),
        email: email.clone(),
        display_name: "sa-1".to_string(),
        description: String::new(),
        disabled: true,
    });

    let mut config = base_config();
    config.service_accounts = vec![vm_account("sa-1")];

    reconciler(&cloud, &config)
        .ensure_service_accounts()
        .await
        .unwrap();

    assert_eq!(cloud.mutations(), vec![format!("enable_service_account {}", email)]);
    assert!(!cloud.state().service_accounts.get(&email).unwrap().disabled);
}

#[tokio::test]
async fn matching_provider_with_reordered_jwks_is_left_alone() {
    let cloud = FakeCloudIdentity::new();
    let mut config = base_config();
    config.provider.jwks = r#"{"keys":[{"kty":"RSA","kid":"k1","n":"sXchQ","e":"AQAB"},{"kty":"RSA","kid":"k2","n":"dGVzdA","e":"AQAB"}]}"#.to_string();

    let provider_name = gcp::provider_resource("my-proj", "my-pool", "oidc");
    cloud.seed_provider(Provider {
        name: provider_name,
        display_name: "oidc".to_string(),
        description: "Workload identity provider created by Strato for demo".to_string(),
        state: ResourceState::Active,
        disabled: false,
        oidc: OidcConfig {
            issuer_uri: "https://issuer.example.com".to_string(),
            // Same keys, opposite order and shuffled fields.
            jwks_json: r#"{"keys":[{"kid":"k2","e":"AQAB","n":"dGVzdA","kty":"RSA"},{"kid":"k1","e":"AQAB","n":"sXchQ","kty":"RSA"}]}"#.to_string(),
            allowed_audiences: vec!["strato".to_string()],
        },
        attribute_mapping: [("google.subject".to_string(), "assertion.sub".to_string())]
            .into_iter()
            .collect(),
    });

    reconciler(&cloud, &config)
        .ensure_workload_identity_provider()
        .await
        .unwrap();

    assert!(cloud.mutations().is_empty(), "mutations: {:?}", cloud.mutations());
}

#[tokio::test]
async fn drifted_provider_is_updated_in_one_call() {
    let cloud = FakeCloudIdentity::new();
    let config = base_config();

    let provider_name = gcp::provider_resource("my-proj", "my-pool", "oidc");
    cloud.seed_provider(Provider {
        name: provider_name.clone(),
        display_name: "oidc".to_string(),
        description: "Workload identity provider created by Strato for demo".to_string(),
        state: ResourceState::Active,
        disabled: false,
        oidc: OidcConfig {
            issuer_uri: "https://old-issuer.example.com".to_string(),
            jwks_json: JWKS.to_string(),
            allowed_audiences: vec!["strato".to_string()],
        },
        attribute_mapping: [("google.subject".to_string(), "assertion.sub".to_string())]
            .into_iter()
            .collect(),
    });

    reconciler(&cloud, &config)
        .ensure_workload_identity_provider()
        .await
        .unwrap();

    assert_eq!(cloud.mutations(), vec![format!("update_provider {}", provider_name)]);
    let provider = cloud.state().providers.get(&provider_name).cloned().unwrap();
    assert_eq!(provider.oidc.issuer_uri, "https://issuer.example.com");
}

#[tokio::test]
async fn support_access_binds_the_group_principal() {
    let cloud = FakeCloudIdentity::new();
    let config = base_config();

    reconciler(&cloud, &config).grant_support_access().await.unwrap();

    let state = cloud.state();
    let role_name = gcp::custom_role_resource("my-proj", "strato_support");
    assert!(state.roles.contains_key(&role_name), "support role created");

    let policy = state.project_policies.get("my-proj").cloned().unwrap();
    assert!(policy.has_member(&role_name, "group:cloud-support@stratocloud.io"));
}
