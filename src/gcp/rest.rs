//! REST implementation of [`CloudIdentity`] against the live Google APIs.
//!
//! Correctness of the reconciliation logic is exercised against a fake; this
//! module is transport plumbing and keeps each endpoint as a thin request
//! builder plus the shared status-code mapping in [`GcpRestClient::check`].

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{CloudIdentity, GcpError, GcpResult, Policy, Pool, Provider, Role, ServiceAccount};

const IAM_BASE: &str = "https://iam.googleapis.com/v1";
const RESOURCE_MANAGER_BASE: &str = "https://cloudresourcemanager.googleapis.com/v1";

pub struct GcpRestClient {
    http: Client,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl GcpRestClient {
    pub fn new(http: Client, access_token: String) -> Self {
        Self { http, access_token }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Map HTTP status codes onto the error taxonomy the reconciler branches
    /// on: 404 -> NotFound, 409 -> AlreadyExists, other non-2xx -> Api.
    async fn check(&self, what: &str, response: Response) -> GcpResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.error.message)
            .unwrap_or(body);
        match status {
            StatusCode::NOT_FOUND => Err(GcpError::NotFound(what.to_string())),
            StatusCode::CONFLICT => Err(GcpError::AlreadyExists(what.to_string())),
            _ => Err(GcpError::Api {
                status: status.as_u16(),
                message,
            }),
        }
    }

    async fn get_resource<T: serde::de::DeserializeOwned>(
        &self,
        what: &str,
        url: &str,
    ) -> GcpResult<T> {
        let response = self
            .http
            .get(url)
            .header("Authorization", self.bearer())
            .send()
            .await?;
        Ok(self.check(what, response).await?.json().await?)
    }

    async fn post_empty(&self, what: &str, url: &str) -> GcpResult<()> {
        let response = self
            .http
            .post(url)
            .header("Authorization", self.bearer())
            .json(&json!({}))
            .send()
            .await?;
        self.check(what, response).await?;
        Ok(())
    }
}

#[async_trait]
impl CloudIdentity for GcpRestClient {
    async fn get_pool(&self, name: &str) -> GcpResult<Pool> {
        self.get_resource("workload identity pool", &format!("{}/{}", IAM_BASE, name))
            .await
    }

    async fn create_pool(&self, project: &str, pool_id: &str, pool: &Pool) -> GcpResult<()> {
        let url = format!(
            "{}/projects/{}/locations/global/workloadIdentityPools?workloadIdentityPoolId={}",
            IAM_BASE,
            project,
            urlencoding::encode(pool_id)
        );
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.bearer())
            .json(pool)
            .send()
            .await?;
        self.check("workload identity pool", response).await?;
        Ok(())
    }

    async fn undelete_pool(&self, name: &str) -> GcpResult<()> {
        self.post_empty(
            "workload identity pool",
            &format!("{}/{}:undelete", IAM_BASE, name),
        )
        .await
    }

    async fn enable_pool(&self, name: &str) -> GcpResult<()> {
        let url = format!("{}/{}?updateMask=disabled", IAM_BASE, name);
        let response = self
            .http
            .patch(&url)
            .header("Authorization", self.bearer())
            .json(&json!({ "disabled": false }))
            .send()
            .await?;
        self.check("workload identity pool", response).await?;
        Ok(())
    }

    async fn delete_pool(&self, name: &str) -> GcpResult<()> {
        let response = self
            .http
            .delete(format!("{}/{}", IAM_BASE, name))
            .header("Authorization", self.bearer())
            .send()
            .await?;
        self.check("workload identity pool", response).await?;
        Ok(())
    }

    async fn get_provider(&self, name: &str) -> GcpResult<Provider> {
        self.get_resource(
            "workload identity provider",
            &format!("{}/{}", IAM_BASE, name),
        )
        .await
    }

    async fn create_provider(
        &self,
        pool_name: &str,
        provider_id: &str,
        provider: &Provider,
    ) -> GcpResult<()> {
        let url = format!(
            "{}/{}/providers?workloadIdentityPoolProviderId={}",
            IAM_BASE,
            pool_name,
            urlencoding::encode(provider_id)
        );
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.bearer())
            .json(provider)
            .send()
            .await?;
        self.check("workload identity provider", response).await?;
        Ok(())
    }

    async fn update_provider(&self, provider: &Provider) -> GcpResult<()> {
        // Field mask covering every mutable OIDC and display field.
        let url = format!(
            "{}/{}?updateMask=displayName,description,disabled,attributeMapping,oidc",
            IAM_BASE, provider.name
        );
        let response = self
            .http
            .patch(&url)
            .header("Authorization", self.bearer())
            .json(provider)
            .send()
            .await?;
        self.check("workload identity provider", response).await?;
        Ok(())
    }

    async fn create_service_account(
        &self,
        project: &str,
        account_id: &str,
        display_name: &str,
        description: &str,
    ) -> GcpResult<ServiceAccount> {
        let url = format!("{}/projects/{}/serviceAccounts", IAM_BASE, project);
        let body = json!({
            "accountId": account_id,
            "serviceAccount": {
                "displayName": display_name,
                "description": description,
            },
        });
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.bearer())
            .json(&body)
            .send()
            .await?;
        Ok(self
            .check("service account", response)
            .await?
            .json()
            .await?)
    }

    async fn get_service_account(&self, project: &str, email: &str) -> GcpResult<ServiceAccount> {
        self.get_resource(
            "service account",
            &format!("{}/projects/{}/serviceAccounts/{}", IAM_BASE, project, email),
        )
        .await
    }

    async fn enable_service_account(&self, project: &str, email: &str) -> GcpResult<()> {
        self.post_empty(
            "service account",
            &format!(
                "{}/projects/{}/serviceAccounts/{}:enable",
                IAM_BASE, project, email
            ),
        )
        .await
    }

    async fn delete_service_account(&self, project: &str, email: &str) -> GcpResult<()> {
        let response = self
            .http
            .delete(format!(
                "{}/projects/{}/serviceAccounts/{}",
                IAM_BASE, project, email
            ))
            .header("Authorization", self.bearer())
            .send()
            .await?;
        self.check("service account", response).await?;
        Ok(())
    }

    async fn get_role(&self, name: &str) -> GcpResult<Role> {
        self.get_resource("role", &format!("{}/{}", IAM_BASE, name)).await
    }

    async fn create_role(&self, project: &str, role_id: &str, role: &Role) -> GcpResult<()> {
        let url = format!(
            "{}/projects/{}/roles?roleId={}",
            IAM_BASE,
            project,
            urlencoding::encode(role_id)
        );
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.bearer())
            .json(role)
            .send()
            .await?;
        self.check("role", response).await?;
        Ok(())
    }

    async fn update_role(&self, name: &str, role: &Role) -> GcpResult<()> {
        let response = self
            .http
            .patch(format!("{}/{}", IAM_BASE, name))
            .header("Authorization", self.bearer())
            .json(role)
            .send()
            .await?;
        self.check("role", response).await?;
        Ok(())
    }

    async fn undelete_role(&self, name: &str) -> GcpResult<()> {
        self.post_empty("role", &format!("{}/{}:undelete", IAM_BASE, name))
            .await
    }

    async fn get_project_policy(&self, project: &str) -> GcpResult<Policy> {
        let url = format!("{}/projects/{}:getIamPolicy", RESOURCE_MANAGER_BASE, project);
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.bearer())
            .json(&json!({}))
            .send()
            .await?;
        Ok(self
            .check("project IAM policy", response)
            .await?
            .json()
            .await?)
    }

    async fn set_project_policy(&self, project: &str, policy: &Policy) -> GcpResult<()> {
        let url = format!("{}/projects/{}:setIamPolicy", RESOURCE_MANAGER_BASE, project);
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.bearer())
            .json(&json!({ "policy": policy }))
            .send()
            .await?;
        self.check("project IAM policy", response).await?;
        Ok(())
    }

    async fn get_service_account_policy(&self, project: &str, email: &str) -> GcpResult<Policy> {
        let url = format!(
            "{}/projects/{}/serviceAccounts/{}:getIamPolicy",
            IAM_BASE, project, email
        );
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.bearer())
            .json(&json!({}))
            .send()
            .await?;
        Ok(self
            .check("service account IAM policy", response)
            .await?
            .json()
            .await?)
    }

    async fn set_service_account_policy(
        &self,
        project: &str,
        email: &str,
        policy: &Policy,
    ) -> GcpResult<()> {
        let url = format!(
            "{}/projects/{}/serviceAccounts/{}:setIamPolicy",
            IAM_BASE, project, email
        );
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.bearer())
            .json(&json!({ "policy": policy }))
            .send()
            .await?;
        self.check("service account IAM policy", response).await?;
        Ok(())
    }

    async fn project_number(&self, project_id: &str) -> GcpResult<u64> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ProjectBody {
            project_number: String,
        }
        let url = format!("{}/projects/{}", RESOURCE_MANAGER_BASE, project_id);
        let body: ProjectBody = self.get_resource("project", &url).await?;
        body.project_number.parse().map_err(|_| GcpError::Api {
            status: 200,
            message: format!("project number '{}' is not numeric", body.project_number),
        })
    }
}
