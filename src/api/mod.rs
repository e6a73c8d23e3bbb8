//! Client-side interface for communicating with the Strato Cluster Manager.
//!
//! One thin `ControlPlane` struct wraps the authenticated HTTP calls the CLI
//! commands need: paginated list endpoints, raw GET/POST passthrough, and
//! CRUD for federation configurations.

pub mod models;

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Config;
use models::{
    Account, CloudProviderInfo, Cluster, ClusterUser, MachinePool, Page, QuotaCost, VersionInfo,
    WifConfig, WifStatus,
};

const PAGE_SIZE: u32 = 100;

pub struct ControlPlane {
    http: Client,
    base_url: String,
    token: String,
}

/// Reject identifiers that could escape a quoted search expression. Applied
/// to every user-supplied name or id before it reaches the network.
pub fn validate_resource_key(key: &str) -> Result<()> {
    if key.is_empty() {
        anyhow::bail!("resource name must not be empty");
    }
    if let Some(bad) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        anyhow::bail!(
            "resource name '{}' contains the invalid character '{}' (allowed: letters, digits, '-', '_', '.')",
            key,
            bad
        );
    }
    Ok(())
}

impl ControlPlane {
    pub fn new(http: &Client, config: &Config) -> Result<Self> {
        let token = config
            .get_token()
            .ok_or_else(|| anyhow::anyhow!("Not logged in. Please run 'strato login' first."))?;
        Ok(Self {
            http: http.clone(),
            base_url: config.get_api_url().trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn check(&self, what: &str, response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        anyhow::bail!("{} (status {}): {}", what, status, error_text);
    }

    async fn get_json<T: DeserializeOwned>(&self, what: &str, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .with_context(|| format!("{}: request failed", what))?;
        self.check(what, response)
            .await?
            .json()
            .await
            .with_context(|| format!("{}: invalid response body", what))
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        what: &str,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .http
            .post(self.url(path))
            .header("Authorization", format!("Bearer {}", self.token))
            .json(body)
            .send()
            .await
            .with_context(|| format!("{}: request failed", what))?;
        self.check(what, response)
            .await?
            .json()
            .await
            .with_context(|| format!("{}: invalid response body", what))
    }

    /// Fetch every page of a list endpoint. The control plane caps page
    /// sizes, so large listings need the loop rather than one request.
    async fn list_all<T: DeserializeOwned>(
        &self,
        what: &str,
        path: &str,
        search: Option<&str>,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let mut query = format!("{}?page={}&size={}", path, page, PAGE_SIZE);
            if let Some(search) = search {
                query.push_str(&format!("&search={}", urlencoding::encode(search)));
            }
            let body: Page<T> = self.get_json(what, &query).await?;
            let fetched = body.items.len() as u32;
            items.extend(body.items);
            if fetched == 0 || fetched < body.size || (items.len() as u32) >= body.total {
                return Ok(items);
            }
            page += 1;
        }
    }

    // --- raw passthrough ---

    pub async fn get_raw(&self, path: &str) -> Result<serde_json::Value> {
        self.get_json("Failed to fetch resource", path).await
    }

    pub async fn post_raw(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.post_json("Failed to post resource", path, body).await
    }

    // --- accounts and clusters ---

    pub async fn current_account(&self) -> Result<Account> {
        self.get_json("Failed to fetch current account", "api/v1/current_account")
            .await
    }

    pub async fn list_clusters(&self, search: Option<&str>) -> Result<Vec<Cluster>> {
        self.list_all("Failed to list clusters", "api/v1/clusters", search)
            .await
    }

    /// Look up a cluster by exact id or name. Zero matches is an error, and
    /// so is more than one: a name shared by several clusters cannot be
    /// resolved without the id.
    pub async fn find_cluster(&self, key: &str) -> Result<Cluster> {
        validate_resource_key(key)?;
        let search = format!("id = '{}' or name = '{}'", key, key);
        let mut matches = self.list_clusters(Some(&search)).await?;
        match matches.len() {
            0 => anyhow::bail!("cluster '{}' does not exist", key),
            1 => Ok(matches.remove(0)),
            n => anyhow::bail!("'{}' matches {} clusters; use the cluster id instead", key, n),
        }
    }

    pub async fn list_machine_pools(&self, cluster_id: &str) -> Result<Vec<MachinePool>> {
        self.list_all(
            "Failed to list machine pools",
            &format!("api/v1/clusters/{}/machine_pools", cluster_id),
            None,
        )
        .await
    }

    pub async fn list_users(&self, cluster_id: &str) -> Result<Vec<ClusterUser>> {
        self.list_all(
            "Failed to list users",
            &format!("api/v1/clusters/{}/users", cluster_id),
            None,
        )
        .await
    }

    pub async fn list_providers(&self) -> Result<Vec<CloudProviderInfo>> {
        self.list_all("Failed to list cloud providers", "api/v1/providers", None)
            .await
    }

    pub async fn list_versions(&self) -> Result<Vec<VersionInfo>> {
        self.list_all("Failed to list versions", "api/v1/versions", None)
            .await
    }

    pub async fn list_quota(&self) -> Result<Vec<QuotaCost>> {
        self.list_all("Failed to list quota costs", "api/v1/quota_costs", None)
            .await
    }

    // --- federation configurations ---

    pub async fn list_wif_configs(&self, search: Option<&str>) -> Result<Vec<WifConfig>> {
        self.list_all(
            "Failed to list federation configurations",
            "api/v1/wif_configs",
            search,
        )
        .await
    }

    pub async fn create_wif_config(&self, config: &WifConfig) -> Result<WifConfig> {
        self.post_json(
            "Failed to create federation configuration",
            "api/v1/wif_configs",
            config,
        )
        .await
    }

    pub async fn get_wif_config(&self, id: &str) -> Result<WifConfig> {
        self.get_json(
            "Failed to fetch federation configuration",
            &format!("api/v1/wif_configs/{}", id),
        )
        .await
    }

    pub async fn update_wif_config(&self, config: &WifConfig) -> Result<WifConfig> {
        let what = "Failed to update federation configuration";
        let response = self
            .http
            .patch(self.url(&format!("api/v1/wif_configs/{}", config.id)))
            .header("Authorization", format!("Bearer {}", self.token))
            .json(config)
            .send()
            .await
            .with_context(|| format!("{}: request failed", what))?;
        self.check(what, response)
            .await?
            .json()
            .await
            .with_context(|| format!("{}: invalid response body", what))
    }

    pub async fn delete_wif_config(&self, id: &str) -> Result<()> {
        let what = "Failed to delete federation configuration";
        let response = self
            .http
            .delete(self.url(&format!("api/v1/wif_configs/{}", id)))
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .with_context(|| format!("{}: request failed", what))?;
        self.check(what, response).await?;
        Ok(())
    }

    /// Resolve a federation configuration by exact id or display name.
    pub async fn find_wif_config(&self, key: &str) -> Result<WifConfig> {
        validate_resource_key(key)?;
        let search = format!("id = '{}' or display_name = '{}'", key, key);
        let mut matches = self.list_wif_configs(Some(&search)).await?;
        match matches.len() {
            0 => anyhow::bail!(
                "federation configuration '{}' does not exist; run 'strato wif list' to see available configurations",
                key
            ),
            1 => Ok(matches.remove(0)),
            n => anyhow::bail!(
                "'{}' matches {} federation configurations; use the configuration id instead",
                key,
                n
            ),
        }
    }

    pub async fn wif_status(&self, id: &str) -> Result<WifStatus> {
        self.get_json(
            "Failed to fetch federation configuration status",
            &format!("api/v1/wif_configs/{}/status", id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_resource_keys() {
        for key in ["my-cluster", "wif_config.1", "Abc-123"] {
            assert!(validate_resource_key(key).is_ok(), "rejected {}", key);
        }
    }

    #[test]
    fn invalid_resource_keys() {
        for key in ["", "a b", "x' or '1'='1", "semi;colon", "slash/here"] {
            assert!(validate_resource_key(key).is_err(), "accepted {:?}", key);
        }
    }
}
