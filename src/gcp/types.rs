//! Wire types for the Google Cloud identity resources the reconciler manages.
//!
//! These mirror the REST representations of workload identity pools, OIDC
//! providers, service accounts, custom roles and IAM policies. Only the
//! fields the CLI reads or writes are modelled; unknown fields are dropped
//! on deserialization.

use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceState {
    #[default]
    Active,
    Deleted,
}

/// A workload identity pool. `name` is the full resource path
/// (`projects/{project}/locations/global/workloadIdentityPools/{id}`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Pool {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub state: ResourceState,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OidcConfig {
    pub issuer_uri: String,
    pub jwks_json: String,
    pub allowed_audiences: Vec<String>,
}

/// An OIDC provider declared inside a workload identity pool.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Provider {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub state: ResourceState,
    pub disabled: bool,
    pub oidc: OidcConfig,
    pub attribute_mapping: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceAccount {
    pub name: String,
    pub email: String,
    pub display_name: String,
    pub description: String,
    pub disabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleStage {
    #[default]
    Ga,
    Disabled,
}

/// A project-owned custom role, or the fetched view of a predefined one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Role {
    pub name: String,
    pub title: String,
    pub description: String,
    pub included_permissions: Vec<String>,
    pub stage: RoleStage,
    pub deleted: bool,
}

/// One `(role, members)` entry of an IAM policy. `members` is a logical set;
/// callers go through [`Policy::grant`] to keep it duplicate-free.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Binding {
    pub role: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub bindings: Vec<Binding>,
}

impl Policy {
    pub fn has_member(&self, role: &str, member: &str) -> bool {
        self.bindings
            .iter()
            .any(|b| b.role == role && b.members.iter().any(|m| m == member))
    }

    /// Add `member` to the binding for `role`, creating the binding if
    /// needed. Returns `true` if the policy changed.
    pub fn grant(&mut self, role: &str, member: &str) -> bool {
        if let Some(binding) = self.bindings.iter_mut().find(|b| b.role == role) {
            if binding.members.iter().any(|m| m == member) {
                return false;
            }
            binding.members.push(member.to_string());
            return true;
        }
        self.bindings.push(Binding {
            role: role.to_string(),
            members: vec![member.to_string()],
        });
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A parsed JSON Web Key Set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Parse and sanity-check a raw JWKS document. RSA key material must be
    /// valid base64url, otherwise the provider creation would be rejected
    /// much later by the cloud backend.
    pub fn parse(raw: &str) -> Result<Self> {
        let set: JwkSet = serde_json::from_str(raw).context("JWKS is not valid JSON")?;
        if set.keys.is_empty() {
            anyhow::bail!("JWKS contains no keys");
        }
        let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        for key in &set.keys {
            if key.kty == "RSA" {
                for (field, value) in [("n", &key.n), ("e", &key.e)] {
                    let value = value
                        .as_deref()
                        .with_context(|| format!("RSA key is missing the '{}' field", field))?;
                    b64.decode(value).with_context(|| {
                        format!("RSA key field '{}' is not valid base64url", field)
                    })?;
                }
            }
        }
        Ok(set)
    }
}

/// Compare two JWKS documents structurally. Key order and JSON field order
/// are not significant; byte comparison would report spurious differences
/// after the backend re-serializes the document.
pub fn jwks_equal(a: &str, b: &str) -> bool {
    match (canonical_keys(a), canonical_keys(b)) {
        (Some(left), Some(right)) => left == right,
        // Unparseable on either side: fall back to exact comparison.
        _ => a == b,
    }
}

fn canonical_keys(raw: &str) -> Option<Vec<String>> {
    let doc: serde_json::Value = serde_json::from_str(raw).ok()?;
    // serde_json maps are sorted, so re-serializing normalizes field order.
    let mut keys: Vec<String> = doc.get("keys")?.as_array()?.iter().map(|k| k.to_string()).collect();
    keys.sort();
    Some(keys)
}
