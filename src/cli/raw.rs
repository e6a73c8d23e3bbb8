use anyhow::{Context, Result};
use reqwest::Client;
use std::io::Read;
use std::path::Path;

use crate::api::ControlPlane;
use crate::config::Config;

/// Send a raw GET request to the control plane and pretty-print the JSON
/// response. Useful for endpoints the CLI has no dedicated subcommand for.
pub async fn get(http_client: &Client, config: &Config, path: &str) -> Result<()> {
    let api = ControlPlane::new(http_client, config)?;
    let body = api.get_raw(path).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Send a raw POST request. The body is read from a file, or from stdin when
/// the path is `-` or absent.
pub async fn post(
    http_client: &Client,
    config: &Config,
    path: &str,
    body_file: Option<&Path>,
) -> Result<()> {
    let raw = match body_file {
        Some(file) if file.as_os_str() != "-" => std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read request body from {}", file.display()))?,
        _ => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read request body from stdin")?;
            buffer
        }
    };

    // Parse up front so a malformed body fails before any network call.
    let body: serde_json::Value =
        serde_json::from_str(&raw).context("Request body is not valid JSON")?;

    let api = ControlPlane::new(http_client, config)?;
    let response = api.post_raw(path, &body).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
