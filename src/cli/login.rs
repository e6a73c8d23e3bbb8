use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;

use crate::api::ControlPlane;
use crate::config::Config;

#[derive(Debug, Deserialize)]
struct TokenClaims {
    exp: usize,
}

/// Read the expiration claim from a JWT without verifying the signature.
/// The control plane validated the token when it was issued; locally it is
/// only decoded to report expiry to the user.
fn token_expiration(token: &str) -> Result<DateTime<Utc>> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    let token_data = decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .context("Failed to decode token")?;

    DateTime::<Utc>::from_timestamp(token_data.claims.exp as i64, 0)
        .ok_or_else(|| anyhow::anyhow!("Token has an invalid expiration timestamp"))
}

/// Format a token's expiration like "June 03, 2026 at 14:30 UTC (in 2 days)".
pub fn format_token_expiration(token: &str) -> Result<String> {
    let expires = token_expiration(token)?;
    let relative = {
        let remaining = expires.signed_duration_since(Utc::now());
        if remaining.num_seconds() <= 0 {
            "expired".to_string()
        } else if remaining.num_days() > 0 {
            format!("in {} day(s)", remaining.num_days())
        } else if remaining.num_hours() > 0 {
            format!("in {} hour(s)", remaining.num_hours())
        } else {
            format!("in {} minute(s)", remaining.num_minutes().max(1))
        }
    };
    Ok(format!(
        "{} ({})",
        expires.format("%B %d, %Y at %H:%M UTC"),
        relative
    ))
}

/// Store the given token (and optionally a control-plane URL), verifying it
/// against the control plane before saving.
pub async fn login(
    http_client: &Client,
    config: &mut Config,
    url: Option<&str>,
    token: &str,
) -> Result<()> {
    let expires = token_expiration(token)?;
    if expires <= Utc::now() {
        anyhow::bail!("The provided token is already expired");
    }

    if let Some(url) = url {
        config.api_url = Some(url.trim_end_matches('/').to_string());
    }
    config.token = Some(token.to_string());

    let api = ControlPlane::new(http_client, config)?;
    let account = api
        .current_account()
        .await
        .context("Failed to verify the token against the control plane")?;

    config.save()?;

    println!(
        "✓ Logged in to {} as '{}'",
        config.get_api_url(),
        account.username
    );
    println!("  Token expires: {}", format_token_expiration(token)?);
    Ok(())
}

pub fn logout(config: &mut Config) -> Result<()> {
    if config.token.is_none() {
        println!("Not logged in.");
        return Ok(());
    }
    config.clear_token()?;
    println!("✓ Logged out");
    Ok(())
}

/// Print the stored access token. With `full`, also print its expiration.
pub fn token(config: &Config, full: bool) -> Result<()> {
    let token = config
        .get_token()
        .ok_or_else(|| anyhow::anyhow!("Not logged in. Please run 'strato login' first."))?;
    println!("{}", token);
    if full {
        println!("Expires: {}", format_token_expiration(token)?);
    }
    Ok(())
}
