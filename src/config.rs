use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Stored CLI state: the control-plane URL and the bearer token obtained
/// through `strato login`. Lives at `~/.config/strato/config.json`.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    pub token: Option<String>,
    pub api_url: Option<String>,
}

const DEFAULT_API_URL: &str = "https://api.stratocloud.io";

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;

        let config_dir = home.join(".config").join("strato");
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        }

        Ok(config_dir.join("config.json"))
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, json).context("Failed to write config file")?;
        Ok(())
    }

    pub fn set_token(&mut self, token: String) -> Result<()> {
        self.token = Some(token);
        self.save()
    }

    pub fn clear_token(&mut self) -> Result<()> {
        self.token = None;
        self.save()
    }

    pub fn get_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// The control-plane URL, falling back to the hosted service.
    pub fn get_api_url(&self) -> String {
        self.api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }
}
