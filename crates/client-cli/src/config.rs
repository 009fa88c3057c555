use anyhow::{bail, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use shared::AuthSession;
use std::path::{Path, PathBuf};

pub const URL_ENV: &str = "WEBSTUDIO_URL";
pub const ANON_KEY_ENV: &str = "WEBSTUDIO_ANON_KEY";
pub const SITE_URL_ENV: &str = "WEBSTUDIO_SITE_URL";

const DEFAULT_SITE_URL: &str = "http://localhost:5173";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Session persisted between invocations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<AuthSession>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
    /// Where OAuth providers redirect back to
    #[serde(default = "default_site_url")]
    pub site_url: String,
}

fn default_site_url() -> String {
    DEFAULT_SITE_URL.to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            site_url: default_site_url(),
        }
    }
}

fn mask(value: Option<&str>) -> &'static str {
    if value.is_some() {
        "****"
    } else {
        ""
    }
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "webstudio", "webstudio")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        let config_dir = proj_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay values from the environment (and `.env`, loaded by the caller)
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(URL_ENV).ok(),
            std::env::var(ANON_KEY_ENV).ok(),
        );
        if let Ok(site_url) = std::env::var(SITE_URL_ENV) {
            self.remote.site_url = site_url;
        }
    }

    /// Command-line or environment values win over the file
    pub fn apply_overrides(&mut self, url: Option<String>, anon_key: Option<String>) {
        if url.is_some() {
            self.remote.url = url;
        }
        if anon_key.is_some() {
            self.remote.anon_key = anon_key;
        }
    }

    pub fn set(&mut self, key: &str, value: String) -> Result<()> {
        match key {
            "url" => self.remote.url = Some(value),
            "anon_key" => self.remote.anon_key = Some(value),
            "site_url" => self.remote.site_url = value,
            _ => bail!("Unknown config key: {}. Valid keys: url, anon_key, site_url", key),
        }
        Ok(())
    }

    /// Value for display; secrets are masked
    pub fn get(&self, key: &str) -> Result<String> {
        let value = match key {
            "url" => self.remote.url.clone().unwrap_or_default(),
            "anon_key" => mask(self.remote.anon_key.as_deref()).to_string(),
            "site_url" => self.remote.site_url.clone(),
            "session" => match &self.session {
                Some(session) => session
                    .user
                    .email
                    .clone()
                    .unwrap_or_else(|| session.user.id.to_string()),
                None => String::new(),
            },
            _ => bail!("Unknown config key: {}", key),
        };
        Ok(value)
    }

    pub fn show(&self) -> String {
        ["url", "anon_key", "site_url", "session"]
            .iter()
            .map(|key| format!("{}: {}", key, self.get(key).unwrap_or_default()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Backend URL and anon key, or an error telling the user how to set them
    pub fn credentials(&self) -> Result<(String, String)> {
        match (&self.remote.url, &self.remote.anon_key) {
            (Some(url), Some(key)) => Ok((url.clone(), key.clone())),
            _ => bail!(
                "Backend not configured. Run 'webstudio config set url <url>' and \
                 'webstudio config set anon_key <key>', or set {} and {}",
                URL_ENV,
                ANON_KEY_ENV
            ),
        }
    }
}
