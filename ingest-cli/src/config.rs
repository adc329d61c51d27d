use ingest_upload::UploadConfig;
use job_monitor::MonitorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// API base URL, e.g. `https://ingest.example.com/`
    pub url: String,
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000/".to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub monitor: MonitorConfig,
}

impl AppConfig {
    /// Load from `path`, or from the default location. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn reset(path: Option<&Path>) -> Result<()> {
        Self::default().save(path)
    }

    pub fn show(&self) -> Result<String> {
        let mut shown = self.clone();
        if shown.server.token.is_some() {
            shown.server.token = Some("********".to_string());
        }
        Ok(toml::to_string_pretty(&shown)?)
    }

    /// Apply `--server` / `--token` overrides.
    pub fn with_overrides(mut self, server: Option<String>, token: Option<String>) -> Self {
        if let Some(server) = server {
            self.server.url = server;
        }
        if token.is_some() {
            self.server.token = token;
        }
        self
    }

    pub fn server_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.server.url)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.upload.validate()?;
        self.monitor.validate()?;
        Ok(())
    }

    fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("ingest").join("config.toml"))
            .ok_or_else(|| AppError::Config("could not determine config directory".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn save_and_load_keep_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.server.url = "https://ingest.example.com/".to_string();
        config.upload.chunk_size = 8 * 1024 * 1024;
        config.monitor.stuck_window_secs = 60;
        config.save(Some(&path)).unwrap();

        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[upload]\nmax_attempts = 5\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.upload.max_attempts, 5);
        assert_eq!(config.upload.chunk_size, ingest_upload::DEFAULT_CHUNK_SIZE);
        assert_eq!(config.monitor, MonitorConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[upload]\nchunk_size = 0\n").unwrap();
        assert!(AppConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn show_masks_token() {
        let config = AppConfig::default().with_overrides(None, Some("secret".to_string()));
        let shown = config.show().unwrap();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("********"));
    }

    #[test]
    fn reset_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nurl = \"https://other/\"\n").unwrap();
        AppConfig::reset(Some(&path)).unwrap();
        assert_eq!(AppConfig::load(Some(&path)).unwrap(), AppConfig::default());
    }
}
