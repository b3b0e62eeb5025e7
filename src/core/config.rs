use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Base URL of the synthesis server. Projects may override this.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default = "default_projects_folder")]
    pub projects_folder: String,

    /// Concurrency used when a project does not carry its own setting.
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,

    /// Hard ceiling applied to any requested concurrency.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_autosave_debounce_ms")]
    pub autosave_debounce_ms: u64,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8000/tts".to_string()
}
fn default_projects_folder() -> String {
    "projects".to_string()
}
fn default_concurrency() -> usize {
    5
}
fn default_max_concurrency() -> usize {
    50
}
fn default_autosave_debounce_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            projects_folder: default_projects_folder(),
            default_concurrency: default_concurrency(),
            max_concurrency: default_max_concurrency(),
            autosave_debounce_ms: default_autosave_debounce_ms(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("config.yml")
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path.as_ref(), content).context("Failed to write config")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.projects_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = Config::load_from(dir.path().join("config.yml"))?;
        assert_eq!(config.default_concurrency, 5);
        assert_eq!(config.max_concurrency, 50);
        assert_eq!(config.autosave_debounce_ms, 1000);
        Ok(())
    }

    #[test]
    fn partial_yaml_fills_missing_fields() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");
        fs::write(&path, "server_url: http://tts.local/api\nmax_concurrency: 8\n")?;

        let config = Config::load_from(&path)?;
        assert_eq!(config.server_url, "http://tts.local/api");
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.projects_folder, "projects");
        Ok(())
    }

    #[test]
    fn save_load_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");

        let mut config = Config::default();
        config.default_concurrency = 3;
        config.save_to(&path)?;

        let loaded = Config::load_from(&path)?;
        assert_eq!(loaded.default_concurrency, 3);
        assert_eq!(loaded.server_url, config.server_url);
        Ok(())
    }
}
