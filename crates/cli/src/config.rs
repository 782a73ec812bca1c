//! CLI configuration
//!
//! Layered, lowest priority first: built-in defaults, `config.toml` in the
//! data directory (or the file given with `--config`), `GITDM_*`
//! environment variables (`GITDM_API__BASE_URL`), then command line flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the data directory when `--config` is not given
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    pub api: ApiConfig,
    pub session: SessionConfig,
}

/// API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API root, e.g. `http://localhost:8000/api`
    pub base_url: String,

    /// Request timeout in seconds (0 = none)
    pub timeout_secs: u64,
}

/// Where and how the session is kept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Token file, relative to the data directory unless absolute
    pub file: PathBuf,

    /// How often `watch` re-reads the token file, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:8000/api".to_string(),
                timeout_secs: 30,
            },
            session: SessionConfig {
                file: PathBuf::from("session.json"),
                poll_interval_ms: 1000,
            },
        }
    }
}

impl CliConfig {
    /// Load configuration for the given data directory.
    ///
    /// An explicit `config_file` must exist; the default one is optional.
    pub fn load(
        data_dir: &Path,
        config_file: Option<&Path>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();

        let file = match config_file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::from(data_dir.join(CONFIG_FILE)).required(false),
        };

        let settings = config::Config::builder()
            // Set default values
            .set_default("api.base_url", defaults.api.base_url)?
            .set_default("api.timeout_secs", defaults.api.timeout_secs)?
            .set_default(
                "session.file",
                defaults.session.file.to_string_lossy().to_string(),
            )?
            .set_default("session.poll_interval_ms", defaults.session.poll_interval_ms)?
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("GITDM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_override_option("api.base_url", base_url)?
            .build()
            .context("Failed to load configuration")?;

        Ok(settings.try_deserialize()?)
    }

    /// Token file location
    pub fn session_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.session.file)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.api.timeout_secs > 0).then(|| Duration::from_secs(self.api.timeout_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.session.poll_interval_ms.max(10))
    }
}

/// Default data directory: `GITDM_STATE_DIR`, else the platform data dir
pub fn default_data_dir() -> PathBuf {
    if let Ok(state_dir) = std::env::var("GITDM_STATE_DIR") {
        PathBuf::from(state_dir)
    } else {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gitdm")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load(dir.path(), None, None).unwrap();

        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(
            config.session_path(dir.path()),
            dir.path().join("session.json")
        );
    }

    #[test]
    fn file_in_data_dir_is_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[api]\nbase_url = \"https://ehr.example.org/api\"\ntimeout_secs = 0\n",
        )
        .unwrap();

        let config = CliConfig::load(dir.path(), None, None).unwrap();

        assert_eq!(config.api.base_url, "https://ehr.example.org/api");
        assert_eq!(config.timeout(), None);
        assert_eq!(config.session.poll_interval_ms, 1000);
    }

    #[test]
    fn flag_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[api]\nbase_url = \"https://ehr.example.org/api\"\n\n[session]\nfile = \"/tmp/other.json\"\n",
        )
        .unwrap();

        let config = CliConfig::load(
            dir.path(),
            Some(&path),
            Some("http://127.0.0.1:9000/api".to_string()),
        )
        .unwrap();

        assert_eq!(config.api.base_url, "http://127.0.0.1:9000/api");
        assert_eq!(
            config.session_path(dir.path()),
            PathBuf::from("/tmp/other.json")
        );
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(CliConfig::load(dir.path(), Some(&missing), None).is_err());
    }
}
