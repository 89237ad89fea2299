//! Configuration for tslink.
//!
//! Settings live in `~/.tslink/config.toml`:
//!
//! ```toml
//! [app]
//! workspace = "/path/to/project"
//!
//! [tsserver]
//! tsdk = "node_modules/typescript/lib"
//! log = "verbose"
//! plugin_names = ["typescript-styled-plugin"]
//! ```
//!
//! `TSS_LOG`, `TSS_TRACE` and `TSS_DEBUG` override the matching `[tsserver]`
//! keys; see [`EnvOverrides`].

mod env;

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use tslink_client::ServiceConfig;

pub use env::EnvOverrides;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TslinkConfig {
    pub app: Option<AppConfig>,
    pub tsserver: Option<ServiceConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Project root handed to the worker. Defaults to the current directory.
    pub workspace: Option<PathBuf>,
}

impl TslinkConfig {
    /// Load `~/.tslink/config.toml`. A missing file is `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Worker settings with environment overrides applied.
    #[must_use]
    pub fn service_config(&self, overrides: &EnvOverrides) -> ServiceConfig {
        let mut config = self.tsserver.clone().unwrap_or_default();
        overrides.apply(&mut config);
        config
    }

    #[must_use]
    pub fn workspace(&self) -> Option<&Path> {
        self.app.as_ref()?.workspace.as_deref()
    }
}

fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tslink").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tslink_client::{LogLevel, RequestFraming, TraceLevel};

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = TslinkConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let (_dir, path) = write_config("");
        let config = TslinkConfig::load_from(&path).unwrap().unwrap();
        assert!(config.tsserver.is_none());
        assert_eq!(
            config.service_config(&EnvOverrides::default()),
            ServiceConfig::default()
        );
    }

    #[test]
    fn tsserver_section_parses() {
        let (_dir, path) = write_config(
            r#"
[app]
workspace = "/work/project"

[tsserver]
tsdk = "node_modules/typescript/lib"
log = "verbose"
trace = "messages"
plugin_names = ["a", "b"]
disable_automatic_type_acquisition = true
request_framing = "content_length"

[tsserver.compiler_options_for_inferred_projects]
strict = true
"#,
        );
        let config = TslinkConfig::load_from(&path).unwrap().unwrap();
        assert_eq!(config.workspace(), Some(Path::new("/work/project")));

        let tsserver = config.service_config(&EnvOverrides::default());
        assert_eq!(
            tsserver.tsdk.as_deref(),
            Some(Path::new("node_modules/typescript/lib"))
        );
        assert_eq!(tsserver.log, LogLevel::Verbose);
        assert_eq!(tsserver.trace, TraceLevel::Messages);
        assert_eq!(tsserver.plugin_names, vec!["a", "b"]);
        assert!(tsserver.disable_automatic_type_acquisition);
        assert_eq!(tsserver.request_framing, RequestFraming::ContentLength);
        let options = tsserver.compiler_options_for_inferred_projects.unwrap();
        assert_eq!(options.get("strict"), Some(&serde_json::Value::Bool(true)));
        // Unset keys keep their defaults.
        assert_eq!(tsserver.host_info.as_deref(), Some("tslink"));
    }

    #[test]
    fn env_overrides_win_over_file() {
        let (_dir, path) = write_config("[tsserver]\nlog = \"terse\"\n");
        let config = TslinkConfig::load_from(&path).unwrap().unwrap();
        let overrides = EnvOverrides::from_lookup(|key| match key {
            "TSS_LOG" => Some("off".to_string()),
            "TSS_DEBUG" => Some("9229".to_string()),
            _ => None,
        });
        let tsserver = config.service_config(&overrides);
        assert_eq!(tsserver.log, LogLevel::Off);
        assert_eq!(tsserver.debug_port, Some(9229));
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let (_dir, path) = write_config("[tsserver\nlog = 1");
        let err = TslinkConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), &path);
    }

    #[test]
    fn unreadable_path_is_read_error() {
        // A directory exists but cannot be read as a file.
        let dir = tempfile::tempdir().unwrap();
        let err = TslinkConfig::load_from(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
