//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. System config: `/etc/netfence/config.toml`
//! 2. User config: `~/.config/netfence/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority, merged by the caller)
//!
//! Lists (`allow`, `services`) are **merged** (appended).
//! Scalars (ttl, log_level) are **overridden**.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::Config;

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/netfence/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "netfence";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with support for hierarchy merging.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Load and merge configuration from all file sources.
    ///
    /// Missing system and user files are skipped. A file named explicitly
    /// with `--config` must exist. If no file is found at all the load
    /// fails: running without an allowlist is never what was meant.
    pub fn load(&self, extra: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        let mut found = false;

        if let Some(system_config) = self.load_file(&self.system_path)? {
            config.merge(system_config);
            found = true;
            debug!("Loaded system config from {:?}", self.system_path);
        } else {
            debug!("No system config found at {:?}", self.system_path);
        }

        if let Some(user_config) = self.load_file(&self.user_path)? {
            config.merge(user_config);
            found = true;
            debug!("Loaded user config from {:?}", self.user_path);
        } else {
            debug!("No user config found at {:?}", self.user_path);
        }

        if let Some(path) = extra {
            match self.load_file(path)? {
                Some(extra_config) => {
                    config.merge(extra_config);
                    found = true;
                    debug!("Loaded additional config from {:?}", path);
                }
                None => {
                    // Unlike system/user config, a missing CLI-specified config is an error
                    return Err(ConfigError::ReadError {
                        path: path.to_path_buf(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            }
        }

        if !found {
            return Err(ConfigError::NotFound {
                searched: vec![self.system_path.clone(), self.user_path.clone()],
            });
        }

        Ok(config)
    }

    /// Load a single config file, returning None if it doesn't exist.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let mut config: Config =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        path: path.to_path_buf(),
                        source: e,
                    })?;

                if let Some(file) = config.allowlist_file.take() {
                    config.allowlist_file = Some(relative_to(path, file));
                }
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

/// Resolve `file` against the directory containing `config_path`.
fn relative_to(config_path: &Path, file: PathBuf) -> PathBuf {
    if file.is_absolute() {
        return file;
    }
    match config_path.parent() {
        Some(dir) => dir.join(file),
        None => file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn loader_in(dir: &Path) -> ConfigLoader {
        ConfigLoader::with_paths(dir.join("system.toml"), dir.join("user.toml"))
    }

    #[test]
    fn test_no_config_anywhere_is_error() {
        let dir = tempdir().unwrap();
        let err = loader_in(dir.path()).load(None).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { ref searched } if searched.len() == 2));
    }

    #[test]
    fn test_user_config_overrides_system() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("system.toml"),
            r#"
            [resolver]
            ttl = 60

            [[allow]]
            domain = "github.com"
            proxy_address = "10.100.1.10"
            "#,
        )
        .unwrap();
        fs::write(
            dir.path().join("user.toml"),
            r#"
            [resolver]
            ttl = 10

            [[allow]]
            domain = "pypi.org"
            proxy_address = "10.100.1.15"
            "#,
        )
        .unwrap();

        let config = loader_in(dir.path()).load(None).unwrap();
        assert_eq!(config.resolver.ttl, Some(10));
        assert_eq!(config.allow.len(), 2);
    }

    #[test]
    fn test_extra_config_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let err = loader_in(dir.path()).load(Some(&missing)).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn test_extra_config_alone_is_enough() {
        let dir = tempdir().unwrap();
        let extra = dir.path().join("extra.toml");
        fs::write(&extra, "[general]\nlog_level = \"debug\"\n").unwrap();

        let config = loader_in(dir.path()).load(Some(&extra)).unwrap();
        assert_eq!(config.general.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("system.toml"), "[resolver\nttl = ").unwrap();
        let err = loader_in(dir.path()).load(None).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_allowlist_file_relative_to_config() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("conf.d");
        fs::create_dir(&sub).unwrap();
        let extra = sub.join("netfence.toml");
        fs::write(&extra, "allowlist_file = \"hosts.allowlist\"\n").unwrap();

        let config = loader_in(dir.path()).load(Some(&extra)).unwrap();
        assert_eq!(config.allowlist_file, Some(sub.join("hosts.allowlist")));
    }
}
