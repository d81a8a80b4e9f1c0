//! Configuration file loading and parsing

use crate::error::{Error, Result};
use crate::types::{RetryPolicy, StrataConfigFile, SubstitutionRule};
use crate::utils::default_cache_dir;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::time::Duration;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "STRATA_CONFIG";

/// Configuration file names to search for
const CONFIG_FILE_NAMES: &[&str] = &["strata.yaml", "strata.yml"];

/// Loaded Strata configuration
#[derive(Debug, Clone, Default)]
pub struct StrataConfig {
    /// The parsed configuration
    pub config: StrataConfigFile,

    /// Path of the file the configuration was read from, if any
    pub config_path: Option<Utf8PathBuf>,
}

impl StrataConfig {
    /// Load configuration.
    ///
    /// An explicit `path` (or `STRATA_CONFIG`) must exist. Without one, the
    /// current directory and its parents are searched for `strata.yaml`; when
    /// nothing is found the defaults are used.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let explicit = path
            .map(Utf8Path::to_owned)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(Utf8PathBuf::from));

        let found = match explicit {
            Some(p) => {
                let content = fs::read_to_string(&p).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        Error::config_not_found(p.as_str())
                    } else {
                        Error::Io(e)
                    }
                })?;
                Some((p, content))
            }
            None => Self::find_config()?,
        };

        match found {
            Some((config_path, content)) => {
                let config = Self::parse(&content)?;
                tracing::debug!("Loaded configuration from {}", config_path);
                Ok(Self {
                    config,
                    config_path: Some(config_path),
                })
            }
            None => {
                tracing::debug!("No strata.yaml found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse and validate configuration content
    pub fn parse(content: &str) -> Result<StrataConfigFile> {
        let config: StrataConfigFile = serde_yaml_ng::from_str(content)?;
        if config.pipe_buffer_bytes == 0 {
            return Err(Error::invalid_config("pipe-buffer-bytes must be greater than 0"));
        }
        if config.max_concurrent_reconciles == 0 {
            return Err(Error::invalid_config(
                "max-concurrent-reconciles must be greater than 0",
            ));
        }
        Ok(config)
    }

    /// Find a configuration file in the current directory or its parents
    fn find_config() -> Result<Option<(Utf8PathBuf, String)>> {
        let cwd = std::env::current_dir().map_err(Error::Io)?;
        let cwd = Utf8PathBuf::try_from(cwd)
            .map_err(|_| Error::invalid_config("Current directory path is not valid UTF-8"))?;
        Self::find_config_from(&cwd)
    }

    fn find_config_from(start: &Utf8Path) -> Result<Option<(Utf8PathBuf, String)>> {
        let mut current = start;
        loop {
            for name in CONFIG_FILE_NAMES {
                let path = current.join(name);
                if path.exists() {
                    let content = fs::read_to_string(&path)?;
                    return Ok(Some((path, content)));
                }
            }

            match current.parent() {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }

    /// Directory extracted blueprints are mirrored to, if configured
    pub fn cache_dir(&self) -> Option<&Utf8Path> {
        self.config.cache_dir.as_deref()
    }

    /// Configured cache directory or the per-user default
    pub fn cache_dir_or_default(&self) -> Utf8PathBuf {
        self.config
            .cache_dir
            .clone()
            .unwrap_or_else(default_cache_dir)
    }

    pub fn pipe_buffer_bytes(&self) -> usize {
        self.config.pipe_buffer_bytes
    }

    pub fn max_concurrent_reconciles(&self) -> usize {
        self.config.max_concurrent_reconciles
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.config.resync_interval_secs)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.config.retry
    }

    pub fn substitutions(&self) -> &[SubstitutionRule] {
        &self.config.substitutions
    }

    /// Serialize the configuration to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(&self.config)?)
    }
}
