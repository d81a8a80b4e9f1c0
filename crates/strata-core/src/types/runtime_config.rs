//! Runtime configuration types (strata.yaml)

use super::component::RepositoryContext;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Contents of strata.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StrataConfigFile {
    /// Directory extracted blueprints are mirrored to
    #[serde(default)]
    pub cache_dir: Option<Utf8PathBuf>,

    /// Capacity of the blob fetch pipe in bytes
    #[serde(default = "default_pipe_buffer_bytes")]
    pub pipe_buffer_bytes: usize,

    /// Upper bound of concurrently running reconciles
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,

    /// Interval of the periodic resync of all objects
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    /// Retry policy for conflicting or failing reconciles
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Component substitutions applied while resolving references
    #[serde(default)]
    pub substitutions: Vec<SubstitutionRule>,
}

impl Default for StrataConfigFile {
    fn default() -> Self {
        Self {
            cache_dir: None,
            pipe_buffer_bytes: default_pipe_buffer_bytes(),
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            resync_interval_secs: default_resync_interval_secs(),
            retry: RetryPolicy::default(),
            substitutions: Vec::new(),
        }
    }
}

fn default_pipe_buffer_bytes() -> usize {
    64 * 1024
}
fn default_max_concurrent_reconciles() -> usize {
    5
}
fn default_resync_interval_secs() -> u64 {
    300
}

/// How often a failed reconcile is attempted again and how long to wait.
///
/// `max-delay-ms` also spaces out the requeue of objects whose reconcile
/// kept failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPolicy {
    /// Attempts per reconcile, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub strategy: RetryStrategy,

    /// Growth factor of `exponential-backoff`
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Delay after the first failure
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound of every delay, before jitter
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: RetryStrategy::default(),
            backoff_multiplier: default_backoff_multiplier(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_initial_delay() -> u64 {
    100
}
fn default_max_delay() -> u64 {
    5000
}

/// Growth of the delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategy {
    /// Retry immediately
    None,

    FixedDelay,

    #[default]
    ExponentialBackoff,

    /// `initial-delay-ms` times the attempt number
    LinearBackoff,
}

/// Redirects a component reference to another name, version or repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstitutionRule {
    pub component_name: String,

    /// Only match this version; any version when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub substitution: Substitution,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Substitution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_context: Option<RepositoryContext>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.strategy, RetryStrategy::ExponentialBackoff);
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_config_file_defaults_from_empty_yaml() {
        let config: StrataConfigFile = serde_yaml_ng::from_str("{}").unwrap();
        assert_eq!(config.pipe_buffer_bytes, 64 * 1024);
        assert_eq!(config.max_concurrent_reconciles, 5);
        assert_eq!(config.resync_interval_secs, 300);
        assert!(config.cache_dir.is_none());
        assert!(config.substitutions.is_empty());
    }

    #[test]
    fn test_config_file_kebab_case() {
        let config: StrataConfigFile = serde_yaml_ng::from_str(
            r#"
cache-dir: /var/cache/strata
pipe-buffer-bytes: 1024
retry:
  max-attempts: 5
  strategy: fixed-delay
substitutions:
- componentName: example.com/a
  version: v1.0.0
  substitution:
    version: v1.0.1
"#,
        )
        .unwrap();
        assert_eq!(config.cache_dir.as_deref(), Some(camino::Utf8Path::new("/var/cache/strata")));
        assert_eq!(config.pipe_buffer_bytes, 1024);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.strategy, RetryStrategy::FixedDelay);
        assert_eq!(
            config.substitutions[0].substitution.version.as_deref(),
            Some("v1.0.1")
        );
    }
}
