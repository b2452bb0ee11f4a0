//! Service configuration
//!
//! Read from an optional file, then overlaid by `COSTWATCH_*` environment
//! variables (`__` separates nested keys). Every key has a default.

use anyhow::{bail, Context, Result};
use costwatch_core::pricing::{
    PricingConfig, Rates, DEFAULT_CPU_HOURLY_RATE, DEFAULT_MEMORY_GB_HOURLY_RATE,
};
use costwatch_core::{RetryPolicy, SqliteStore};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "COSTWATCH";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Name attached to every structured log record
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Explicit kubeconfig; in-cluster or default discovery when unset
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    #[serde(default = "default_interval")]
    pub collector_interval_secs: u64,

    #[serde(default = "default_interval")]
    pub calculator_interval_secs: u64,

    #[serde(default = "default_cpu_hourly_rate")]
    pub cpu_hourly_rate: f64,

    #[serde(default = "default_memory_gb_hourly_rate")]
    pub memory_gb_hourly_rate: f64,

    #[serde(default)]
    pub default_node_hourly_rate: f64,

    /// Node hourly rate by instance type
    #[serde(default)]
    pub node_hourly_rates: HashMap<String, f64>,

    #[serde(default)]
    pub namespace_rates: HashMap<String, Rates>,

    /// Pod label naming the owning deployment; no attribution when unset
    #[serde(default)]
    pub deployment_label: Option<String>,

    #[serde(default)]
    pub active_pod_window_secs: Option<u64>,

    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,

    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_initial_backoff")]
    pub retry_initial_backoff_ms: u64,

    #[serde(default = "default_retry_max_backoff")]
    pub retry_max_backoff_ms: u64,

    /// Port of the health and metrics server
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_cluster_name() -> String {
    std::env::var("CLUSTER_NAME").unwrap_or_else(|_| "default".to_string())
}

fn default_database_url() -> String {
    "sqlite:costwatch.db?mode=rwc".to_string()
}

fn default_interval() -> u64 {
    300
}

fn default_cpu_hourly_rate() -> f64 {
    DEFAULT_CPU_HOURLY_RATE
}

fn default_memory_gb_hourly_rate() -> f64 {
    DEFAULT_MEMORY_GB_HOURLY_RATE
}

fn default_source_timeout() -> u64 {
    30
}

fn default_store_timeout() -> u64 {
    10
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_backoff() -> u64 {
    500
}

fn default_retry_max_backoff() -> u64 {
    5000
}

fn default_api_port() -> u16 {
    8080
}

impl AppConfig {
    /// Load and validate configuration from the file (if any) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_sources(path, None)
    }

    /// `env` replaces the process environment when given
    pub(crate) fn from_sources(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .context("failed to read configuration")?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the services cannot run with
    pub fn validate(&self) -> Result<()> {
        if !self.database_url.starts_with("sqlite:") {
            bail!("database_url must be a sqlite: URL, got {:?}", self.database_url);
        }
        SqliteStore::parse_url(&self.database_url)
            .with_context(|| format!("invalid database_url {:?}", self.database_url))?;

        // Namespace overrides are not checked here; a bad one only skips its own groups
        self.pricing()
            .validate()
            .map_err(|reason| anyhow::anyhow!("invalid pricing: {reason}"))?;

        for (key, value) in [
            ("collector_interval_secs", self.collector_interval_secs),
            ("calculator_interval_secs", self.calculator_interval_secs),
            ("source_timeout_secs", self.source_timeout_secs),
            ("store_timeout_secs", self.store_timeout_secs),
        ] {
            if value == 0 {
                bail!("{key} must be greater than zero");
            }
        }
        if self.active_pod_window_secs == Some(0) {
            bail!("active_pod_window_secs must be greater than zero when set");
        }
        if self.retry_max_attempts == 0 {
            bail!("retry_max_attempts must be at least 1");
        }
        if self.deployment_label.as_deref().is_some_and(|l| l.trim().is_empty()) {
            bail!("deployment_label must not be empty when set");
        }

        Ok(())
    }

    pub fn pricing(&self) -> PricingConfig {
        PricingConfig {
            rates: Rates {
                cpu_hourly_rate: self.cpu_hourly_rate,
                memory_gb_hourly_rate: self.memory_gb_hourly_rate,
            },
            namespace_rates: self.namespace_rates.clone(),
            node_hourly_rates: self.node_hourly_rates.clone(),
            default_node_hourly_rate: self.default_node_hourly_rate,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_backoff: Duration::from_millis(self.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry_max_backoff_ms),
            attempt_timeout: Duration::from_secs(self.source_timeout_secs),
        }
    }

    pub fn collector_interval(&self) -> Duration {
        Duration::from_secs(self.collector_interval_secs)
    }

    pub fn calculator_interval(&self) -> Duration {
        Duration::from_secs(self.calculator_interval_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn active_pod_window(&self) -> Option<Duration> {
        self.active_pod_window_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_sources(None, env(&[])).unwrap();

        assert_eq!(config.database_url, "sqlite:costwatch.db?mode=rwc");
        assert_eq!(config.collector_interval(), Duration::from_secs(300));
        assert_eq!(config.calculator_interval(), Duration::from_secs(300));
        assert_eq!(config.cpu_hourly_rate, 0.031);
        assert_eq!(config.memory_gb_hourly_rate, 0.004);
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.deployment_label, None);
        assert_eq!(config.active_pod_window(), None);
        assert_eq!(config.retry_policy().max_attempts, 3);
        assert_eq!(config.retry_policy().attempt_timeout, Duration::from_secs(30));
        assert_eq!(config.store_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_file_values() {
        let file = write_config(
            r#"
database_url = "sqlite::memory:"
collector_interval_secs = 60
deployment_label = "app.kubernetes.io/name"
default_node_hourly_rate = 0.05

[node_hourly_rates]
n2-standard-4 = 0.19

[namespace_rates.gpu]
cpu_hourly_rate = 0.9
memory_gb_hourly_rate = 0.01
"#,
        );

        let config = AppConfig::from_sources(Some(file.path()), env(&[])).unwrap();

        assert_eq!(config.collector_interval(), Duration::from_secs(60));
        assert_eq!(config.calculator_interval(), Duration::from_secs(300));
        assert_eq!(
            config.deployment_label.as_deref(),
            Some("app.kubernetes.io/name")
        );

        let pricing = config.pricing();
        assert_eq!(pricing.node_hourly_rate("n2-standard-4"), 0.19);
        assert_eq!(pricing.node_hourly_rate("e2-small"), 0.05);
        assert_eq!(pricing.rates_for("gpu").cpu_hourly_rate, 0.9);
        assert_eq!(pricing.rates_for("default").cpu_hourly_rate, 0.031);
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_config("calculator_interval_secs = 120\n");

        let config = AppConfig::from_sources(
            Some(file.path()),
            env(&[
                ("COSTWATCH_CALCULATOR_INTERVAL_SECS", "600"),
                ("COSTWATCH_ACTIVE_POD_WINDOW_SECS", "3600"),
            ]),
        )
        .unwrap();

        assert_eq!(config.calculator_interval(), Duration::from_secs(600));
        assert_eq!(config.active_pod_window(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_rejects_non_sqlite_url() {
        let err = AppConfig::from_sources(
            None,
            env(&[("COSTWATCH_DATABASE_URL", "postgres://localhost/costs")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("database_url"));
    }

    #[test]
    fn test_rejects_negative_rate() {
        let err = AppConfig::from_sources(None, env(&[("COSTWATCH_CPU_HOURLY_RATE", "-0.5")]))
            .unwrap_err();
        assert!(err.to_string().contains("invalid pricing"));
    }

    #[test]
    fn test_invalid_namespace_rates_do_not_block_startup() {
        let file = write_config(
            r#"
[namespace_rates.batch]
cpu_hourly_rate = -1.0
memory_gb_hourly_rate = 0.004
"#,
        );
        let config = AppConfig::from_sources(Some(file.path()), env(&[])).unwrap();

        let pricing = config.pricing();
        assert!(pricing.validate().is_ok());
        assert!(pricing.rates_for("batch").check().is_err());
        assert!(pricing.rates_for("shop").check().is_ok());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let err = AppConfig::from_sources(
            None,
            env(&[("COSTWATCH_COLLECTOR_INTERVAL_SECS", "0")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("collector_interval_secs"));
    }

    #[test]
    fn test_rejects_zero_retry_attempts() {
        let err = AppConfig::from_sources(None, env(&[("COSTWATCH_RETRY_MAX_ATTEMPTS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("retry_max_attempts"));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let result = AppConfig::from_sources(Some(Path::new("/nonexistent/costwatch.toml")), env(&[]));
        assert!(result.is_err());
    }
}
