//! Harness configuration

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::snapshot::Variables;

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Identity of the environment the resources under test live in
    pub identity: IdentityConfig,

    /// Default polling budgets
    pub polling: PollingConfig,
}

/// Environment-discovered identifiers, substituted into templated fixtures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Account owning the resources under test
    pub account_id: String,

    /// Region the resources are provisioned in
    pub region: String,

    /// Cloud partition used when constructing resource names
    pub partition: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            account_id: "000000000000".to_string(),
            region: "us-east-1".to_string(),
            partition: "aws".to_string(),
        }
    }
}

/// Default budgets for convergence waits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Probe attempts per wait, including the first
    pub max_attempts: usize,

    /// Seconds between probe attempts
    pub interval_secs: u64,

    /// Overall budget for queue message waits, in seconds
    pub receive_timeout_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval_secs: 10,
            receive_timeout_secs: 60,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Defaults overridden by `VIGIL_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(account_id) = std::env::var("VIGIL_ACCOUNT_ID") {
            config.identity.account_id = account_id;
        }
        if let Ok(region) = std::env::var("VIGIL_REGION") {
            config.identity.region = region;
        }
        if let Ok(partition) = std::env::var("VIGIL_PARTITION") {
            config.identity.partition = partition;
        }
        if let Some(max_attempts) = env_number("VIGIL_MAX_ATTEMPTS") {
            config.polling.max_attempts = max_attempts;
        }
        if let Some(interval_secs) = env_number("VIGIL_POLL_INTERVAL_SECS") {
            config.polling.interval_secs = interval_secs;
        }
        if let Some(receive_timeout_secs) = env_number("VIGIL_RECEIVE_TIMEOUT_SECS") {
            config.polling.receive_timeout_secs = receive_timeout_secs;
        }
        config
    }

    /// Sleep between probe attempts.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_secs)
    }

    /// Overall budget for queue message waits.
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.polling.receive_timeout_secs)
    }

    /// The configured attempt budget as an abort-on-first-error policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.polling.max_attempts, self.poll_interval())
    }

    /// Fixture template variables derived from the identity section.
    pub fn template_vars(&self) -> Variables {
        Variables::new()
            .set("AccountId", &self.identity.account_id)
            .set("Region", &self.identity.region)
            .set("Partition", &self.identity.partition)
    }
}

fn env_number<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring {}: '{}' is not a number", name, raw);
            None
        }
    }
}
