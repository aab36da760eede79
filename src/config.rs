//! Configuration Management
//!
//! Reads the arnscan configuration file: which accounts exist and which
//! credential profile reaches each of them, plus scan defaults.
//!
//! ```yaml
//! accounts:
//!   "123456789012": { profile: prod }
//!   "210987654321": { profile: staging }
//! concurrency: 4
//! record_path: ~/arnscan-fixtures
//! ```

use crate::aws::RetryPolicy;
use crate::locator::ScanOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Credentials for one account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Profile in the shared credentials file; ambient credentials when unset
    #[serde(default)]
    pub profile: Option<String>,
}

/// User configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Account id -> credentials; empty means single-account mode
    pub accounts: BTreeMap<String, AccountConfig>,
    pub scheme: String,
    pub provider: String,
    pub concurrency: usize,
    pub ordered: bool,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Replaces every regional endpoint (local emulators)
    pub endpoint_url: Option<String>,
    /// Directory where every backend result is recorded
    pub record_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accounts: BTreeMap::new(),
            scheme: "arn".to_string(),
            provider: "aws".to_string(),
            concurrency: 1,
            ordered: true,
            max_attempts: 5,
            retry_base_delay_ms: 200,
            endpoint_url: None,
            record_path: None,
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("ARNSCAN_CONFIG") {
            return Some(PathBuf::from(path));
        }

        dirs::config_dir().map(|p| p.join("arnscan").join("config.yaml"))
    }

    /// Load configuration from the default location; a missing file means defaults
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("no config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config {:?}", path))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut config: Config = serde_yaml::from_str(content)?;
        config.record_path = config.record_path.map(|p| expand_home(&p));
        Ok(config)
    }

    /// Configured account ids, sorted
    pub fn account_ids(&self) -> Vec<String> {
        self.accounts.keys().cloned().collect()
    }

    pub fn profile_for(&self, account: &str) -> Option<&str> {
        self.accounts.get(account).and_then(|a| a.profile.as_deref())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            concurrency: self.concurrency.max(1),
            ordered: self.ordered,
            retry: self.retry_policy(),
            record_path: self.record_path.clone(),
            cancel: None,
        }
    }
}

/// `~/x` -> `$HOME/x`
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
