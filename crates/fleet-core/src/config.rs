//! Control-plane configuration
//!
//! Loaded once at startup: defaults, then a TOML file, then `FLEET_*`
//! environment overrides, then validation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{FleetError, FleetResult};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "FLEET_";

/// Longest accepted pause between notification attempts
pub const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

/// Transaction settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Deadline for one transaction body, including allocation scans and rule evaluation
    pub timeout_ms: u64,
    /// Whole-transaction retries after a commit-time collision
    pub conflict_retries: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            conflict_retries: 3,
        }
    }
}

/// Remote agent settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Per-call timeout
    pub timeout_ms: u64,
    /// How long a host stays unavailable after a failed call
    pub cooldown_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            cooldown_secs: 60,
        }
    }
}

/// Client notification settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Push invalidations to client sessions at all
    pub enabled: bool,
    /// Delivery attempts per session per notification
    pub max_attempts: u32,
    /// Pause between attempts
    pub retry_backoff_ms: u64,
    /// Undelivered notifications at which a warning is logged, repeated at
    /// every further multiple
    pub backlog_warning: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            retry_backoff_ms: 100,
            backlog_warning: 1024,
        }
    }
}

/// Deletion settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletionConfig {
    /// Account names that can never be removed
    pub protected_accounts: Vec<String>,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            protected_accounts: vec!["root".to_string()],
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Transaction settings
    pub transaction: TransactionConfig,
    /// Remote agent settings
    pub remote: RemoteConfig,
    /// Client notification settings
    pub notify: NotifyConfig,
    /// Deletion settings
    pub deletion: DeletionConfig,
    /// Allocation policy table file
    pub policy_file: Option<PathBuf>,
}

impl FleetConfig {
    /// Parse from TOML text
    pub fn from_toml_str(content: &str) -> FleetResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a TOML file
    pub fn load_from_file(path: &Path) -> FleetResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FleetError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        if let (Some(policy), Some(dir)) = (config.policy_file.as_ref(), path.parent()) {
            if policy.is_relative() {
                config.policy_file = Some(dir.join(policy));
            }
        }
        Ok(config)
    }

    /// Full startup load: file (if any), environment, validation
    pub fn load(path: Option<&Path>) -> FleetResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.merge_with_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FLEET_*` environment overrides
    pub fn merge_with_env(&mut self) -> FleetResult<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply overrides from `(name, value)` pairs; names without the prefix are ignored
    pub fn merge_with_vars<I>(&mut self, vars: I) -> FleetResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key = key.to_ascii_lowercase();
            let dotted = match key.split_once('_') {
                Some(("policy", "file")) => "policy_file".to_string(),
                Some((section, field)) => format!("{section}.{field}"),
                None => key,
            };
            self.set_from_string(&dotted, &value)?;
        }
        Ok(())
    }

    /// Set one value by dotted key (`remote.timeout_ms`)
    pub fn set_from_string(&mut self, key: &str, value: &str) -> FleetResult<()> {
        match key {
            "transaction.timeout_ms" => self.transaction.timeout_ms = parse(key, value)?,
            "transaction.conflict_retries" => {
                self.transaction.conflict_retries = parse(key, value)?;
            }
            "remote.timeout_ms" => self.remote.timeout_ms = parse(key, value)?,
            "remote.cooldown_secs" => self.remote.cooldown_secs = parse(key, value)?,
            "notify.enabled" => self.notify.enabled = parse(key, value)?,
            "notify.max_attempts" => self.notify.max_attempts = parse(key, value)?,
            "notify.retry_backoff_ms" => self.notify.retry_backoff_ms = parse(key, value)?,
            "notify.backlog_warning" => self.notify.backlog_warning = parse(key, value)?,
            "deletion.protected_accounts" => {
                self.deletion.protected_accounts = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            "policy_file" => self.policy_file = Some(PathBuf::from(value)),
            other => {
                tracing::warn!(key = other, "ignoring unknown configuration key");
            }
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> FleetResult<()> {
        if self.transaction.timeout_ms == 0 {
            return Err(FleetError::config("transaction.timeout_ms must be positive"));
        }
        if self.remote.timeout_ms == 0 {
            return Err(FleetError::config("remote.timeout_ms must be positive"));
        }
        if self.notify.enabled && self.notify.max_attempts == 0 {
            return Err(FleetError::config(
                "notify.max_attempts must be at least 1 when notifications are enabled",
            ));
        }
        if self.notify.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
            return Err(FleetError::config(format!(
                "notify.retry_backoff_ms must not exceed {MAX_RETRY_BACKOFF_MS}"
            )));
        }
        if self.notify.backlog_warning == 0 {
            return Err(FleetError::config("notify.backlog_warning must be positive"));
        }
        Ok(())
    }

    /// Transaction deadline as a duration
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction.timeout_ms)
    }

    /// Remote call timeout as a duration
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote.timeout_ms)
    }

    /// Host cooldown as a duration
    pub fn host_cooldown(&self) -> Duration {
        Duration::from_secs(self.remote.cooldown_secs)
    }

    /// Notification retry pause as a duration
    pub fn notify_backoff(&self) -> Duration {
        Duration::from_millis(self.notify.retry_backoff_ms)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> FleetResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| FleetError::config(format!("Invalid value '{value}' for {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = FleetConfig::from_toml_str(
            r#"
            [remote]
            cooldown_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.remote.cooldown_secs, 5);
        assert_eq!(config.remote.timeout_ms, RemoteConfig::default().timeout_ms);
        assert_eq!(config.transaction, TransactionConfig::default());
    }

    #[test]
    fn env_overrides_map_to_sections() {
        let mut config = FleetConfig::default();
        config
            .merge_with_vars([
                ("FLEET_REMOTE_TIMEOUT_MS".to_string(), "250".to_string()),
                ("FLEET_NOTIFY_ENABLED".to_string(), "false".to_string()),
                ("FLEET_POLICY_FILE".to_string(), "/etc/fleet/policy.toml".to_string()),
                ("FLEET_DELETION_PROTECTED_ACCOUNTS".to_string(), "root, ops".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ])
            .unwrap();

        assert_eq!(config.remote.timeout_ms, 250);
        assert!(!config.notify.enabled);
        assert_eq!(config.policy_file, Some(PathBuf::from("/etc/fleet/policy.toml")));
        assert_eq!(config.deletion.protected_accounts, vec!["root", "ops"]);
    }

    #[test]
    fn bad_override_value_is_a_config_error() {
        let mut config = FleetConfig::default();
        let err = config
            .merge_with_vars([("FLEET_REMOTE_TIMEOUT_MS".to_string(), "soon".to_string())])
            .unwrap_err();
        assert_matches!(err, FleetError::Config { .. });
    }

    #[test]
    fn zero_timeouts_fail_validation() {
        let mut config = FleetConfig::default();
        config.transaction.timeout_ms = 0;
        assert_matches!(config.validate(), Err(FleetError::Config { .. }));
    }

    #[test]
    fn notification_backoff_is_bounded() {
        let mut config = FleetConfig::default();
        config
            .merge_with_vars([("FLEET_NOTIFY_RETRY_BACKOFF_MS".to_string(), u64::MAX.to_string())])
            .unwrap();
        assert_matches!(config.validate(), Err(FleetError::Config { .. }));

        config.notify.retry_backoff_ms = MAX_RETRY_BACKOFF_MS;
        assert!(config.validate().is_ok());
        config.notify.backlog_warning = 0;
        assert_matches!(config.validate(), Err(FleetError::Config { .. }));
    }

    #[test]
    fn relative_policy_path_resolves_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "policy_file = \"policy.toml\"").unwrap();

        let config = FleetConfig::load_from_file(&path).unwrap();
        assert_eq!(config.policy_file, Some(dir.path().join("policy.toml")));
    }
}
