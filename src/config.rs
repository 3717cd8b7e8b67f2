//! Engine configuration.
//!
//! Defaults reproduce the community's reference rules: 80% approval quorum,
//! rejection once approval is out of reach, loans may overdraw the pool,
//! members start with 10000.00 and the pool with 100000.00.
//!
//! A JSON file can override any subset of fields; `COMMONPOOL_*` environment
//! variables override the file.

use ledger::Money;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE_ENV: &str = "COMMONPOOL_CONFIG_FILE";

#[derive(Debug)]
pub enum ConfigError {
    FileRead(String),
    Parse(String),
    InvalidEnvVar(String, String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileRead(msg) => write!(f, "Failed to read config file: {}", msg),
            Self::Parse(msg) => write!(f, "Failed to parse config: {}", msg),
            Self::InvalidEnvVar(var, value) => {
                write!(f, "Invalid value for environment variable {}: {}", var, value)
            }
            Self::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// When a pending request is rejected by vote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RejectionRule {
    /// Reject as soon as the remaining eligible voters can no longer supply
    /// `votes_required` approvals.
    Impossibility,
    /// Reject once `ceil(eligible * threshold)` members have rejected.
    Threshold { threshold: f64 },
}

/// What happens when an approved loan exceeds the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundPolicy {
    AllowNegative,
    RejectIfInsufficient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fraction of eligible voters whose approval is required, in (0, 1].
    pub approval_threshold: f64,
    pub rejection_rule: RejectionRule,
    pub fund_policy: FundPolicy,
    /// Balance given to newly registered members, in minor units.
    pub initial_balance: Money,
    /// Pool balance used when the store holds no fund yet, in minor units.
    pub initial_fund: Money,
    pub store_retries: u32,
    pub store_timeout_ms: u64,
    pub retry_backoff_ms: u64,
    pub notify_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            approval_threshold: 0.8,
            rejection_rule: RejectionRule::Impossibility,
            fund_policy: FundPolicy::AllowNegative,
            initial_balance: Money::from_major(10_000),
            initial_fund: Money::from_major(100_000),
            store_retries: 3,
            store_timeout_ms: 2_000,
            retry_backoff_ms: 25,
            notify_timeout_ms: 5_000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvVar(var.to_string(), value)),
        Err(_) => Ok(None),
    }
}

fn env_money(var: &str) -> Result<Option<Money>, ConfigError> {
    match env_parse::<f64>(var)? {
        Some(amount) => Money::from_decimal(amount)
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidEnvVar(var.to_string(), amount.to_string())),
        None => Ok(None),
    }
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `COMMONPOOL_CONFIG_FILE` if set, then apply the individual
    /// `COMMONPOOL_*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base = match env::var(CONFIG_FILE_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        let config = base.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_parse("COMMONPOOL_APPROVAL_THRESHOLD")? {
            self.approval_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("COMMONPOOL_REJECTION_THRESHOLD")? {
            self.rejection_rule = RejectionRule::Threshold { threshold: v };
        }
        if let Ok(value) = env::var("COMMONPOOL_FUND_POLICY") {
            self.fund_policy = match value.trim() {
                "allow_negative" => FundPolicy::AllowNegative,
                "reject_if_insufficient" => FundPolicy::RejectIfInsufficient,
                _ => {
                    return Err(ConfigError::InvalidEnvVar(
                        "COMMONPOOL_FUND_POLICY".to_string(),
                        value,
                    ));
                }
            };
        }
        if let Some(v) = env_money("COMMONPOOL_INITIAL_BALANCE")? {
            self.initial_balance = v;
        }
        if let Some(v) = env_money("COMMONPOOL_INITIAL_FUND")? {
            self.initial_fund = v;
        }
        if let Some(v) = env_parse("COMMONPOOL_STORE_RETRIES")? {
            self.store_retries = v;
        }
        if let Some(v) = env_parse("COMMONPOOL_STORE_TIMEOUT_MS")? {
            self.store_timeout_ms = v;
        }
        if let Some(v) = env_parse("COMMONPOOL_RETRY_BACKOFF_MS")? {
            self.retry_backoff_ms = v;
        }
        if let Some(v) = env_parse("COMMONPOOL_NOTIFY_TIMEOUT_MS")? {
            self.notify_timeout_ms = v;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_range = |t: f64| t.is_finite() && t > 0.0 && t <= 1.0;

        if !in_range(self.approval_threshold) {
            return Err(ConfigError::Invalid(format!(
                "approval_threshold must be in (0, 1], got {}",
                self.approval_threshold
            )));
        }
        if let RejectionRule::Threshold { threshold } = self.rejection_rule {
            if !in_range(threshold) {
                return Err(ConfigError::Invalid(format!(
                    "rejection threshold must be in (0, 1], got {}",
                    threshold
                )));
            }
        }
        if self.initial_balance.is_negative() || self.initial_fund.is_negative() {
            return Err(ConfigError::Invalid(
                "initial balances cannot be negative".to_string(),
            ));
        }
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "store_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.approval_threshold, 0.8);
        assert_eq!(config.rejection_rule, RejectionRule::Impossibility);
        assert_eq!(config.fund_policy, FundPolicy::AllowNegative);
        assert_eq!(config.initial_fund, Money::from_major(100_000));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "approval_threshold": 0.5,
                "fund_policy": "reject_if_insufficient",
                "rejection_rule": { "rule": "threshold", "threshold": 0.2 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.approval_threshold, 0.5);
        assert_eq!(config.fund_policy, FundPolicy::RejectIfInsufficient);
        assert_eq!(
            config.rejection_rule,
            RejectionRule::Threshold { threshold: 0.2 }
        );
        assert_eq!(config.store_retries, 3);
    }

    #[test]
    fn test_out_of_range_threshold_is_rejected() {
        for threshold in [0.0, -0.1, 1.5, f64::NAN] {
            let config = EngineConfig {
                approval_threshold: threshold,
                ..EngineConfig::default()
            };
            assert!(config.validate().is_err(), "{} accepted", threshold);
        }
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("commonpool-{}.json", uuid::Uuid::now_v7()));
        let mut file = fs::File::create(&path).unwrap();
        write!(file, r#"{{ "initial_balance": 500000, "store_retries": 7 }}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.initial_balance, Money::from_major(5_000));
        assert_eq!(config.store_retries, 7);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(_)));
    }
}
