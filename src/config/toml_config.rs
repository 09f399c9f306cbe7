use crate::core::orchestrator::{SyncConfig, MAX_LOOKAHEAD_DAYS};
use crate::core::retry::RetryConfig;
use crate::domain::model::Credentials;
use crate::domain::ports::CredentialProvider;
use crate::utils::error::{Result, SyncError};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range,
    validate_url, Validate,
};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    pub remote: RemoteSettings,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub cache: CacheSection,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub customer_key: String,
    pub timeout_seconds: Option<u64>,
}

// 密碼與 customer key 不進日誌
impl std::fmt::Debug for RemoteSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSettings")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"***")
            .field("customer_key", &"***")
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSection {
    pub interval_minutes: Option<u64>,
    pub lookahead_days: Option<u32>,
    pub auto_sync: Option<bool>,
    pub fallback_enabled: Option<bool>,
    pub operating_days: Option<Vec<String>>,
    pub history_limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSection {
    pub directory: Option<String>,
}

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_CACHE_DIR: &str = "./cache";

impl SyncSettings {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(SyncError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| SyncError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${EHR_PASSWORD})，未設定的保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| SyncError::ConfigError {
            message: format!("Invalid placeholder pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_url("remote.endpoint", &self.remote.endpoint)?;

        for (field, value) in [
            ("remote.username", &self.remote.username),
            ("remote.password", &self.remote.password),
            ("remote.customer_key", &self.remote.customer_key),
        ] {
            validate_non_empty_string(field, value)?;
            // 環境變數沒有設定時，佔位符會原樣留下
            if value.starts_with("${") {
                return Err(SyncError::MissingCredential {
                    field: field.to_string(),
                });
            }
        }

        if let Some(timeout) = self.remote.timeout_seconds {
            validate_positive_number("remote.timeout_seconds", timeout, 1)?;
        }
        if let Some(interval) = self.sync.interval_minutes {
            validate_positive_number("sync.interval_minutes", interval, 1)?;
        }
        if let Some(days) = self.sync.lookahead_days {
            validate_range("sync.lookahead_days", days, 1, MAX_LOOKAHEAD_DAYS)?;
        }
        if let Some(limit) = self.sync.history_limit {
            validate_positive_number("sync.history_limit", limit as u64, 1)?;
        }
        if let Some(attempts) = self.retry.max_attempts {
            validate_range("retry.max_attempts", attempts, 1, 10)?;
        }
        if let Some(multiplier) = self.retry.backoff_multiplier {
            validate_range("retry.backoff_multiplier", multiplier, 1.0, 10.0)?;
        }
        if let Some(directory) = &self.cache.directory {
            validate_path("cache.directory", directory)?;
        }

        self.operating_days()?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS))
    }

    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(
            self.cache
                .directory
                .as_deref()
                .unwrap_or(DEFAULT_CACHE_DIR),
        )
    }

    /// `None` 代表使用預設的週一至週五
    fn operating_days(&self) -> Result<Option<Vec<Weekday>>> {
        let Some(days) = &self.sync.operating_days else {
            return Ok(None);
        };

        days.iter()
            .map(|day| {
                day.parse::<Weekday>()
                    .map_err(|_| SyncError::InvalidConfigValueError {
                        field: "sync.operating_days".to_string(),
                        value: day.clone(),
                        reason: "Expected a weekday name such as \"mon\" or \"friday\"".to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    pub fn retry_config(&self) -> RetryConfig {
        let defaults = RetryConfig::default();
        RetryConfig::new(self.retry.max_attempts.unwrap_or(defaults.max_attempts))
            .with_initial_delay(
                self.retry
                    .initial_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.initial_delay),
            )
            .with_max_delay(
                self.retry
                    .max_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.max_delay),
            )
            .with_backoff_multiplier(
                self.retry
                    .backoff_multiplier
                    .unwrap_or(defaults.backoff_multiplier),
            )
    }

    pub fn to_sync_config(&self) -> Result<SyncConfig> {
        let defaults = SyncConfig::default();

        let config = SyncConfig {
            interval: self
                .sync
                .interval_minutes
                .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)))
                .unwrap_or(defaults.interval),
            lookahead_days: self.sync.lookahead_days.unwrap_or(defaults.lookahead_days),
            auto_sync: self.sync.auto_sync.unwrap_or(defaults.auto_sync),
            fallback_enabled: self
                .sync
                .fallback_enabled
                .unwrap_or(defaults.fallback_enabled),
            operating_days: self.operating_days()?.unwrap_or(defaults.operating_days),
            history_limit: self.sync.history_limit.unwrap_or(defaults.history_limit),
            retry: self.retry_config(),
        };
        config.validate()?;
        Ok(config)
    }
}

impl CredentialProvider for SyncSettings {
    fn credentials(&self) -> Result<Credentials> {
        Credentials::new(
            self.remote.endpoint.as_str(),
            self.remote.username.as_str(),
            self.remote.password.as_str(),
            self.remote.customer_key.as_str(),
        )
    }
}

impl Validate for SyncSettings {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
[remote]
endpoint = "https://webservice.example.com/services/KareoServices.svc"
username = "front-desk@example.com"
password = "secret"
customer_key = "ck-123"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let settings = SyncSettings::from_toml_str(MINIMAL).unwrap();
        settings.validate().unwrap();

        let config = settings.to_sync_config().unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(settings.timeout(), Duration::from_secs(30));
        assert_eq!(settings.cache_dir(), PathBuf::from("./cache"));
    }

    #[test]
    fn test_full_config_overrides_defaults() {
        let toml_content = format!(
            "{}{}",
            MINIMAL,
            r#"
[sync]
interval_minutes = 5
lookahead_days = 2
auto_sync = true
fallback_enabled = false
operating_days = ["mon", "wed", "sat"]
history_limit = 3

[retry]
max_attempts = 4
initial_delay_ms = 250
max_delay_ms = 2000
backoff_multiplier = 3.0

[cache]
directory = "/var/lib/ehr-sync"
"#
        );

        let settings = SyncSettings::from_toml_str(&toml_content).unwrap();
        settings.validate().unwrap();
        let config = settings.to_sync_config().unwrap();

        assert_eq!(config.interval, Duration::from_secs(300));
        assert_eq!(config.lookahead_days, 2);
        assert!(config.auto_sync);
        assert!(!config.fallback_enabled);
        assert_eq!(
            config.operating_days,
            vec![Weekday::Mon, Weekday::Wed, Weekday::Sat]
        );
        assert_eq!(config.history_limit, 3);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_delay, Duration::from_millis(2000));
        assert_eq!(settings.cache_dir(), PathBuf::from("/var/lib/ehr-sync"));
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("EHR_SYNC_TEST_PASSWORD", "from-env");

        let toml_content = MINIMAL.replace("\"secret\"", "\"${EHR_SYNC_TEST_PASSWORD}\"");
        let settings = SyncSettings::from_toml_str(&toml_content).unwrap();
        assert_eq!(settings.remote.password, "from-env");

        std::env::remove_var("EHR_SYNC_TEST_PASSWORD");
    }

    #[test]
    fn test_unset_placeholder_is_missing_credential() {
        let toml_content = MINIMAL.replace("\"ck-123\"", "\"${EHR_SYNC_UNSET_CUSTOMER_KEY}\"");
        let settings = SyncSettings::from_toml_str(&toml_content).unwrap();

        assert!(matches!(
            settings.validate(),
            Err(SyncError::MissingCredential { field }) if field == "remote.customer_key"
        ));
    }

    #[test]
    fn test_config_validation() {
        let invalid_url = MINIMAL.replace("https://webservice.example.com/services/KareoServices.svc", "not-a-url");
        assert!(SyncSettings::from_toml_str(&invalid_url)
            .unwrap()
            .validate()
            .is_err());

        let bad_day = format!("{}\n[sync]\noperating_days = [\"someday\"]\n", MINIMAL);
        assert!(matches!(
            SyncSettings::from_toml_str(&bad_day).unwrap().validate(),
            Err(SyncError::InvalidConfigValueError { .. })
        ));
    }

    #[test]
    fn test_settings_supply_credentials() {
        let settings = SyncSettings::from_toml_str(MINIMAL).unwrap();
        let credentials = settings.credentials().unwrap();
        assert_eq!(credentials.customer_key(), "ck-123");
        assert!(!format!("{:?}", settings).contains("secret"));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(MINIMAL.as_bytes()).unwrap();

        let settings = SyncSettings::from_file(temp_file.path()).unwrap();
        assert_eq!(settings.remote.username, "front-desk@example.com");
    }
}
