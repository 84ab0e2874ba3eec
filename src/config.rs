use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "GRIEVANCE_PORTAL_CONFIG";
const BIND_ADDR_ENV: &str = "GRIEVANCE_PORTAL_BIND_ADDR";
const DATA_DIR_ENV: &str = "GRIEVANCE_PORTAL_DATA_DIR";
const API_KEY_ENV: &str = "MESSAGEBIRD_API_KEY";
const ORIGINATOR_ENV: &str = "MESSAGEBIRD_ORIGINATOR";
const ENDPOINT_ENV: &str = "MESSAGEBIRD_ENDPOINT";

/// Sessions outlive a restart but never a year.
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 366;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortalConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub store_timeout_ms: u64,
    pub session_ttl_hours: i64,
    pub admin_emails: Vec<String>,
    pub notify_on_status_change: bool,
    pub sms: SmsConfig,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            data_dir: PathBuf::from("data"),
            store_timeout_ms: 5_000,
            session_ttl_hours: 24 * 7,
            admin_emails: Vec::new(),
            notify_on_status_change: false,
            sms: SmsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmsConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub originator: Option<String>,
    pub timeout_ms: u64,
    pub country_code: String,
    pub helpline: String,
    pub max_message_chars: usize,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://rest.messagebird.com/messages".to_string(),
            api_key: None,
            originator: None,
            timeout_ms: 10_000,
            country_code: "+91".to_string(),
            helpline: "1800-425-1456".to_string(),
            max_message_chars: 100,
        }
    }
}

impl PortalConfig {
    /// Defaults, then the YAML file if one is given, then environment overrides.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&self.session_ttl_hours) {
            return Err(AppError::Validation(format!(
                "sessionTtlHours must be between 1 and {}, got {}",
                MAX_SESSION_TTL_HOURS, self.session_ttl_hours
            )));
        }
        if self.sms.timeout_ms == 0 {
            return Err(AppError::Validation("sms.timeoutMs must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn from_yaml_file(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| AppError::Internal(format!("Unable to read config {}: {}", path.display(), err)))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> AppResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|err| AppError::Internal(format!("Invalid config: {}", err)))
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(bind_addr) = lookup(BIND_ADDR_ENV) {
            self.bind_addr = bind_addr;
        }
        if let Some(data_dir) = lookup(DATA_DIR_ENV) {
            self.data_dir = PathBuf::from(data_dir);
        }
        if let Some(api_key) = lookup(API_KEY_ENV) {
            self.sms.api_key = Some(api_key);
        }
        if let Some(originator) = lookup(ORIGINATOR_ENV) {
            self.sms.originator = Some(originator);
        }
        if let Some(endpoint) = lookup(ENDPOINT_ENV) {
            self.sms.endpoint = endpoint;
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("portal.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl SmsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
