use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

/// Name of the job that drives the reconciliation cycle.
pub const POLL_GVMS_BY_MRN_JOB: &str = "poll_gvms_by_mrn";

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub store: StoreKind,
    #[validate]
    pub polling: PollingConfig,
    #[validate]
    pub gvms: GvmsConfig,
    #[validate]
    pub publisher: PublisherConfig,
    /// Cron expression (with seconds) per job name
    pub jobs: HashMap<String, String>,
    #[validate(range(min = 1))]
    pub jobs_stop_timeout_secs: u64,
    pub features: FeatureFlags,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct PollingConfig {
    #[validate(range(min = 1, max = 10000))]
    pub max_poll_size: i64,
    #[validate(range(min = 1))]
    pub expiry_days: i64,
    #[validate(length(min = 1))]
    pub terminal_state: String,
}

impl PollingConfig {
    pub fn expiry(&self) -> chrono::Duration {
        chrono::Duration::days(self.expiry_days)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_poll_size: 500,
            expiry_days: 30,
            terminal_state: "COMPLETED".to_string(),
        }
    }
}

#[derive(Deserialize, Clone, Validate)]
pub struct GvmsConfig {
    #[validate(url)]
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
}

impl GvmsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl std::fmt::Debug for GvmsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GvmsConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct PublisherConfig {
    /// Fan-out endpoint. When absent, matched GMRs are only logged.
    pub endpoint: Option<String>,
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: usize,
    pub backoff_ms: u64,
    #[validate(range(min = 1, max = 10))]
    pub batch_ceiling: usize,
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
}

impl PublisherConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_attempts: 4,
            backoff_ms: 1000,
            batch_ceiling: 10,
            timeout_secs: 30,
        }
    }
}

#[derive(Deserialize, Clone, Default)]
pub struct FeatureFlags {
    pub enable_gmr_polling: bool,
    pub enable_dev_endpoints: bool,
    pub dev_username: Option<String>,
    pub dev_password: Option<String>,
}

impl std::fmt::Debug for FeatureFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureFlags")
            .field("enable_gmr_polling", &self.enable_gmr_polling)
            .field("enable_dev_endpoints", &self.enable_dev_endpoints)
            .field("dev_username", &self.dev_username)
            .field("dev_password", &self.dev_password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Config {
    /// Load from environment variables (`__` separates nested keys) over defaults.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(config::Environment::default().separator("__").try_parsing(true))
    }

    fn from_source<S>(source: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .set_default("database_url", "postgresql://localhost/gmr_finder")?
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("store", "postgres")?
            .set_default("polling.max_poll_size", 500)?
            .set_default("polling.expiry_days", 30)?
            .set_default("polling.terminal_state", "COMPLETED")?
            .set_default("gvms.base_url", "https://test-api.service.hmrc.gov.uk")?
            .set_default("gvms.client_id", "")?
            .set_default("gvms.client_secret", "")?
            .set_default("gvms.timeout_secs", 30)?
            .set_default("publisher.max_attempts", 4)?
            .set_default("publisher.backoff_ms", 1000)?
            .set_default("publisher.batch_ceiling", 10)?
            .set_default("publisher.timeout_secs", 30)?
            .set_default(format!("jobs.{POLL_GVMS_BY_MRN_JOB}"), "0 */1 * * * *")?
            .set_default("jobs_stop_timeout_secs", 30)?
            .set_default("features.enable_gmr_polling", true)?
            .set_default("features.enable_dev_endpoints", false)?
            .add_source(source)
            .build()?
            .try_deserialize()
    }

    pub fn jobs_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.jobs_stop_timeout_secs)
    }
}
