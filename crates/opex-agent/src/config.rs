//! Agent configuration
//!
//! Read once from `KOA_*` environment variables, validated, then split
//! into the settings of each component.

use anyhow::{bail, Context, Result};
use opex_lib::collector::{ClientConfig, SamplerConfig, DEFAULT_REQUEST_TIMEOUT};
use opex_lib::{AnalyticsConfig, CostModel};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

const ENV_PREFIX: &str = "KOA";

/// Token mounted into every pod running under a service account
const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Cluster API base URL
    #[serde(default = "default_api_endpoint")]
    pub k8s_api_endpoint: String,

    #[serde(default = "default_true")]
    pub k8s_api_verify_ssl: bool,

    /// Bearer token; the service account token is used when unset
    #[serde(default)]
    pub k8s_auth_token: Option<String>,

    /// Series store directory
    #[serde(default)]
    pub db_location: Option<PathBuf>,

    #[serde(default = "default_polling_interval")]
    pub polling_interval_sec: u64,

    #[serde(default = "default_cost_model")]
    pub cost_model: String,

    #[serde(default = "default_currency")]
    pub billing_currency_symbol: String,

    #[serde(default)]
    pub billing_hourly_rate: Option<f64>,

    #[serde(default)]
    pub enable_debug: bool,

    /// Root of the published artifacts, written under `<dir>/data`
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

fn default_api_endpoint() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_true() -> bool {
    true
}

fn default_polling_interval() -> u64 {
    300
}

fn default_cost_model() -> String {
    CostModel::default().to_string()
}

fn default_currency() -> String {
    "$".to_string()
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("./static")
}

impl AgentConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_vars(None)
    }

    /// Load configuration from `vars` instead of the process environment
    /// when given
    pub fn from_vars(vars: Option<config::Map<String, String>>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(vars),
            )
            .build()
            .context("Failed to read KOA_* environment")?;

        config
            .try_deserialize()
            .context("Failed to parse KOA_* environment")
    }

    /// Reject settings the agent cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.polling_interval_sec == 0 {
            bail!("KOA_POLLING_INTERVAL_SEC must be greater than zero");
        }

        let cost_model = self.cost_model()?;
        if cost_model == CostModel::ChargeBack && self.billing_rate().is_none() {
            bail!("invalid billing hourly rate for CHARGE_BACK cost allocation, set KOA_BILLING_HOURLY_RATE to a positive value");
        }

        if self.billing_hourly_rate.is_some() && self.billing_rate().is_none() {
            warn!(
                billing_hourly_rate = ?self.billing_hourly_rate,
                "Ignoring non-positive billing hourly rate"
            );
        }
        Ok(())
    }

    pub fn cost_model(&self) -> Result<CostModel> {
        self.cost_model
            .parse()
            .context("Invalid KOA_COST_MODEL")
    }

    /// Configured hourly rate when positive
    pub fn billing_rate(&self) -> Option<f64> {
        self.billing_hourly_rate.filter(|rate| *rate > 0.0)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_sec)
    }

    pub fn db_location(&self) -> PathBuf {
        self.db_location.clone().unwrap_or_else(|| {
            let home = std::env::var_os("HOME").unwrap_or_else(|| ".".into());
            PathBuf::from(home).join(".kube-opex-analytics").join("db")
        })
    }

    pub fn data_dir(&self) -> PathBuf {
        self.static_dir.join("data")
    }

    /// Token from the environment, else the service account token file
    pub fn auth_token(&self) -> Option<String> {
        if let Some(token) = self.k8s_auth_token.as_ref().filter(|t| !t.is_empty()) {
            return Some(token.clone());
        }

        match std::fs::read_to_string(SERVICE_ACCOUNT_TOKEN) {
            Ok(token) => Some(token.trim().to_string()),
            Err(e) => {
                debug!(path = SERVICE_ACCOUNT_TOKEN, error = %e, "No service account token");
                None
            }
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.k8s_api_endpoint.clone(),
            verify_tls: self.k8s_api_verify_ssl,
            token: self.auth_token(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            interval: self.polling_interval(),
            billing_hourly_rate: self.billing_rate(),
        }
    }

    pub fn analytics_config(&self) -> Result<AnalyticsConfig> {
        Ok(AnalyticsConfig {
            cost_model: self.cost_model()?,
            include_billing_in_trends: self.enable_debug,
        })
    }
}
