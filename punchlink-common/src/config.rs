//! Configuration loading
//!
//! Resolution order, highest first:
//! 1. Command-line arguments (applied by the binary)
//! 2. Environment variables
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! A missing default config file is not an error. Empty values are treated as
//! unset.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::model::Environment;
use crate::{Error, Result};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_TENANT: &str = "default";
pub const DEFAULT_DEVICE_TIMEOUT_SECS: u64 = 10;
/// Upload path appended to the backend base URL
pub const UPLOAD_PATH: &str = "/attendance/upload";
/// Login path appended to the backend base URL
pub const LOGIN_PATH: &str = "/auth/login";

/// Backend routing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub dev_url: Option<String>,
    pub prod_url: Option<String>,
    /// Environment used by interactive requests that name none
    pub default_environment: Environment,
    /// Value of the `x-tenant` header
    pub tenant: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            dev_url: None,
            prod_url: None,
            default_environment: Environment::Dev,
            tenant: DEFAULT_TENANT.to_string(),
        }
    }
}

impl BackendConfig {
    /// Base URL for `env` with any trailing slash removed
    pub fn base_url(&self, env: Environment) -> Option<&str> {
        let url = match env {
            Environment::Dev => self.dev_url.as_deref(),
            Environment::Prod => self.prod_url.as_deref(),
        }?;
        let url = url.trim().trim_end_matches('/');
        if url.is_empty() {
            None
        } else {
            Some(url)
        }
    }

    pub fn upload_url(&self, env: Environment) -> Option<String> {
        self.base_url(env).map(|base| format!("{}{}", base, UPLOAD_PATH))
    }

    pub fn login_url(&self, env: Environment) -> Option<String> {
        self.base_url(env).map(|base| format!("{}{}", base, LOGIN_PATH))
    }
}

/// Automated ingestion (webhook and iClock push)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmsConfig {
    /// Webhook API key; `None` disables the check
    pub api_key: Option<String>,
    /// Bearer token for automated forwards; `None` sends unauthenticated
    pub service_token: Option<String>,
    pub default_environment: Environment,
}

/// Links to the HRMS web frontends, shown to the operator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HrmsUrls {
    pub dev: Option<String>,
    pub prod: Option<String>,
}

/// Fully resolved relay configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendConfig,
    pub adms: AdmsConfig,
    pub hrms: HrmsUrls,
    /// Device addresses offered to the operator (`host[:port]`)
    pub devices: Vec<String>,
    pub device_timeout: Duration,
    /// Device communication key (0 when the device has none)
    pub device_comm_key: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            backend: BackendConfig::default(),
            adms: AdmsConfig::default(),
            hrms: HrmsUrls::default(),
            devices: Vec::new(),
            device_timeout: Duration::from_secs(DEFAULT_DEVICE_TIMEOUT_SECS),
            device_comm_key: 0,
        }
    }
}

/// On-disk TOML layout; every field optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub devices: Vec<String>,
    pub device_timeout_secs: Option<u64>,
    pub device_comm_key: Option<u32>,
    pub backend: TomlBackend,
    pub adms: TomlAdms,
    pub hrms: TomlHrms,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlBackend {
    pub dev_url: Option<String>,
    pub prod_url: Option<String>,
    pub default_environment: Option<String>,
    pub tenant: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlAdms {
    pub api_key: Option<String>,
    pub service_token: Option<String>,
    pub default_environment: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlHrms {
    pub dev_url: Option<String>,
    pub prod_url: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

impl RelayConfig {
    /// Load from TOML and the process environment
    ///
    /// An explicit `path` must exist; the default path may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let toml_config = match path {
            Some(path) => TomlConfig::read(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => TomlConfig::read(&path)?,
                Some(path) => {
                    warn!("No config file at {} (using defaults)", path.display());
                    TomlConfig::default()
                }
                None => {
                    warn!("Could not determine config directory (using defaults)");
                    TomlConfig::default()
                }
            },
        };

        let mut config = Self::from_toml(toml_config);
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::InvalidInput("port must be non-zero".to_string()));
        }
        if self.device_timeout.is_zero() {
            return Err(Error::InvalidInput("device timeout must be at least one second".to_string()));
        }
        Ok(())
    }

    /// Compiled defaults overlaid with a TOML document
    pub fn from_toml(toml: TomlConfig) -> Self {
        let mut config = Self::default();

        if let Some(host) = non_empty(toml.host) {
            config.host = host;
        }
        if let Some(port) = toml.port {
            config.port = port;
        }
        config.devices = toml.devices.into_iter().filter_map(|d| non_empty(Some(d))).collect();
        if let Some(secs) = toml.device_timeout_secs {
            config.device_timeout = Duration::from_secs(secs);
        }
        if let Some(key) = toml.device_comm_key {
            config.device_comm_key = key;
        }

        config.backend.dev_url = non_empty(toml.backend.dev_url);
        config.backend.prod_url = non_empty(toml.backend.prod_url);
        if let Some(env) = non_empty(toml.backend.default_environment) {
            config.backend.default_environment = Environment::parse(&env);
        }
        if let Some(tenant) = non_empty(toml.backend.tenant) {
            config.backend.tenant = tenant;
        }

        config.adms.api_key = non_empty(toml.adms.api_key);
        config.adms.service_token = non_empty(toml.adms.service_token);
        if let Some(env) = non_empty(toml.adms.default_environment) {
            config.adms.default_environment = Environment::parse(&env);
        }

        config.hrms.dev = non_empty(toml.hrms.dev_url);
        config.hrms.prod = non_empty(toml.hrms.prod_url);

        config
    }

    /// Overlay environment variables read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));

        if let Some(host) = get("PUNCHLINK_HOST") {
            self.host = host;
        }
        if let Some(port) = get("PUNCHLINK_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!("Ignoring invalid PUNCHLINK_PORT={}", port),
            }
        }
        if let Some(url) = get("DEV_BACKEND_URL") {
            self.backend.dev_url = Some(url);
        }
        if let Some(url) = get("PROD_BACKEND_URL") {
            self.backend.prod_url = Some(url);
        }
        if let Some(env) = get("DEFAULT_ENV") {
            self.backend.default_environment = Environment::parse(&env);
        }
        if let Some(tenant) = get("BACKEND_TENANT") {
            self.backend.tenant = tenant;
        }
        if let Some(key) = get("ADMS_API_KEY") {
            self.adms.api_key = Some(key);
        }
        if let Some(token) = get("ADMS_SERVICE_TOKEN") {
            self.adms.service_token = Some(token);
        }
        if let Some(env) = get("ADMS_DEFAULT_ENV") {
            self.adms.default_environment = Environment::parse(&env);
        }
        if let Some(url) = get("DEV_HRMS_URL") {
            self.hrms.dev = Some(url);
        }
        if let Some(url) = get("PROD_HRMS_URL") {
            self.hrms.prod = Some(url);
        }
        if let Some(secs) = get("DEVICE_TIMEOUT_SECS") {
            match secs.parse() {
                Ok(secs) => self.device_timeout = Duration::from_secs(secs),
                Err(_) => warn!("Ignoring invalid DEVICE_TIMEOUT_SECS={}", secs),
            }
        }

        let env_devices: Vec<String> = ["DEVICE_IP_1", "DEVICE_IP_2"]
            .iter()
            .filter_map(|key| get(key))
            .collect();
        if !env_devices.is_empty() {
            self.devices = env_devices;
        }
    }

    /// Log the effective configuration without secrets
    pub fn log_summary(&self) {
        info!("Listening address: {}:{}", self.host, self.port);
        info!(
            "Backend: dev={} prod={} (default {})",
            self.backend.dev_url.as_deref().unwrap_or("<unset>"),
            self.backend.prod_url.as_deref().unwrap_or("<unset>"),
            self.backend.default_environment
        );
        info!(
            "ADMS: api key {}, service token {}, default environment {}",
            if self.adms.api_key.is_some() { "configured" } else { "not configured" },
            if self.adms.service_token.is_some() { "configured" } else { "not configured" },
            self.adms.default_environment
        );
        if self.adms.api_key.is_none() {
            warn!("No ADMS API key configured: webhook accepts unauthenticated requests");
        }
    }
}

impl TomlConfig {
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}

/// Platform config file location (`<config dir>/punchlink/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("punchlink").join("config.toml"))
}
