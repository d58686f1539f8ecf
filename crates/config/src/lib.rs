//! Layered configuration for verdict.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults,
//! 2. `config.toml` in the platform config directory,
//! 3. an explicit file passed by the caller (format chosen by extension),
//! 4. `VERDICT_*` environment variables, with `__` separating sections
//!    (`VERDICT_API__KEY`, `VERDICT_LIMITS__QUOTA`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{Exn, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use verdict_reputation::{CredentialSource, DEFAULT_API_URL, DEFAULT_GUI_URL, Settings};

const ENV_PREFIX: &str = "VERDICT_";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub limits: LimitsConfig,
    pub transport: TransportConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub url: String,
    pub gui_url: String,
    pub user_agent: String,
}
impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            key: None,
            url: DEFAULT_API_URL.to_string(),
            gui_url: DEFAULT_GUI_URL.to_string(),
            user_agent: Settings::default().user_agent,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Requests allowed per window.
    pub quota: usize,
    pub window_secs: u64,
    /// Bytes.
    pub max_file_size: u64,
}
impl Default for LimitsConfig {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            quota: settings.quota,
            window_secs: settings.quota_window.as_secs(),
            max_file_size: settings.max_file_size,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub timeout_secs: u64,
    pub attempts: u32,
    pub retry_delay_ms: u64,
}
impl Default for TransportConfig {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            timeout_secs: settings.request_timeout.as_secs(),
            attempts: settings.attempts,
            retry_delay_ms: settings.retry_delay.as_millis() as u64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    /// Submit files the service doesn't know yet.
    pub upload_unknown: bool,
}
impl Default for AnalysisConfig {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            poll_interval_secs: settings.poll_interval.as_secs(),
            timeout_secs: settings.analysis_timeout.as_secs(),
            upload_unknown: settings.upload_unknown,
        }
    }
}

impl Config {
    /// Load from every source, including the user's config directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_from(user_config_file(), explicit)
    }

    /// Load with a specific user config file (or none) in place of the
    /// platform default.
    pub fn load_from(user_file: Option<PathBuf>, explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(user_file) = user_file {
            tracing::debug!(path = %user_file.display(), "Merging user config");
            figment = figment.merge(Toml::file(user_file));
        }
        if let Some(path) = explicit {
            figment = merge_file(figment, path)?;
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.url.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("api.url must not be empty"));
        }
        if self.api.gui_url.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("api.gui_url must not be empty"));
        }
        if self.limits.quota == 0 {
            exn::bail!(ErrorKind::Invalid("limits.quota must be at least 1"));
        }
        if self.limits.window_secs == 0 {
            exn::bail!(ErrorKind::Invalid("limits.window_secs must be at least 1"));
        }
        if self.limits.max_file_size == 0 {
            exn::bail!(ErrorKind::Invalid("limits.max_file_size must be at least 1"));
        }
        if self.transport.attempts == 0 {
            exn::bail!(ErrorKind::Invalid("transport.attempts must be at least 1"));
        }
        if self.analysis.poll_interval_secs == 0 {
            exn::bail!(ErrorKind::Invalid("analysis.poll_interval_secs must be at least 1"));
        }
        Ok(())
    }

    /// Client settings; the key travels separately via [`CredentialSource`].
    pub fn to_settings(&self) -> Settings {
        Settings {
            api_url: self.api.url.clone(),
            gui_url: self.api.gui_url.clone(),
            user_agent: self.api.user_agent.clone(),
            quota: self.limits.quota,
            quota_window: Duration::from_secs(self.limits.window_secs),
            max_file_size: self.limits.max_file_size,
            request_timeout: Duration::from_secs(self.transport.timeout_secs),
            attempts: self.transport.attempts,
            retry_delay: Duration::from_millis(self.transport.retry_delay_ms),
            poll_interval: Duration::from_secs(self.analysis.poll_interval_secs),
            analysis_timeout: Duration::from_secs(self.analysis.timeout_secs),
            upload_unknown: self.analysis.upload_unknown,
        }
    }
}

impl CredentialSource for Config {
    fn api_key(&self) -> Option<String> {
        self.api.key.clone().filter(|key| !key.trim().is_empty())
    }
}

fn user_config_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", "verdict").map(|dirs| dirs.config_dir().join("config.toml"))
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    if !path.is_file() {
        exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
    }
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    let figment = match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => return Err(Exn::from(ErrorKind::UnsupportedFormat(path.to_path_buf()))),
    };
    Ok(figment)
}
