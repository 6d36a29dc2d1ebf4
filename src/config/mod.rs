use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::api::paging::PagingPolicy;
use crate::error::SetupError;

/// Environment variable holding the Datafordeler API key.
pub const API_KEY_VAR: &str = "BBR_API_KEY";

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileConfig {
    /// Plan collections and log.txt
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Building tables
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default)]
    pub plandata: PlandataConfig,
    #[serde(default)]
    pub datafordeler: DatafordelerConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            results_dir: default_results_dir(),
            plandata: PlandataConfig::default(),
            datafordeler: DatafordelerConfig::default(),
        }
    }
}

fn default_plandata_url() -> String {
    "https://indberet.plandata.dk/plandata-api/offentlig".to_string()
}

fn default_plandata_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlandataConfig {
    #[serde(default = "default_plandata_url")]
    pub base_url: String,
    #[serde(default = "default_plandata_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PlandataConfig {
    fn default() -> Self {
        Self {
            base_url: default_plandata_url(),
            timeout_secs: default_plandata_timeout_secs(),
        }
    }
}

impl PlandataConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Plandata pages are requested back to back and a failed page is not
    /// retried. The envelope's `pageCount` is the only bound.
    pub fn paging(&self) -> PagingPolicy {
        PagingPolicy::fail_fast(usize::MAX)
    }
}

fn default_datafordeler_url() -> String {
    "https://graphql.datafordeler.dk".to_string()
}
fn default_register() -> String {
    "BBR".to_string()
}
fn default_version() -> String {
    "v1".to_string()
}
fn default_datafordeler_timeout_secs() -> u64 {
    120
}
fn default_page_size() -> u32 {
    100
}
fn default_page_delay_ms() -> u64 {
    500
}
fn default_max_pages() -> usize {
    1000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatafordelerConfig {
    #[serde(default = "default_datafordeler_url")]
    pub base_url: String,
    #[serde(default = "default_register")]
    pub register: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_datafordeler_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Never read from the config file, see [`api_key_from_env`].
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for DatafordelerConfig {
    fn default() -> Self {
        Self {
            base_url: default_datafordeler_url(),
            register: default_register(),
            version: default_version(),
            timeout_secs: default_datafordeler_timeout_secs(),
            page_size: default_page_size(),
            page_delay_ms: default_page_delay_ms(),
            max_pages: default_max_pages(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            api_key: None,
        }
    }
}

impl DatafordelerConfig {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn paging(&self) -> PagingPolicy {
        PagingPolicy {
            delay: Duration::from_millis(self.page_delay_ms),
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
            max_pages: self.max_pages,
        }
    }

    /// The configured key, or [`SetupError::MissingApiKey`] when absent or blank.
    pub fn require_api_key(&self) -> Result<&str, SetupError> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(SetupError::MissingApiKey),
        }
    }
}

/// Read the API key once at startup so clients never touch the environment.
pub fn api_key_from_env() -> Option<String> {
    std::env::var(API_KEY_VAR).ok().filter(|k| !k.trim().is_empty())
}

impl FileConfig {
    /// First parseable config file from the search paths, if any.
    pub fn load() -> Option<Self> {
        for path in get_config_paths() {
            if !path.exists() {
                continue;
            }
            match Self::load_from(&path) {
                Ok(config) => return Some(config),
                Err(e) => warn!("Ignoring config file: {}", e),
            }
        }
        None
    }

    pub fn load_from(path: &Path) -> Result<Self, SetupError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SetupError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| SetupError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("log.txt")
    }
}

/// Working-directory files first, then the per-user config directory.
fn get_config_paths() -> Vec<PathBuf> {
    let local = ["planbbr.toml", ".planbbr.toml"].map(PathBuf::from);
    let user = dirs::config_dir().map(|dir| dir.join("planbbr").join("config.toml"));
    local.into_iter().chain(user).collect()
}
