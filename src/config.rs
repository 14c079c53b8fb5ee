use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::duration::deserialize_duration;

/// Environment variable carrying the portal login identifier.
pub const LOGIN_ENV: &str = "CONTAFETCH_LOGIN";
/// Environment variable carrying the portal password.
pub const PASSWORD_ENV: &str = "CONTAFETCH_PASSWORD";
/// Environment variable overriding the browser executable.
pub const BROWSER_ENV: &str = "CONTAFETCH_BROWSER";

/// Browser launch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Explicit browser executable. Falls back to `CONTAFETCH_BROWSER`,
    /// then to well-known install locations.
    pub executable: Option<PathBuf>,

    /// Run without a visible window.
    pub headless: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
        }
    }
}

/// Where the portal lives and how to recognize a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalSettings {
    pub login_url: String,

    pub invoices_url: String,

    /// Substring of the post-login landing URL.
    pub landing_marker: String,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            login_url: "https://contaonline.claro.com.br/webbow/login/initPJ_oqe.do".to_string(),
            invoices_url: "https://contaonline.claro.com.br/webbow/downloadPDF/init.do"
                .to_string(),
            landing_marker: "bemVindoPJ.do".to_string(),
        }
    }
}

fn default_element_wait() -> Duration {
    Duration::from_secs(10)
}

fn default_window_wait() -> Duration {
    Duration::from_secs(10)
}

fn default_dialog_wait() -> Duration {
    Duration::from_secs(5)
}

fn default_page_ready() -> Duration {
    Duration::from_secs(5)
}

fn default_download() -> Duration {
    Duration::from_secs(60)
}

fn default_settle() -> Duration {
    Duration::from_secs(1)
}

fn default_download_start() -> Duration {
    Duration::from_secs(2)
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

/// Bounded waits and grace periods for the driven UI.
///
/// The settle pauses are empirically chosen grace periods for the
/// portal's own re-rendering, not correctness guarantees; the bounded
/// waits are hard caps after which the current step counts as failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    /// Bound for locating an element that should already exist.
    #[serde(
        default = "default_element_wait",
        deserialize_with = "deserialize_duration"
    )]
    pub element_wait: Duration,

    /// Bound for the second window the portal opens on login.
    #[serde(
        default = "default_window_wait",
        deserialize_with = "deserialize_duration"
    )]
    pub window_wait: Duration,

    /// Bound for the optional post-login dialog.
    #[serde(
        default = "default_dialog_wait",
        deserialize_with = "deserialize_duration"
    )]
    pub dialog_wait: Duration,

    /// Bound for the invoice page's account selector after navigation.
    #[serde(
        default = "default_page_ready",
        deserialize_with = "deserialize_duration"
    )]
    pub page_ready: Duration,

    /// Bound for a triggered download to complete.
    #[serde(
        default = "default_download",
        deserialize_with = "deserialize_duration"
    )]
    pub download: Duration,

    /// Grace period after a selection for dependent controls to
    /// repopulate.
    #[serde(default = "default_settle", deserialize_with = "deserialize_duration")]
    pub settle: Duration,

    /// Grace period between the download click and the first staging
    /// scan.
    #[serde(
        default = "default_download_start",
        deserialize_with = "deserialize_duration"
    )]
    pub download_start: Duration,

    /// Attempts for operations that can hit a re-render race.
    pub retry_attempts: u32,

    /// Delay between those attempts.
    #[serde(
        default = "default_retry_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub retry_delay: Duration,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            element_wait: default_element_wait(),
            window_wait: default_window_wait(),
            dialog_wait: default_dialog_wait(),
            page_ready: default_page_ready(),
            download: default_download(),
            settle: default_settle(),
            download_start: default_download_start(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Path to the data directory. If relative, resolved from the
    /// config file location; if not specified, defaults to the config
    /// file's directory.
    pub data_dir: Option<PathBuf>,

    /// Browser launch settings.
    #[serde(default)]
    pub browser: BrowserSettings,

    /// Portal endpoints.
    #[serde(default)]
    pub portal: PortalSettings,

    /// Bounded waits and grace periods.
    #[serde(default)]
    pub timeouts: WaitSettings,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Resolve the data directory path.
    ///
    /// If `data_dir` is set and relative, it's resolved relative to
    /// `config_dir`; if unset, `config_dir` itself is used.
    pub fn resolve_data_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(data_dir) if data_dir.is_absolute() => data_dir.clone(),
            Some(data_dir) => config_dir.join(data_dir),
            None => config_dir.to_path_buf(),
        }
    }
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./contafetch.toml` if it exists in the current directory
/// 2. `<platform data dir>/contafetch/contafetch.toml`
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("contafetch.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("contafetch").join("contafetch.toml");
    }

    local_config
}

/// Loaded configuration with resolved directories.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Base data directory.
    pub data_dir: PathBuf,

    /// Where in-flight downloads land before archiving.
    pub staging_dir: PathBuf,

    /// Final location of named, collision-free invoice files.
    pub archive_dir: PathBuf,

    /// Rolling log files.
    pub logs_dir: PathBuf,

    pub browser: BrowserSettings,
    pub portal: PortalSettings,
    pub timeouts: WaitSettings,
}

impl ResolvedConfig {
    fn from_config(config: Config, config_dir: &Path) -> Self {
        let data_dir = config.resolve_data_dir(config_dir);
        Self {
            staging_dir: data_dir.join("staging"),
            archive_dir: data_dir.join("invoices"),
            logs_dir: data_dir.join("logs"),
            data_dir,
            browser: config.browser,
            portal: config.portal,
            timeouts: config.timeouts,
        }
    }

    /// Load and resolve config from a file path.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        let config = Config::load(&config_path)?;
        Ok(Self::from_config(config, config_dir))
    }

    /// Load config, using defaults when the file doesn't exist.
    ///
    /// Without a config file, the intended config directory doubles as
    /// the data directory.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            let config_path = if config_path.is_relative() {
                std::env::current_dir()
                    .context("Failed to get current directory")?
                    .join(config_path)
            } else {
                config_path.to_path_buf()
            };

            let config_dir = config_path
                .parent()
                .context("Config path has no parent directory")?;

            Ok(Self::from_config(Config::default(), config_dir))
        }
    }
}

/// Portal credentials, supplied by the environment only.
#[derive(Debug)]
pub struct Credentials {
    pub login: String,
    pub password: SecretString,
}

impl Credentials {
    /// Read credentials from the environment, failing fast with the
    /// variable name when one is missing.
    pub fn from_env() -> Result<Self> {
        let login =
            std::env::var(LOGIN_ENV).with_context(|| format!("{LOGIN_ENV} is not set"))?;
        let password = std::env::var(PASSWORD_ENV)
            .with_context(|| format!("{PASSWORD_ENV} is not set"))?;

        Ok(Self {
            login,
            password: password.into(),
        })
    }
}
