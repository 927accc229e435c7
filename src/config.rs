//! Scanner configuration.
//!
//! [`ScannerConfig`] holds every knob of a [`DependencyScanner`](crate::DependencyScanner).
//! It can be loaded from a TOML file, where any omitted field takes its
//! default, and changed at runtime with a [`ConfigUpdate`].
//!
//! # Configuration Location
//!
//! - Linux: `~/.config/depscan/config.toml`
//! - macOS: `~/Library/Application Support/depscan/config.toml`
//! - Windows: `%APPDATA%\depscan\config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! project_root = "."
//! audit_timeout_ms = 30000
//! enable_cache = true
//! cache_ttl_ms = 900000
//! enable_parallel_processing = true
//! max_retries = 3
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration snapshot for a scanner.
///
/// Treated as immutable once handed to a scanner; updates replace the whole
/// snapshot.
///
/// # Example
///
/// ```
/// use depscan::ScannerConfig;
///
/// let config: ScannerConfig = toml::from_str("max_retries = 5").unwrap();
/// assert_eq!(config.max_retries, 5);
/// assert!(config.enable_cache);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Directory containing `package.json`; commands run here.
    pub project_root: PathBuf,

    /// Executable used for `audit` and `outdated`.
    pub npm_command: String,

    pub audit_timeout_ms: u64,
    pub outdated_timeout_ms: u64,

    /// Budget for the whole scan, across all operations and retries.
    pub scan_timeout_ms: u64,

    pub enable_cache: bool,
    pub cache_ttl_ms: u64,
    pub cache_dir: PathBuf,

    /// Lets a forced refresh still reuse fresh `npm-audit`/`npm-outdated` entries.
    pub reuse_sub_results_on_refresh: bool,

    pub enable_parallel_processing: bool,
    pub max_concurrent_operations: usize,

    /// Total attempts per operation, including the first.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_fallback_methods: bool,

    pub verbose_logging: bool,

    /// When set, alerts are POSTed here as JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_webhook_url: Option<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            npm_command: default_npm_command().to_string(),
            audit_timeout_ms: 30_000,
            outdated_timeout_ms: 30_000,
            scan_timeout_ms: 120_000,
            enable_cache: true,
            cache_ttl_ms: 15 * 60 * 1000,
            cache_dir: default_cache_dir(),
            reuse_sub_results_on_refresh: false,
            enable_parallel_processing: true,
            max_concurrent_operations: 3,
            max_retries: 3,
            retry_delay_ms: 1_000,
            enable_fallback_methods: true,
            verbose_logging: false,
            alert_webhook_url: None,
        }
    }
}

fn default_npm_command() -> &'static str {
    if cfg!(target_os = "windows") {
        "npm.cmd"
    } else {
        "npm"
    }
}

/// Platform cache directory for scan results, `./.depscan-cache` if unknown.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("depscan"))
        .unwrap_or_else(|| PathBuf::from(".depscan-cache"))
}

impl ScannerConfig {
    pub fn audit_timeout(&self) -> Duration {
        Duration::from_millis(self.audit_timeout_ms)
    }

    pub fn outdated_timeout(&self) -> Duration {
        Duration::from_millis(self.outdated_timeout_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.project_root.join("package.json")
    }

    /// Loads the configuration file, or defaults if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: ScannerConfig = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Saves the configuration, creating the parent directory if needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("depscan")
            .join("config.toml")
    }

    pub fn generate_default_config() -> String {
        toml::to_string_pretty(&ScannerConfig::default()).unwrap_or_default()
    }
}

/// A partial configuration. `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub project_root: Option<PathBuf>,
    pub npm_command: Option<String>,
    pub audit_timeout_ms: Option<u64>,
    pub outdated_timeout_ms: Option<u64>,
    pub scan_timeout_ms: Option<u64>,
    pub enable_cache: Option<bool>,
    pub cache_ttl_ms: Option<u64>,
    pub cache_dir: Option<PathBuf>,
    pub reuse_sub_results_on_refresh: Option<bool>,
    pub enable_parallel_processing: Option<bool>,
    pub max_concurrent_operations: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub enable_fallback_methods: Option<bool>,
    pub verbose_logging: Option<bool>,
    pub alert_webhook_url: Option<String>,
}

macro_rules! merge_fields {
    ($update:expr, $config:expr, $changed:expr, [$($field:ident),* $(,)?]) => {
        $(
            if let Some(value) = $update.$field.clone() {
                if $config.$field != value {
                    $changed.push(stringify!($field));
                }
                $config.$field = value;
            }
        )*
    };
}

impl ConfigUpdate {
    /// Applies this update over `config`, returning the names of fields whose value changed.
    pub fn apply_to(&self, config: &mut ScannerConfig) -> Vec<&'static str> {
        let mut changed = Vec::new();

        merge_fields!(
            self,
            config,
            changed,
            [
                project_root,
                npm_command,
                audit_timeout_ms,
                outdated_timeout_ms,
                scan_timeout_ms,
                enable_cache,
                cache_ttl_ms,
                cache_dir,
                reuse_sub_results_on_refresh,
                enable_parallel_processing,
                max_concurrent_operations,
                max_retries,
                retry_delay_ms,
                enable_fallback_methods,
                verbose_logging,
            ]
        );

        if let Some(url) = &self.alert_webhook_url {
            if config.alert_webhook_url.as_ref() != Some(url) {
                changed.push("alert_webhook_url");
            }
            config.alert_webhook_url = Some(url.clone());
        }

        changed
    }
}
