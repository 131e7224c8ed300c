use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::feed::{DEFAULT_RELEASES_URL, DEFAULT_RELEASE_PAGE};
use crate::sink::ExportFormat;

const DEFAULT_ENV_PREFIX: &str = "PAGESAVER";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub gate: GateSettings,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub url: String,
    #[serde(default = "default_release_page")]
    pub release_page: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_feed_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            release_page: default_release_page(),
            user_agent: default_user_agent(),
            timeout: default_feed_timeout(),
        }
    }
}

fn default_feed_url() -> String {
    DEFAULT_RELEASES_URL.to_string()
}

fn default_release_page() -> String {
    DEFAULT_RELEASE_PAGE.to_string()
}

fn default_user_agent() -> String {
    format!("pagesaver/{} (update-check)", crate::VERSION)
}

fn default_feed_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateSettings {
    #[serde(default = "default_check_interval", with = "humantime_serde")]
    pub check_interval: Duration,
    #[serde(default = "default_fail_open_delay", with = "humantime_serde")]
    pub fail_open_delay: Duration,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            fail_open_delay: default_fail_open_delay(),
        }
    }
}

fn default_check_interval() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_fail_open_delay() -> Duration {
    Duration::from_millis(1200)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureConfig {
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default = "default_download_dir")]
    pub download_dir: Option<PathBuf>,
    /// How long to wait for the viewer's mount point before giving up.
    #[serde(default = "default_mount_timeout", with = "humantime_serde")]
    pub mount_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            format: ExportFormat::default(),
            download_dir: default_download_dir(),
            mount_timeout: default_mount_timeout(),
        }
    }
}

fn default_download_dir() -> Option<PathBuf> {
    dirs::download_dir().map(|dir| dir.join("pagesaver"))
}

fn default_mount_timeout() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix)?);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Takes every value of `other` that differs from the built-in default.
fn merge_config(mut base: Config, other: Config) -> Config {
    let defaults = Config::default();

    if other.feed.url != defaults.feed.url {
        base.feed.url = other.feed.url;
    }
    if other.feed.release_page != defaults.feed.release_page {
        base.feed.release_page = other.feed.release_page;
    }
    if other.feed.user_agent != defaults.feed.user_agent {
        base.feed.user_agent = other.feed.user_agent;
    }
    if other.feed.timeout != defaults.feed.timeout {
        base.feed.timeout = other.feed.timeout;
    }

    if other.gate.check_interval != defaults.gate.check_interval {
        base.gate.check_interval = other.gate.check_interval;
    }
    if other.gate.fail_open_delay != defaults.gate.fail_open_delay {
        base.gate.fail_open_delay = other.gate.fail_open_delay;
    }

    if other.capture.format != defaults.capture.format {
        base.capture.format = other.capture.format;
    }
    if other.capture.download_dir != defaults.capture.download_dir {
        base.capture.download_dir = other.capture.download_dir;
    }
    if other.capture.mount_timeout != defaults.capture.mount_timeout {
        base.capture.mount_timeout = other.capture.mount_timeout;
    }

    if other.storage.path.is_some() {
        base.storage.path = other.storage.path;
    }

    base
}

fn load_env(prefix: &str) -> Result<Config> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    if map.is_empty() {
        return Ok(Config::default());
    }

    let mut cfg = Config::default();

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    let duration = |value: &str| humantime::parse_duration(value).ok();
    match key {
        "feed.url" => cfg.feed.url = value,
        "feed.release_page" => cfg.feed.release_page = value,
        "feed.user_agent" => cfg.feed.user_agent = value,
        "feed.timeout" => {
            if let Some(parsed) = duration(&value) {
                cfg.feed.timeout = parsed;
            }
        }
        "gate.check_interval" => {
            if let Some(parsed) = duration(&value) {
                cfg.gate.check_interval = parsed;
            }
        }
        "gate.fail_open_delay" => {
            if let Some(parsed) = duration(&value) {
                cfg.gate.fail_open_delay = parsed;
            }
        }
        "capture.format" => {
            if let Ok(parsed) = value.parse::<ExportFormat>() {
                cfg.capture.format = parsed;
            }
        }
        "capture.download_dir" => cfg.capture.download_dir = Some(PathBuf::from(value)),
        "capture.mount_timeout" => {
            if let Some(parsed) = duration(&value) {
                cfg.capture.mount_timeout = parsed;
            }
        }
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pagesaver").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    fn isolated(prefix: &str, file: Option<PathBuf>) -> LoadOptions {
        LoadOptions {
            config_file: Some(file.unwrap_or_else(|| PathBuf::from("/nonexistent/pagesaver.yaml"))),
            env_prefix: Some(prefix.to_string()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(isolated("PAGESAVER_TEST_DEFAULTS", None)).unwrap();
        assert_eq!(cfg.feed.url, DEFAULT_RELEASES_URL);
        assert_eq!(cfg.gate.check_interval, Duration::from_secs(86_400));
        assert_eq!(cfg.gate.fail_open_delay, Duration::from_millis(1200));
        assert_eq!(cfg.capture.format, ExportFormat::Png);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "gate:\n  check_interval: 6h\ncapture:\n  format: jpg\n  download_dir: /tmp/pages\n",
        )
        .unwrap();
        let cfg = load(isolated("PAGESAVER_TEST_FILE", Some(path))).unwrap();
        assert_eq!(cfg.gate.check_interval, Duration::from_secs(6 * 3600));
        assert_eq!(cfg.gate.fail_open_delay, Duration::from_millis(1200));
        assert_eq!(cfg.capture.format, ExportFormat::Jpeg);
        assert_eq!(cfg.capture.download_dir, Some(PathBuf::from("/tmp/pages")));
    }

    #[test]
    fn env_overrides() {
        env::set_var("PAGESAVER_TEST_ENV_GATE__FAIL_OPEN_DELAY", "250ms");
        env::set_var("PAGESAVER_TEST_ENV_CAPTURE__FORMAT", "webp");
        let cfg = load(isolated("PAGESAVER_TEST_ENV", None)).unwrap();
        assert_eq!(cfg.gate.fail_open_delay, Duration::from_millis(250));
        assert_eq!(cfg.capture.format, ExportFormat::Webp);
        env::remove_var("PAGESAVER_TEST_ENV_GATE__FAIL_OPEN_DELAY");
        env::remove_var("PAGESAVER_TEST_ENV_CAPTURE__FORMAT");
    }
}
