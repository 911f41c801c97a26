use crate::clock::Zone;
use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveTime;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const APP_DIR: &str = ".RitualBell";
const CONFIG_FILE: &str = "config.json";
pub const FIXED_TICK_SECONDS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub timezone: String,
    pub tick_seconds: u64,
    pub notifications_enabled: bool,
    pub notification_icon: String,
    pub snapshot_path: PathBuf,
    pub ledger_db_path: PathBuf,
    pub ledger_retention_days: u32,
    pub api_port: u16,
    pub app_origin: String,
    pub base_path: String,
    pub cache_dir: PathBuf,
    pub static_cache_name: String,
    pub runtime_cache_name: String,
    pub static_assets: Vec<String>,
    pub bypass_hosts: Vec<String>,
    pub sweep_enabled: bool,
    pub sweep_db_path: PathBuf,
    pub push_endpoint: String,
    pub push_api_key: Option<String>,
    pub push_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        let root = default_root_dir();

        Self {
            timezone: "local".to_string(),
            tick_seconds: FIXED_TICK_SECONDS,
            notifications_enabled: true,
            notification_icon: "icon-192.png".to_string(),
            snapshot_path: root.join("rituals.json"),
            ledger_db_path: root.join("db").join("reminders.db"),
            ledger_retention_days: 30,
            api_port: 7891,
            app_origin: "http://127.0.0.1:8080".to_string(),
            base_path: String::new(),
            cache_dir: root.join("cache"),
            static_cache_name: "ritualbell-static-v6".to_string(),
            runtime_cache_name: "ritualbell-runtime-v5".to_string(),
            static_assets: default_static_assets(),
            bypass_hosts: vec!["firebase".to_string(), "googleapis".to_string()],
            sweep_enabled: false,
            sweep_db_path: root.join("db").join("tenants.db"),
            push_endpoint: "https://fcm.googleapis.com/v1/projects/ritualbell/messages:send"
                .to_string(),
            push_api_key: None,
            push_timeout_seconds: 10,
        }
    }
}

impl Config {
    pub fn root_dir() -> Result<PathBuf> {
        Ok(default_root_dir())
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(default_root_dir().join(CONFIG_FILE))
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.tick_seconds = FIXED_TICK_SECONDS;
        config.base_path = normalize_base_path(&config.base_path);

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
        set_mode_600(&config_path)?;

        Ok(())
    }

    pub fn ensure_bootstrap_files(&self) -> Result<()> {
        let root = Self::root_dir()?;
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create root directory: {}", root.display()))?;

        [&self.snapshot_path, &self.ledger_db_path, &self.sweep_db_path]
            .into_iter()
            .filter_map(|path| path.parent())
            .try_for_each(|parent| {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create data directory: {}", parent.display())
                })
            })?;

        fs::create_dir_all(&self.cache_dir).with_context(|| {
            format!(
                "Failed to create cache directory: {}",
                self.cache_dir.display()
            )
        })?;

        Ok(())
    }

    pub fn zone(&self) -> Result<Zone> {
        Zone::parse(&self.timezone)
    }

    pub fn resolve_push_api_key(&self) -> Option<String> {
        std::env::var("RITUALBELL_PUSH_API_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| {
                self.push_api_key
                    .clone()
                    .filter(|value| !value.trim().is_empty())
            })
    }

    /// Absolute URLs of the static manifest, resolved against `app_origin` and `base_path`.
    pub fn static_manifest_urls(&self) -> Result<Vec<url::Url>> {
        let origin = url::Url::parse(&self.app_origin)
            .with_context(|| format!("Invalid app_origin: {}", self.app_origin))?;

        self.static_assets
            .iter()
            .map(|asset| {
                if asset.starts_with("http://") || asset.starts_with("https://") {
                    url::Url::parse(asset)
                } else {
                    origin.join(&format!("{}/{}", self.base_path, asset.trim_start_matches('/')))
                }
                .with_context(|| format!("Invalid static asset entry: {asset}"))
            })
            .collect()
    }

    pub fn icon_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_path,
            self.notification_icon.trim_start_matches('/')
        )
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let normalized = normalize_config_key(key);

        match normalized {
            "timezone" => {
                Zone::parse(value)?;
                self.timezone = value.trim().to_string();
            }
            "tick_seconds" => {
                let parsed = value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("tick_seconds must be a number"))?;
                if parsed != FIXED_TICK_SECONDS {
                    bail!("tick_seconds is fixed to 60 seconds");
                }
                self.tick_seconds = parsed;
            }
            "notifications_enabled" => {
                self.notifications_enabled = parse_bool(value, "notifications_enabled")?;
            }
            "notification_icon" => {
                self.notification_icon = value.trim().to_string();
            }
            "snapshot_path" => {
                self.snapshot_path = expand_home(value);
            }
            "ledger_db_path" => {
                self.ledger_db_path = expand_home(value);
            }
            "ledger_retention_days" => {
                self.ledger_retention_days = value
                    .parse::<u32>()
                    .map_err(|_| anyhow!("ledger_retention_days must be a number"))?;
            }
            "api_port" => {
                self.api_port = value
                    .parse::<u16>()
                    .map_err(|_| anyhow!("api_port must be a number"))?;
            }
            "app_origin" => {
                let trimmed = value.trim().trim_end_matches('/');
                url::Url::parse(trimmed).with_context(|| format!("Invalid URL: {trimmed}"))?;
                self.app_origin = trimmed.to_string();
            }
            "base_path" => {
                self.base_path = normalize_base_path(value);
            }
            "cache_dir" => {
                self.cache_dir = expand_home(value);
            }
            "static_cache_name" => {
                self.static_cache_name = non_empty(value, "static_cache_name")?;
            }
            "runtime_cache_name" => {
                self.runtime_cache_name = non_empty(value, "runtime_cache_name")?;
            }
            "static_assets" => {
                self.static_assets = split_list(value);
            }
            "bypass_hosts" => {
                self.bypass_hosts = split_list(value);
            }
            "sweep_enabled" => {
                self.sweep_enabled = parse_bool(value, "sweep_enabled")?;
            }
            "sweep_db_path" => {
                self.sweep_db_path = expand_home(value);
            }
            "push_endpoint" => {
                let trimmed = value.trim();
                url::Url::parse(trimmed).with_context(|| format!("Invalid URL: {trimmed}"))?;
                self.push_endpoint = trimmed.to_string();
            }
            "push_api_key" => {
                self.push_api_key = (!value.trim().is_empty()).then_some(value.to_string());
            }
            "push_timeout_seconds" => {
                self.push_timeout_seconds = value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("push_timeout_seconds must be a number"))?
                    .max(1);
            }
            _ => {
                bail!(
                    "Unsupported config key: {key}. Supported keys: timezone|clock.timezone, notifications_enabled|notify.enabled, notification_icon|notify.icon, snapshot_path|store.path, ledger_db_path|ledger.path, ledger_retention_days|ledger.retention_days, api_port|api.port, app_origin|app.origin, base_path|app.base_path, cache_dir|cache.dir, static_cache_name|cache.static_name, runtime_cache_name|cache.runtime_name, static_assets|cache.assets, bypass_hosts|cache.bypass_hosts, sweep_enabled|sweep.enabled, sweep_db_path|sweep.path, push_endpoint|push.endpoint, push_api_key|push.api_key, push_timeout_seconds|push.timeout_seconds"
                );
            }
        }

        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        match normalize_config_key(key) {
            "timezone" => Some(self.timezone.clone()),
            "tick_seconds" => Some(self.tick_seconds.to_string()),
            "notifications_enabled" => Some(self.notifications_enabled.to_string()),
            "notification_icon" => Some(self.notification_icon.clone()),
            "snapshot_path" => Some(self.snapshot_path.display().to_string()),
            "ledger_db_path" => Some(self.ledger_db_path.display().to_string()),
            "ledger_retention_days" => Some(self.ledger_retention_days.to_string()),
            "api_port" => Some(self.api_port.to_string()),
            "app_origin" => Some(self.app_origin.clone()),
            "base_path" => Some(self.base_path.clone()),
            "cache_dir" => Some(self.cache_dir.display().to_string()),
            "static_cache_name" => Some(self.static_cache_name.clone()),
            "runtime_cache_name" => Some(self.runtime_cache_name.clone()),
            "static_assets" => Some(self.static_assets.join(",")),
            "bypass_hosts" => Some(self.bypass_hosts.join(",")),
            "sweep_enabled" => Some(self.sweep_enabled.to_string()),
            "sweep_db_path" => Some(self.sweep_db_path.display().to_string()),
            "push_endpoint" => Some(self.push_endpoint.clone()),
            "push_api_key" => Some(
                self.push_api_key
                    .as_ref()
                    .map(|_| "***set***".to_string())
                    .unwrap_or_else(|| "not_set".to_string()),
            ),
            "push_timeout_seconds" => Some(self.push_timeout_seconds.to_string()),
            _ => None,
        }
    }
}

fn normalize_config_key(key: &str) -> &str {
    match key {
        "timezone" | "clock.timezone" => "timezone",
        "tick_seconds" | "clock.tick_seconds" => "tick_seconds",
        "notifications_enabled" | "notify.enabled" => "notifications_enabled",
        "notification_icon" | "notify.icon" => "notification_icon",
        "snapshot_path" | "store.path" => "snapshot_path",
        "ledger_db_path" | "ledger.path" => "ledger_db_path",
        "ledger_retention_days" | "ledger.retention_days" => "ledger_retention_days",
        "api_port" | "api.port" => "api_port",
        "app_origin" | "app.origin" => "app_origin",
        "base_path" | "app.base_path" => "base_path",
        "cache_dir" | "cache.dir" => "cache_dir",
        "static_cache_name" | "cache.static_name" => "static_cache_name",
        "runtime_cache_name" | "cache.runtime_name" => "runtime_cache_name",
        "static_assets" | "cache.assets" => "static_assets",
        "bypass_hosts" | "cache.bypass_hosts" => "bypass_hosts",
        "sweep_enabled" | "sweep.enabled" => "sweep_enabled",
        "sweep_db_path" | "sweep.path" => "sweep_db_path",
        "push_endpoint" | "push.endpoint" => "push_endpoint",
        "push_api_key" | "push.api_key" => "push_api_key",
        "push_timeout_seconds" | "push.timeout_seconds" => "push_timeout_seconds",
        _ => key,
    }
}

pub fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .with_context(|| format!("Invalid time format: {value}. Example: 07:30 (24-hour format)",))
}

pub fn expand_home(raw: &str) -> PathBuf {
    raw.strip_prefix("~/")
        .and_then(|stripped| home_dir().map(|home| home.join(stripped)))
        .unwrap_or_else(|| PathBuf::from(raw))
}

/// `""`, `"/"` and `"calendar/"` become `""`, `""` and `"/calendar"`.
pub fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn default_static_assets() -> Vec<String> {
    [
        "",
        "index.html",
        "styles.css",
        "script.js",
        "manifest.json",
        "icon-192.png",
        "icon-512.png",
    ]
    .into_iter()
    .map(ToOwned::to_owned)
    .collect()
}

fn default_root_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn parse_bool(value: &str, key: &str) -> Result<bool> {
    value
        .parse::<bool>()
        .map_err(|_| anyhow!("{key} must be true/false"))
}

fn non_empty(value: &str, key: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("{key} must not be empty");
    }
    Ok(trimmed.to_string())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn set_mode_600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set file permissions: {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Config, normalize_base_path};

    #[test]
    fn base_path_is_normalized() {
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path("calendar/"), "/calendar");
        assert_eq!(normalize_base_path(" /calendar "), "/calendar");
    }

    #[test]
    fn manifest_urls_resolve_against_origin_and_base_path() {
        let config = Config {
            app_origin: "https://owl.example".to_string(),
            base_path: "/calendar".to_string(),
            static_assets: vec![
                String::new(),
                "styles.css".to_string(),
                "https://cdn.example/lib.js".to_string(),
            ],
            ..Config::default()
        };

        let urls = config
            .static_manifest_urls()
            .expect("manifest urls")
            .into_iter()
            .map(|url| url.to_string())
            .collect::<Vec<_>>();

        assert_eq!(
            urls,
            vec![
                "https://owl.example/calendar/",
                "https://owl.example/calendar/styles.css",
                "https://cdn.example/lib.js",
            ]
        );
    }

    #[test]
    fn tick_seconds_cannot_change() {
        let mut config = Config::default();
        assert!(config.set_value("clock.tick_seconds", "30").is_err());
        assert!(config.set_value("tick_seconds", "60").is_ok());
    }

    #[test]
    fn push_api_key_is_masked_on_read() {
        let mut config = Config::default();
        config
            .set_value("push.api_key", "secret")
            .expect("key stored");
        assert_eq!(config.get_value("push_api_key").as_deref(), Some("***set***"));
    }
}
