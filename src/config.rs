use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::directory::DEFAULT_PROPERTY_PREFIX;
use crate::providers::doctolib::{DoctolibSettings, DEFAULT_PARTNER_HOST};
use crate::snapshot::recorder::DEFAULT_BATCH_SIZE;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub url: String,
    #[serde(default = "default_property_prefix")]
    pub property_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub cookies: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default = "default_courtesy_delay_ms")]
    pub courtesy_delay_ms: u64,
    /// Sources per committed chunk; 0 commits once at the end.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_partner_host")]
    pub partner_host: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<String>,
    pub feed_url: Option<String>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/vaxwatch/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        Ok(parsed)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(db_path) = overrides.db_path {
            self.storage.db_path = db_path;
        }
        if let Some(feed_url) = overrides.feed_url {
            self.feed.url = feed_url;
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn doctolib_settings(&self) -> DoctolibSettings {
        DoctolibSettings {
            partner_host: self.harvest.partner_host.clone(),
            courtesy_delay: Duration::from_millis(self.harvest.courtesy_delay_ms),
        }
    }

    pub fn default_template() -> String {
        format!(
            r#"[feed]
url = "{feed_url}"
property_prefix = "{prefix}"

[storage]
db_path = "{db_path}"

[http]
user_agent = "{user_agent}"
# cookies = "name=value; other=value"
timeout_secs = {timeout}
connect_timeout_secs = {connect_timeout}

[harvest]
courtesy_delay_ms = {delay}
batch_size = {batch}
partner_host = "{host}"
"#,
            feed_url = default_feed_url(),
            prefix = DEFAULT_PROPERTY_PREFIX,
            db_path = default_db_path(),
            user_agent = default_user_agent(),
            timeout = default_timeout_secs(),
            connect_timeout = default_connect_timeout_secs(),
            delay = default_courtesy_delay_ms(),
            batch = DEFAULT_BATCH_SIZE,
            host = DEFAULT_PARTNER_HOST,
        )
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            property_prefix: default_property_prefix(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            cookies: None,
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            courtesy_delay_ms: default_courtesy_delay_ms(),
            batch_size: default_batch_size(),
            partner_host: default_partner_host(),
        }
    }
}

fn default_feed_url() -> String {
    "https://www.data.gouv.fr/fr/datasets/r/d0566522-604d-4af6-be44-a26eefa01756".to_string()
}

fn default_property_prefix() -> String {
    DEFAULT_PROPERTY_PREFIX.to_string()
}

fn default_db_path() -> String {
    "~/.local/share/vaxwatch/stats.sqlite".to_string()
}

fn default_user_agent() -> String {
    concat!("vaxwatch/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_courtesy_delay_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_partner_host() -> String {
    DEFAULT_PARTNER_HOST.to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Config, ConfigOverrides};

    #[test]
    fn template_parses_back_to_defaults() {
        let parsed: Config = toml::from_str(&Config::default_template()).expect("template");
        let defaults = Config::default();
        assert_eq!(parsed.feed.url, defaults.feed.url);
        assert_eq!(parsed.feed.property_prefix, "c_");
        assert_eq!(parsed.storage.db_path, defaults.storage.db_path);
        assert_eq!(parsed.http.cookies, None);
        assert_eq!(parsed.harvest.courtesy_delay_ms, 1000);
        assert_eq!(parsed.harvest.batch_size, 50);
        assert_eq!(parsed.harvest.partner_host, "partners.doctolib.fr");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let parsed: Config = toml::from_str(
            r#"
[http]
cookies = "session=abc"

[harvest]
courtesy_delay_ms = 0
"#,
        )
        .expect("partial config");
        assert_eq!(parsed.http.cookies.as_deref(), Some("session=abc"));
        assert_eq!(parsed.http.timeout_secs, 30);
        assert_eq!(parsed.harvest.batch_size, 50);
        assert_eq!(parsed.doctolib_settings().courtesy_delay, Duration::ZERO);
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut config = Config::default();
        config.apply_overrides(ConfigOverrides {
            db_path: Some("/tmp/stats.sqlite".to_string()),
            feed_url: None,
        });
        assert_eq!(
            config.resolved_db_path(),
            std::path::PathBuf::from("/tmp/stats.sqlite")
        );
        assert_eq!(config.feed.url, Config::default().feed.url);
    }

    #[test]
    fn load_and_write_template_round_trip_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("conf/config.toml");
        assert!(Config::load(Some(&path)).is_ok());
        Config::write_template(&path).expect("write");
        let loaded = Config::load(Some(&path)).expect("load");
        assert_eq!(loaded.harvest.partner_host, "partners.doctolib.fr");
    }
}
