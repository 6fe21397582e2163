//! TOML configuration for the client core.
//!
//! Every table has a complete `Default`, so an absent or partial
//! `config.toml` always yields a runnable configuration. Credentials live
//! in `[credentials.<site-key>]` tables and are surfaced through the
//! read-only [`CredentialsProvider`] seam; how they got into the file is
//! the settings collaborator's concern.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::booru::cache::CacheConfig;
use crate::booru::preview::SchedulerConfig;
use crate::booru::search::SearchConfig;
use crate::booru::site::{BooruSite, Credentials, CredentialsProvider};

/// Error types for config loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Result type alias for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Default client identity.
    pub user_agent: String,
    /// Identity used for sites that reject non-browser clients.
    pub browser_user_agent: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!(
                "{}/{} (by furr-tec)",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
            browser_user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 booru_manager/1.0"
                .to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 8,
            pool_idle_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSection {
    pub worker_count: usize,
    pub visible_gate_permits: usize,
}

impl Default for PreviewSection {
    fn default() -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            worker_count: defaults.worker_count,
            visible_gate_permits: defaults.visible_gate_permits,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub page_size: u32,
    pub initial_page_limit: u32,
    pub page_batch: u32,
    pub visible_lookahead: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        let defaults = SearchConfig::default();
        Self {
            page_size: 40,
            initial_page_limit: defaults.initial_page_limit,
            page_batch: defaults.page_batch,
            visible_lookahead: defaults.visible_lookahead,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub search_ttl_secs: u64,
    pub lookup_ttl_secs: u64,
    pub max_search_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            search_ttl_secs: defaults.search_ttl.as_secs(),
            lookup_ttl_secs: defaults.lookup_ttl.as_secs(),
            max_search_entries: defaults.max_search_entries,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub log_level: String,
    pub log_to_file: bool,
    pub log_directory: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: true,
            log_directory: "./logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub username: String,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub preview: PreviewSection,
    pub search: SearchSection,
    pub cache: CacheSection,
    pub logging: LoggingSection,
    /// Keyed by site key (aliases accepted).
    pub credentials: HashMap<String, CredentialEntry>,
}

impl AppConfig {
    /// Load from `path`; a missing file is the default configuration.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Write the default configuration for the user to edit.
    pub fn write_default(path: &Path) -> ConfigResult<()> {
        let rendered = toml::to_string_pretty(&Self::default())?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            worker_count: self.preview.worker_count,
            visible_gate_permits: self.preview.visible_gate_permits,
        }
    }

    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            initial_page_limit: self.search.initial_page_limit,
            page_batch: self.search.page_batch,
            visible_lookahead: self.search.visible_lookahead,
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            search_ttl: Duration::from_secs(self.cache.search_ttl_secs),
            lookup_ttl: Duration::from_secs(self.cache.lookup_ttl_secs),
            max_search_entries: self.cache.max_search_entries,
        }
    }

    /// Snapshot the credential tables into a provider.
    pub fn credentials_provider(&self) -> ConfigCredentials {
        let mut by_site = HashMap::new();
        for (key, entry) in &self.credentials {
            if let Some(site) = BooruSite::from_key(key) {
                by_site.insert(
                    site,
                    Credentials {
                        username: entry.username.clone(),
                        secret: entry.secret.clone(),
                    },
                );
            }
        }
        ConfigCredentials { by_site }
    }
}

/// Config-backed credentials lookup.
pub struct ConfigCredentials {
    by_site: HashMap<BooruSite, Credentials>,
}

impl CredentialsProvider for ConfigCredentials {
    fn credentials_for(&self, site: BooruSite) -> Option<Credentials> {
        self.by_site.get(&site).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_missing_tables_with_defaults() {
        let raw = r#"
            [http]
            user_agent = "custom/1.0"

            [search]
            page_size = 100
        "#;
        let config: AppConfig = toml::from_str(raw).expect("parses");

        assert_eq!(config.http.user_agent, "custom/1.0");
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.search.page_size, 100);
        assert_eq!(config.search.initial_page_limit, 10);
        assert_eq!(config.preview.worker_count, 6);
    }

    #[test]
    fn credential_tables_map_through_site_aliases() {
        let raw = r#"
            [credentials.e621]
            username = "user"
            secret = "key"

            [credentials.tabbooru]
            username = "other"
            secret = "pass"

            [credentials.unknown-site]
            username = "lost"
            secret = "lost"
        "#;
        let config: AppConfig = toml::from_str(raw).expect("parses");
        let provider = config.credentials_provider();

        assert_eq!(
            provider.credentials_for(BooruSite::E621).map(|c| c.username),
            Some("user".to_string())
        );
        assert!(provider.credentials_for(BooruSite::TabBooru).is_some());
        assert!(provider.credentials_for(BooruSite::Gelbooru).is_none());
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let rendered = toml::to_string_pretty(&AppConfig::default()).expect("serializes");
        let parsed: AppConfig = toml::from_str(&rendered).expect("parses");
        assert_eq!(parsed.preview.worker_count, 6);
        assert_eq!(parsed.cache.search_ttl_secs, 300);
    }
}
