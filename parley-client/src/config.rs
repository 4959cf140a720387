use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// SQLite file backing the message cache.
    #[serde(default = "default_cache_path")]
    pub cache_path: String,
    /// Messages requested for the first page of a channel.
    #[serde(default = "default_tail_size")]
    pub tail_size: u32,
    #[serde(default = "default_older_page_size")]
    pub older_page_size: u32,
    #[serde(default = "default_seen_debounce_ms")]
    pub seen_debounce_ms: u64,
    /// Unread counts above this are shown as "N+".
    #[serde(default = "default_unread_cap")]
    pub unread_cap: u32,
    /// Scroll offset from the top below which older messages are fetched.
    #[serde(default = "default_near_top_px")]
    pub near_top_px: f64,
}

fn default_base_url() -> String { "http://localhost:3004".into() }
fn default_cache_path() -> String { "parley-cache.db".into() }
fn default_tail_size() -> u32 { 50 }
fn default_older_page_size() -> u32 { 100 }
fn default_seen_debounce_ms() -> u64 { 300 }
fn default_unread_cap() -> u32 { 20 }
fn default_near_top_px() -> f64 { 50.0 }

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            cache_path: default_cache_path(),
            tail_size: default_tail_size(),
            older_page_size: default_older_page_size(),
            seen_debounce_ms: default_seen_debounce_ms(),
            unread_cap: default_unread_cap(),
            near_top_px: default_near_top_px(),
        }
    }
}

impl ClientConfig {
    /// Reads `PARLEY_CLIENT__*` environment variables over the defaults.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("PARLEY_CLIENT").separator("__"))
            .build()?;
        let config: Self = config.try_deserialize()?;

        if config.tail_size == 0 || config.older_page_size == 0 {
            anyhow::bail!("page sizes must be positive");
        }
        Ok(config)
    }

    pub fn seen_debounce(&self) -> Duration {
        Duration::from_millis(self.seen_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_feed_constants() {
        let config = ClientConfig::default();
        assert_eq!(config.tail_size, 50);
        assert_eq!(config.older_page_size, 100);
        assert_eq!(config.seen_debounce(), Duration::from_millis(300));
        assert_eq!(config.unread_cap, 20);
        assert_eq!(config.near_top_px, 50.0);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: ClientConfig = serde_json::from_str(r#"{"base_url":"https://chat.example"}"#).unwrap();
        assert_eq!(config.base_url, "https://chat.example");
        assert_eq!(config.cache_path, "parley-cache.db");
    }
}
