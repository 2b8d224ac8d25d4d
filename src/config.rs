//! Configuration management for Marginalia

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub anchoring: AnchoringConfig,
    pub watcher: WatcherConfig,
    pub markers: MarkerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    /// One connection keeps every write on a single queue
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:./marginalia.db".to_string(),
            max_connections: 1,
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Thresholds and limits for the anchor resolver.
///
/// The fuzzy and context thresholds are tuned independently; the context
/// comparison string is longer, so it tolerates a lower score.
#[derive(Debug, Clone, Deserialize)]
pub struct AnchoringConfig {
    /// Candidate elements need more normalized characters than this
    pub min_candidate_len: usize,
    /// Fuzzy tier accepts scores strictly above this
    pub fuzzy_threshold: f64,
    /// Context tier accepts scores strictly above this
    pub context_threshold: f64,
    /// Candidates shorter than `ratio * len(text)` are never scored
    pub min_length_ratio: f64,
    /// Characters captured on each side of a new selection
    pub context_window: usize,
}

impl Default for AnchoringConfig {
    fn default() -> Self {
        Self {
            min_candidate_len: 2,
            fuzzy_threshold: 0.7,
            context_threshold: 0.6,
            min_length_ratio: 0.5,
            context_window: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    pub debounce_ms: u64,
    pub interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            interval_ms: 5000,
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Markup of the wrapper elements the renderer inserts
#[derive(Debug, Clone, Deserialize)]
pub struct MarkerConfig {
    /// Wrapper tag name
    pub tag: String,
    /// CSS class prefix for markers
    pub class_prefix: String,
    /// Reserved attribute holding the record id
    pub id_attribute: String,
    /// Data attribute for annotation type
    pub type_attribute: String,
    /// Whether to include inline styles
    pub include_inline_styles: bool,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            tag: "span".to_string(),
            class_prefix: "mg-annotation".to_string(),
            id_attribute: "data-annotation-id".to_string(),
            type_attribute: "data-annotation-type".to_string(),
            include_inline_styles: true,
        }
    }
}

impl Config {
    /// Read configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: env_or("SERVER_PORT", defaults.server.port),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                ),
            },
            anchoring: AnchoringConfig {
                min_candidate_len: env_or(
                    "ANCHOR_MIN_CANDIDATE_LEN",
                    defaults.anchoring.min_candidate_len,
                ),
                fuzzy_threshold: env_or("ANCHOR_FUZZY_THRESHOLD", defaults.anchoring.fuzzy_threshold),
                context_threshold: env_or(
                    "ANCHOR_CONTEXT_THRESHOLD",
                    defaults.anchoring.context_threshold,
                ),
                min_length_ratio: env_or(
                    "ANCHOR_MIN_LENGTH_RATIO",
                    defaults.anchoring.min_length_ratio,
                ),
                context_window: env_or("ANCHOR_CONTEXT_WINDOW", defaults.anchoring.context_window),
            },
            watcher: WatcherConfig {
                debounce_ms: env_or("WATCHER_DEBOUNCE_MS", defaults.watcher.debounce_ms),
                interval_ms: env_or("WATCHER_INTERVAL_MS", defaults.watcher.interval_ms),
            },
            markers: defaults.markers,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparsable config value");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.anchoring.fuzzy_threshold, 0.7);
        assert_eq!(config.anchoring.context_threshold, 0.6);
        assert_eq!(config.watcher.debounce(), Duration::from_millis(1000));
        assert_eq!(config.markers.id_attribute, "data-annotation-id");
    }

    #[test]
    fn test_in_memory_detection() {
        assert!(DatabaseConfig::in_memory().is_in_memory());
        assert!(!DatabaseConfig::default().is_in_memory());
    }

    #[test]
    fn test_env_or_falls_back() {
        assert_eq!(env_or("MARGINALIA_TEST_UNSET_KEY", 42u64), 42);
    }
}
