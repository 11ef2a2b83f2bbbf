use std::env;
use std::time::Duration;

use tracing::warn;

/// Runtime configuration, loaded once from the environment at startup.
/// Every knob has a default so the bot runs with nothing but a token set.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub command_prefix: String,
    pub default_volume: f32,
    pub min_volume: f32,
    pub max_volume: f32,
    pub idle_timeout: Duration,
    pub alone_timeout: Duration,
    pub alone_grace: Duration,
    pub queue_page_size: usize,
    pub history_dir: String,
    pub stats_dir: String,
    pub history_max_entries: usize,
    pub autoplay_chain_limit: u32,
    pub dashboard_addr: String,
    pub dashboard_pin: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        BotConfig {
            command_prefix: "!".to_string(),
            default_volume: 0.5,
            min_volume: 0.1,
            max_volume: 2.0,
            idle_timeout: Duration::from_secs(300),
            alone_timeout: Duration::from_secs(60),
            alone_grace: Duration::from_secs(30),
            queue_page_size: 10,
            history_dir: "history_data".to_string(),
            stats_dir: "stats_data".to_string(),
            history_max_entries: 200,
            autoplay_chain_limit: 25,
            dashboard_addr: "127.0.0.1:8098".to_string(),
            dashboard_pin: None,
        }
    }
}

impl BotConfig {
    pub fn from_env() -> Self {
        let defaults = BotConfig::default();

        let config = BotConfig {
            command_prefix: env::var("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),
            default_volume: parse_var("DEFAULT_VOLUME", defaults.default_volume),
            min_volume: parse_var("MIN_VOLUME", defaults.min_volume),
            max_volume: parse_var("MAX_VOLUME", defaults.max_volume),
            idle_timeout: Duration::from_secs(parse_var("IDLE_TIMEOUT_SECS", 300)),
            alone_timeout: Duration::from_secs(parse_var("ALONE_TIMEOUT_SECS", 60)),
            alone_grace: Duration::from_secs(parse_var("ALONE_GRACE_SECS", 30)),
            queue_page_size: parse_var("QUEUE_PAGE_SIZE", defaults.queue_page_size),
            history_dir: env::var("HISTORY_DIR").unwrap_or(defaults.history_dir),
            stats_dir: env::var("STATS_DIR").unwrap_or(defaults.stats_dir),
            history_max_entries: parse_var("HISTORY_MAX_ENTRIES", defaults.history_max_entries),
            autoplay_chain_limit: parse_var("AUTOPLAY_CHAIN_LIMIT", defaults.autoplay_chain_limit),
            dashboard_addr: env::var("DASHBOARD_ADDR").unwrap_or(defaults.dashboard_addr),
            dashboard_pin: env::var("DASHBOARD_PIN").ok().filter(|pin| !pin.is_empty()),
        };

        if config.dashboard_pin.is_none() {
            warn!("DASHBOARD_PIN is not set, dashboard remote control is disabled");
        }

        config
    }

    /// Volume values the session will accept.
    pub fn volume_in_bounds(&self, volume: f32) -> bool {
        volume >= self.min_volume && volume <= self.max_volume
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Could not parse {key}={raw}, using default");
                default
            }
        },
        Err(_) => default,
    }
}
