use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub supervision: SupervisionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// WebSocket endpoint of the message broker
    pub ws_url: String,
    #[serde(default)]
    pub topics: TopicConfig,
}

/// Topic names for the fixed system channels
#[derive(Debug, Clone, Deserialize)]
pub struct TopicConfig {
    #[serde(default = "default_supervision_topic")]
    pub supervision: String,
    #[serde(default = "default_heartbeat_topic")]
    pub heartbeat: String,
    #[serde(default = "default_alarm_topic")]
    pub alarm: String,
    #[serde(default = "default_admin_topic")]
    pub admin: String,
    #[serde(default = "default_request_topic")]
    pub request: String,
    /// Prefix for per-entity control tag topics, suffixed with the entity id
    #[serde(default = "default_control_prefix")]
    pub control_prefix: String,
}

fn default_supervision_topic() -> String {
    "warden.supervision".to_string()
}

fn default_heartbeat_topic() -> String {
    "warden.heartbeat".to_string()
}

fn default_alarm_topic() -> String {
    "warden.alarm".to_string()
}

fn default_admin_topic() -> String {
    "warden.admin".to_string()
}

fn default_request_topic() -> String {
    "warden.request".to_string()
}

fn default_control_prefix() -> String {
    "warden.control".to_string()
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            supervision: default_supervision_topic(),
            heartbeat: default_heartbeat_topic(),
            alarm: default_alarm_topic(),
            admin: default_admin_topic(),
            request: default_request_topic(),
            control_prefix: default_control_prefix(),
        }
    }
}

impl TopicConfig {
    /// Topic carrying control tag updates for one entity
    pub fn control_topic(&self, entity_id: u64) -> String {
        format!("{}.{}", self.control_prefix, entity_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Bounded queue capacity per channel wrapper
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Seconds a dispatch may run before the slow-consumer warning fires
    #[serde(default = "default_slow_consumer_secs")]
    pub slow_consumer_threshold_secs: u64,
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_slow_consumer_secs() -> u64 {
    30
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            slow_consumer_threshold_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Fixed backoff between reconnect attempts in seconds
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_secs: u64,
    /// Timeout for correlated request/response exchanges in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_reconnect_backoff() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    600
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff_secs: 5,
            request_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisionConfig {
    /// Interval of the alive-timer expiry scan in seconds
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    /// Permissive handshake mode: a running process may reconnect
    #[serde(default)]
    pub test_mode: bool,
}

fn default_scan_interval() -> u64 {
    10
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 10,
            test_mode: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("delivery.queue_capacity", 1000)?
            .set_default("connection.reconnect_backoff_secs", 5)?
            .set_default("supervision.scan_interval_secs", 10)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("WARDEN_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (WARDEN_SERVER__WS_URL, etc.)
            .add_source(
                Environment::with_prefix("WARDEN")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.ws_url.is_empty() {
            errors.push("server.ws_url must not be empty".to_string());
        }

        if self.delivery.queue_capacity == 0 {
            errors.push("delivery.queue_capacity must be positive".to_string());
        }

        if self.connection.reconnect_backoff_secs == 0 {
            errors.push("connection.reconnect_backoff_secs must be positive".to_string());
        }

        if self.connection.request_timeout_secs == 0 {
            errors.push("connection.request_timeout_secs must be positive".to_string());
        }

        if self.supervision.scan_interval_secs == 0 {
            errors.push("supervision.scan_interval_secs must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_topic_format() {
        let topics = TopicConfig::default();
        assert_eq!(topics.control_topic(42), "warden.control.42");
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let config = AppConfig {
            server: ServerConfig {
                ws_url: String::new(),
                topics: TopicConfig::default(),
            },
            delivery: DeliveryConfig::default(),
            connection: ConnectionConfig::default(),
            supervision: SupervisionConfig::default(),
            logging: LoggingConfig::default(),
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("ws_url")));
    }

    #[test]
    fn test_defaults() {
        let delivery = DeliveryConfig::default();
        assert_eq!(delivery.queue_capacity, 1000);
        assert_eq!(delivery.slow_consumer_threshold_secs, 30);

        let connection = ConnectionConfig::default();
        assert_eq!(connection.reconnect_backoff_secs, 5);
        assert_eq!(connection.request_timeout_secs, 600);
    }
}
