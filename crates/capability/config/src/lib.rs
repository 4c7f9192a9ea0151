//! 桥接进程运行配置加载。

use std::collections::BTreeMap;
use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 桥接进程运行配置。
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_topic: String,
    pub mqtt_qos: u8,
    pub mqtt_client_id: Option<String>,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_keep_alive_seconds: u64,
    pub mqtt_connect_timeout_seconds: u64,
    pub mqtt_receive_timeout_seconds: u64,
    pub reconnect_backoff_ms: u64,
    pub reconnect_backoff_max_ms: u64,
    pub influx_host: String,
    pub influx_port: u16,
    pub influx_database: String,
    pub influx_username: Option<String>,
    pub influx_password: Option<String>,
    pub influx_timeout_ms: u64,
    pub influx_create_database: bool,
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub retry_backoff_max_ms: u64,
    pub retry_queue_max_points: usize,
    pub queue_capacity: usize,
    pub worker_count: usize,
    pub shutdown_grace_ms: u64,
}

impl BridgeConfig {
    /// 从环境变量读取配置（缺省值与现场 ESP32 部署一致）。
    pub fn from_env() -> Result<Self, ConfigError> {
        let mqtt_host = env::var("BRIDGE_MQTT_HOST").unwrap_or_else(|_| "broker.emqx.io".to_string());
        let mqtt_port = read_u16_with_default("BRIDGE_MQTT_PORT", 1883)?;
        let mqtt_topic =
            env::var("BRIDGE_MQTT_TOPIC").unwrap_or_else(|_| "/esp32/sensorData".to_string());
        if mqtt_topic.is_empty() {
            return Err(ConfigError::Invalid(
                "BRIDGE_MQTT_TOPIC".to_string(),
                mqtt_topic,
            ));
        }
        let mqtt_qos = read_u8_with_default("BRIDGE_MQTT_QOS", 0)?;
        if mqtt_qos > 2 {
            return Err(ConfigError::Invalid(
                "BRIDGE_MQTT_QOS".to_string(),
                mqtt_qos.to_string(),
            ));
        }
        let mqtt_client_id = read_optional("BRIDGE_MQTT_CLIENT_ID");
        let mqtt_username = read_optional("BRIDGE_MQTT_USERNAME");
        let mqtt_password = read_optional("BRIDGE_MQTT_PASSWORD");
        let mqtt_keep_alive_seconds = read_u64_with_default("BRIDGE_MQTT_KEEP_ALIVE_SECONDS", 60)?;
        let mqtt_connect_timeout_seconds =
            read_u64_with_default("BRIDGE_MQTT_CONNECT_TIMEOUT_SECONDS", 10)?;
        // 未配置时取 2 倍心跳，保证空闲但健康的连接不会被误判超时
        let mqtt_receive_timeout_seconds = read_u64_with_default(
            "BRIDGE_MQTT_RECEIVE_TIMEOUT_SECONDS",
            mqtt_keep_alive_seconds.saturating_mul(2).max(1),
        )?;
        let reconnect_backoff_ms = read_u64_with_default("BRIDGE_RECONNECT_BACKOFF_MS", 500)?;
        let reconnect_backoff_max_ms =
            read_u64_with_default("BRIDGE_RECONNECT_BACKOFF_MAX_MS", 30_000)?;

        let influx_host = env::var("BRIDGE_INFLUX_HOST").unwrap_or_else(|_| "localhost".to_string());
        let influx_port = read_u16_with_default("BRIDGE_INFLUX_PORT", 8086)?;
        let influx_database =
            env::var("BRIDGE_INFLUX_DATABASE").unwrap_or_else(|_| "sensor_data".to_string());
        if influx_database.is_empty() {
            return Err(ConfigError::Missing("BRIDGE_INFLUX_DATABASE".to_string()));
        }
        let influx_username = read_optional("BRIDGE_INFLUX_USERNAME");
        let influx_password = read_optional("BRIDGE_INFLUX_PASSWORD");
        let influx_timeout_ms = read_u64_with_default("BRIDGE_INFLUX_TIMEOUT_MS", 5_000)?;
        let influx_create_database = read_bool_with_default("BRIDGE_INFLUX_CREATE_DATABASE", false);

        let measurement =
            env::var("BRIDGE_MEASUREMENT").unwrap_or_else(|_| "environment".to_string());
        if measurement.is_empty() {
            return Err(ConfigError::Invalid(
                "BRIDGE_MEASUREMENT".to_string(),
                measurement,
            ));
        }
        let tags = read_tags("BRIDGE_TAGS")?;

        let batch_size = read_usize_with_default("BRIDGE_BATCH_SIZE", 1)?.max(1);
        let flush_interval_ms = read_u64_with_default("BRIDGE_FLUSH_INTERVAL_MS", 1_000)?;
        let max_retries = read_u32_with_default("BRIDGE_MAX_RETRIES", 3)?;
        let retry_backoff_ms = read_u64_with_default("BRIDGE_RETRY_BACKOFF_MS", 200)?;
        let retry_backoff_max_ms = read_u64_with_default("BRIDGE_RETRY_BACKOFF_MAX_MS", 10_000)?;
        let retry_queue_max_points =
            read_usize_with_default("BRIDGE_RETRY_QUEUE_MAX_POINTS", 1_000)?;
        let queue_capacity = read_usize_with_default("BRIDGE_QUEUE_CAPACITY", 256)?.max(1);
        let worker_count = read_usize_with_default("BRIDGE_WORKERS", 1)?.max(1);
        let shutdown_grace_ms = read_u64_with_default("BRIDGE_SHUTDOWN_GRACE_MS", 5_000)?;

        Ok(Self {
            mqtt_host,
            mqtt_port,
            mqtt_topic,
            mqtt_qos,
            mqtt_client_id,
            mqtt_username,
            mqtt_password,
            mqtt_keep_alive_seconds,
            mqtt_connect_timeout_seconds,
            mqtt_receive_timeout_seconds,
            reconnect_backoff_ms,
            reconnect_backoff_max_ms,
            influx_host,
            influx_port,
            influx_database,
            influx_username,
            influx_password,
            influx_timeout_ms,
            influx_create_database,
            measurement,
            tags,
            batch_size,
            flush_interval_ms,
            max_retries,
            retry_backoff_ms,
            retry_backoff_max_ms,
            retry_queue_max_points,
            queue_capacity,
            worker_count,
            shutdown_grace_ms,
        })
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u8_with_default(key: &str, default: u8) -> Result<u8, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u8>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}

/// 读取静态标签：`k=v,k2=v2`，空串视为无标签。
fn read_tags(key: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    match env::var(key) {
        Ok(value) => match parse_tags(&value) {
            Some(tags) => Ok(tags),
            None => Err(ConfigError::Invalid(key.to_string(), value)),
        },
        Err(_) => Ok(BTreeMap::new()),
    }
}

fn parse_tags(raw: &str) -> Option<BTreeMap<String, String>> {
    let mut tags = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=')?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return None;
        }
        tags.insert(key.to_string(), value.to_string());
    }
    Some(tags)
}

#[cfg(test)]
mod tests {
    use super::parse_tags;

    #[test]
    fn parse_tags_accepts_pairs() {
        let tags = parse_tags("site=plant-1, line=2").expect("tags");
        assert_eq!(tags.get("site").map(String::as_str), Some("plant-1"));
        assert_eq!(tags.get("line").map(String::as_str), Some("2"));
    }

    #[test]
    fn parse_tags_rejects_missing_value() {
        assert!(parse_tags("site=").is_none());
        assert!(parse_tags("site").is_none());
        assert!(parse_tags("").expect("empty").is_empty());
    }
}
