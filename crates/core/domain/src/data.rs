use std::collections::BTreeMap;

/// 默认的 measurement 名称。
pub const DEFAULT_MEASUREMENT: &str = "environment";

/// 从 broker 收到的原始消息。
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at_ms: i64,
}

impl RawMessage {
    /// 以当前时间作为到达时间构造消息。
    pub fn now(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at_ms: now_epoch_ms(),
        }
    }
}

/// 规范化后的时序点。
///
/// `ts_ms` 为 UTC 毫秒时间戳；tags/fields 使用 BTreeMap，保证输出顺序稳定。
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementPoint {
    pub measurement: String,
    pub ts_ms: i64,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
}

impl MeasurementPoint {
    pub fn new(measurement: impl Into<String>, ts_ms: i64) -> Self {
        Self {
            measurement: measurement.into(),
            ts_ms,
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn field(&self, key: &str) -> Option<f64> {
        self.fields.get(key).copied()
    }
}

/// 当前 Unix 时间戳（毫秒，UTC）。
pub fn now_epoch_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_millis() as i64
}
