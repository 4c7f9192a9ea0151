use crate::decoder::SensorRecord;
use domain::{DEFAULT_MEASUREMENT, MeasurementPoint};
use std::collections::BTreeMap;

/// SensorRecord -> MeasurementPoint。
///
/// 时间戳取消息到达桥接的时刻（UTC 毫秒），传感器本身不上报采样时间。
#[derive(Debug, Clone)]
pub struct Normalizer {
    measurement: String,
    tags: BTreeMap<String, String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MEASUREMENT, BTreeMap::new())
    }
}

impl Normalizer {
    pub fn new(measurement: impl Into<String>, tags: BTreeMap<String, String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags,
        }
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn normalize(&self, record: &SensorRecord, arrival_ms: i64) -> MeasurementPoint {
        let fields = record
            .fields()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        MeasurementPoint {
            measurement: self.measurement.clone(),
            ts_ms: arrival_ms,
            tags: self.tags.clone(),
            fields,
        }
    }
}
