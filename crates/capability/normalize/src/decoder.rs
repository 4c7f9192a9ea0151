use serde_json::{Map, Value};

/// 报文中必须出现的数值字段（按校验顺序）。
pub const REQUIRED_FIELDS: [&str; 9] = [
    "temperature",
    "rpm",
    "vibration",
    "voltage",
    "current",
    "power",
    "energy",
    "frequency",
    "powerFactor",
];

/// 解码错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("missing field: {0}")]
    MissingField(String),
    #[error("invalid type for field: {0}")]
    InvalidType(String),
}

/// 一次传感器读数。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorRecord {
    pub temperature: f64,
    pub rpm: f64,
    pub vibration: f64,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub energy: f64,
    pub frequency: f64,
    pub power_factor: f64,
}

impl SensorRecord {
    /// 按报文字段名输出全部读数。
    pub fn fields(&self) -> [(&'static str, f64); 9] {
        [
            ("temperature", self.temperature),
            ("rpm", self.rpm),
            ("vibration", self.vibration),
            ("voltage", self.voltage),
            ("current", self.current),
            ("power", self.power),
            ("energy", self.energy),
            ("frequency", self.frequency),
            ("powerFactor", self.power_factor),
        ]
    }
}

/// 解析 UTF-8 JSON 对象报文。
///
/// 未知字段忽略；必填字段必须是 JSON 数字，字符串形式的数字同样视为类型错误。
pub fn decode(raw: &[u8]) -> Result<SensorRecord, DecodeError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|err| DecodeError::MalformedPayload(err.to_string()))?;
    let Value::Object(object) = value else {
        return Err(DecodeError::MalformedPayload(
            "expected a JSON object".to_string(),
        ));
    };

    let mut values = [0.0_f64; 9];
    for (slot, name) in values.iter_mut().zip(REQUIRED_FIELDS) {
        *slot = numeric_field(&object, name)?;
    }
    let [
        temperature,
        rpm,
        vibration,
        voltage,
        current,
        power,
        energy,
        frequency,
        power_factor,
    ] = values;

    Ok(SensorRecord {
        temperature,
        rpm,
        vibration,
        voltage,
        current,
        power,
        energy,
        frequency,
        power_factor,
    })
}

fn numeric_field(object: &Map<String, Value>, name: &str) -> Result<f64, DecodeError> {
    match object.get(name) {
        None => Err(DecodeError::MissingField(name.to_string())),
        Some(Value::Number(number)) => number
            .as_f64()
            .ok_or_else(|| DecodeError::InvalidType(name.to_string())),
        Some(_) => Err(DecodeError::InvalidType(name.to_string())),
    }
}
