use bridge_normalize::{DecodeError, Normalizer, REQUIRED_FIELDS, decode};
use std::collections::BTreeMap;

const SCENARIO_PAYLOAD: &[u8] = br#"{"temperature":26.5,"rpm":1500,"vibration":0.02,"voltage":220,"current":5,"power":1100,"energy":3.4,"frequency":50,"powerFactor":0.95}"#;

#[test]
fn decode_then_normalize_preserves_values() {
    let record = decode(SCENARIO_PAYLOAD).expect("decode");
    let point = Normalizer::default().normalize(&record, 1_700_000_000_000);

    assert_eq!(point.measurement, "environment");
    assert_eq!(point.ts_ms, 1_700_000_000_000);
    assert!(point.tags.is_empty());
    assert_eq!(point.fields.len(), REQUIRED_FIELDS.len());

    let expected = [
        ("temperature", 26.5),
        ("rpm", 1500.0),
        ("vibration", 0.02),
        ("voltage", 220.0),
        ("current", 5.0),
        ("power", 1100.0),
        ("energy", 3.4),
        ("frequency", 50.0),
        ("powerFactor", 0.95),
    ];
    for (name, value) in expected {
        assert_eq!(point.field(name), Some(value), "{name}");
    }
}

#[test]
fn normalizer_applies_measurement_and_static_tags() {
    let mut tags = BTreeMap::new();
    tags.insert("site".to_string(), "plant-1".to_string());
    let normalizer = Normalizer::new("motor", tags);

    let record = decode(SCENARIO_PAYLOAD).expect("decode");
    let point = normalizer.normalize(&record, 42);
    assert_eq!(point.measurement, "motor");
    assert_eq!(point.tags.get("site").map(String::as_str), Some("plant-1"));
}

#[test]
fn missing_field_produces_no_point() {
    let result = decode(br#"{"temperature":26.5}"#);
    assert_eq!(result, Err(DecodeError::MissingField("rpm".to_string())));
}

#[test]
fn string_value_is_invalid_type() {
    let payload = String::from_utf8_lossy(SCENARIO_PAYLOAD).replace("1500", r#""fast""#);
    let result = decode(payload.as_bytes());
    assert_eq!(result, Err(DecodeError::InvalidType("rpm".to_string())));
}
