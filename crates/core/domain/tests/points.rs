use domain::{MeasurementPoint, RawMessage};

#[test]
fn point_builder_keeps_tags_and_fields() {
    let point = MeasurementPoint::new("environment", 1_000)
        .with_tag("site", "plant-1")
        .with_field("temperature", 26.5)
        .with_field("rpm", 1500.0);

    assert_eq!(point.measurement, "environment");
    assert_eq!(point.ts_ms, 1_000);
    assert_eq!(point.tags.get("site").map(String::as_str), Some("plant-1"));
    assert_eq!(point.field("temperature"), Some(26.5));
    assert_eq!(point.field("rpm"), Some(1500.0));
    assert_eq!(point.field("missing"), None);
}

#[test]
fn raw_message_is_stamped_on_arrival() {
    let message = RawMessage::now("/esp32/sensorData", b"{}".to_vec());
    assert_eq!(message.topic, "/esp32/sensorData");
    assert_eq!(message.payload, b"{}");
    assert!(message.received_at_ms > 0);
}
