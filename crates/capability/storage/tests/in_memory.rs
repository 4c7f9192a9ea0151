use bridge_storage::{BackendError, InMemoryPointWriter, PointWriter};
use domain::MeasurementPoint;

fn point(ts_ms: i64) -> MeasurementPoint {
    MeasurementPoint::new("environment", ts_ms).with_field("temperature", 20.0)
}

#[tokio::test]
async fn records_successful_batches() {
    let writer = InMemoryPointWriter::new();
    writer
        .write("sensor_data", &[point(1), point(2)])
        .await
        .expect("write");
    let batches = writer.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].database, "sensor_data");
    assert_eq!(writer.points().len(), 2);
    assert_eq!(writer.attempts(), 1);
}

#[tokio::test]
async fn fails_configured_number_of_times() {
    let writer =
        InMemoryPointWriter::failing_times(2, BackendError::Transient("down".to_string()));
    assert!(writer.write("db", &[point(1)]).await.is_err());
    assert!(writer.write("db", &[point(1)]).await.is_err());
    writer.write("db", &[point(1)]).await.expect("third attempt");
    assert_eq!(writer.attempts(), 3);
    assert_eq!(writer.batches().len(), 1);
}

#[tokio::test]
async fn heal_stops_permanent_failure() {
    let writer = InMemoryPointWriter::failing(BackendError::Timeout(100));
    assert_eq!(
        writer.write("db", &[point(1)]).await,
        Err(BackendError::Timeout(100))
    );
    writer.heal();
    writer.write("db", &[point(1)]).await.expect("healed");
}
