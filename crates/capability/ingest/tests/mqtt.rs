use bridge_ingest::{BrokerConnector, ConnectionError, MqttConfig, MqttConnector};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
const CONNACK_BAD_CREDENTIALS: [u8; 4] = [0x20, 0x02, 0x00, 0x04];
// packet id 1，返回码 0x80（拒绝）
const SUBACK_REFUSED: [u8; 5] = [0x90, 0x03, 0x00, 0x01, 0x80];

fn config(port: u16) -> MqttConfig {
    MqttConfig {
        host: "127.0.0.1".to_string(),
        port,
        client_id: Some("sensor-bridge-test".to_string()),
        username: None,
        password: None,
        keep_alive: Duration::from_secs(60),
        connect_timeout: Duration::from_secs(2),
        receive_timeout: Duration::from_secs(2),
    }
}

fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let remaining = 2 + topic.len() + payload.len();
    assert!(remaining < 128);
    let mut packet = vec![0x30, remaining as u8];
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// 只应答一次连接的桩 broker：回 CONNACK，再推送给定报文，然后保持连接。
async fn stub_broker(replies: Vec<Vec<u8>>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = [0u8; 512];
        let _ = stream.read(&mut buf).await;
        for reply in replies {
            stream.write_all(&reply).await.expect("write");
        }
        while let Ok(n) = stream.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    });
    port
}

#[tokio::test]
async fn receives_publish_after_connack() {
    let payload = br#"{"temperature":26.5}"#;
    let port = stub_broker(vec![
        CONNACK_ACCEPTED.to_vec(),
        publish_packet("/esp32/sensorData", payload),
    ])
    .await;

    let connector = MqttConnector::new(config(port));
    let mut session = connector.connect().await.expect("connected");
    session
        .subscribe("/esp32/sensorData", 0)
        .await
        .expect("subscribe queued");

    let message = session.recv().await.expect("publish");
    assert_eq!(message.topic, "/esp32/sensorData");
    assert_eq!(message.payload, payload.to_vec());
    assert!(message.received_at_ms > 0);

    session.disconnect().await;
}

#[tokio::test]
async fn bad_credentials_are_fatal() {
    let port = stub_broker(vec![CONNACK_BAD_CREDENTIALS.to_vec()]).await;

    let connector = MqttConnector::new(config(port));
    let err = connector.connect().await.err().expect("refused");
    assert!(err.is_fatal(), "{err}");
}

#[tokio::test]
async fn unreachable_broker_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let connector = MqttConnector::new(config(port));
    let err = connector.connect().await.err().expect("unreachable");
    assert!(matches!(err, ConnectionError::Transient(_)), "{err}");
}

#[tokio::test]
async fn refused_subscription_is_fatal() {
    let port = stub_broker(vec![CONNACK_ACCEPTED.to_vec(), SUBACK_REFUSED.to_vec()]).await;

    let connector = MqttConnector::new(config(port));
    let mut session = connector.connect().await.expect("connected");
    session
        .subscribe("/esp32/sensorData", 0)
        .await
        .expect("subscribe queued");

    let err = tokio::time::timeout(Duration::from_secs(1), session.recv())
        .await
        .expect("recv returns")
        .expect_err("subscription refused");
    assert_eq!(
        err,
        ConnectionError::Fatal("subscription refused: /esp32/sensorData".to_string())
    );
}
