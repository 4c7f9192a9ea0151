use bridge_storage::{BackendError, InfluxConfig, InfluxWriter, PointWriter};
use domain::MeasurementPoint;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// 单次应答的 HTTP 桩：返回 (端口, 收到的原始请求)。
async fn spawn_stub(status_line: &'static str, body: &'static str) -> (u16, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let request = read_request(&mut socket).await;
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        socket
            .write_all(response.as_bytes())
            .await
            .expect("write response");
        let _ = socket.shutdown().await;
        request
    });
    (port, handle)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.expect("read");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn writer(port: u16) -> InfluxWriter {
    InfluxWriter::new(InfluxConfig {
        host: "127.0.0.1".to_string(),
        port,
        username: None,
        password: None,
        timeout: Duration::from_secs(2),
    })
    .expect("writer")
}

fn scenario_point() -> MeasurementPoint {
    MeasurementPoint::new("environment", 1_700_000_000_000)
        .with_field("temperature", 26.5)
        .with_field("rpm", 1500.0)
        .with_field("vibration", 0.02)
        .with_field("voltage", 220.0)
        .with_field("current", 5.0)
        .with_field("power", 1100.0)
        .with_field("energy", 3.4)
        .with_field("frequency", 50.0)
        .with_field("powerFactor", 0.95)
}

#[tokio::test]
async fn write_posts_line_protocol() {
    let (port, stub) = spawn_stub("204 No Content", "").await;
    writer(port)
        .write("sensor_data", &[scenario_point()])
        .await
        .expect("write");

    let request = stub.await.expect("stub");
    assert!(
        request.starts_with("POST /write?db=sensor_data&precision=ms HTTP/1.1"),
        "{request}"
    );
    assert!(request.ends_with(
        "environment current=5,energy=3.4,frequency=50,power=1100,powerFactor=0.95,rpm=1500,temperature=26.5,vibration=0.02,voltage=220 1700000000000"
    ));
}

#[tokio::test]
async fn server_error_is_retryable() {
    let (port, stub) = spawn_stub("503 Service Unavailable", "overloaded").await;
    let err = writer(port)
        .write("sensor_data", &[scenario_point()])
        .await
        .expect_err("503");
    stub.await.expect("stub");
    assert!(err.is_retryable());
    assert!(matches!(err, BackendError::Transient(ref msg) if msg.contains("503")));
}

#[tokio::test]
async fn client_error_is_rejected() {
    let (port, stub) = spawn_stub("404 Not Found", "database not found: sensor_data").await;
    let err = writer(port)
        .write("sensor_data", &[scenario_point()])
        .await
        .expect_err("404");
    stub.await.expect("stub");
    assert_eq!(
        err,
        BackendError::Rejected {
            status: 404,
            message: "database not found: sensor_data".to_string()
        }
    );
}

#[tokio::test]
async fn unreachable_backend_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let err = writer(port)
        .write("sensor_data", &[scenario_point()])
        .await
        .expect_err("refused");
    assert!(err.is_retryable(), "{err}");
}

#[tokio::test]
async fn ping_and_create_database() {
    let (port, stub) = spawn_stub("204 No Content", "").await;
    writer(port).ping().await.expect("ping");
    let request = stub.await.expect("stub");
    assert!(request.starts_with("GET /ping HTTP/1.1"));

    let (port, stub) = spawn_stub("200 OK", r#"{"results":[{"statement_id":0}]}"#).await;
    writer(port)
        .ensure_database("sensor_data")
        .await
        .expect("create database");
    let request = stub.await.expect("stub");
    assert!(request.starts_with("POST /query?q=CREATE+DATABASE+%22sensor_data%22"), "{request}");
}

#[tokio::test]
async fn empty_batch_skips_request() {
    // 端口上没有服务，若发出请求会报错
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    writer(port).write("sensor_data", &[]).await.expect("noop");
}
