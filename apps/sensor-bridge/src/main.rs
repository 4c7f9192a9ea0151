//! 传感器遥测桥接进程：MQTT 订阅 → 解码/规范化 → InfluxDB 批量写入。
//!
//! 停机顺序：停止订阅 → worker 取空通道 → 停止定时刷盘 → 写入适配器最后一次刷盘，
//! 后三步受 `BRIDGE_SHUTDOWN_GRACE_MS` 统一限时。

mod ingest;

use bridge_config::BridgeConfig;
use bridge_ingest::{MqttConfig, MqttConnector, SubscriptionConfig, SubscriptionManager};
use bridge_normalize::Normalizer;
use bridge_pipeline::{SinkConfig, WriteSink};
use bridge_storage::{InfluxConfig, InfluxWriter};
use bridge_telemetry::{init_tracing, metrics};
use ingest::{MessageHandler, drain_and_flush, spawn_workers};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = BridgeConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();
    info!(
        target: "bridge",
        mqtt_host = %config.mqtt_host,
        mqtt_port = config.mqtt_port,
        topic = %config.mqtt_topic,
        influx_host = %config.influx_host,
        database = %config.influx_database,
        batch_size = config.batch_size,
        workers = config.worker_count,
        "bridge_starting"
    );

    // InfluxDB 写入后端
    let writer = Arc::new(InfluxWriter::new(influx_config(&config))?);
    if config.influx_create_database {
        if let Err(err) = writer.ensure_database(&config.influx_database).await {
            warn!(target: "bridge.storage", error = %err, "influx_create_database_failed");
        }
    }
    // 启动时探活，失败不退出，写入走重试
    match writer.ping().await {
        Ok(()) => info!(target: "bridge.storage", url = %writer.base_url(), "influx_reachable"),
        Err(err) => warn!(
            target: "bridge.storage",
            url = %writer.base_url(),
            error = %err,
            "influx_unreachable"
        ),
    }

    // 写入适配器与定时刷盘
    let sink = WriteSink::with_config(writer, sink_config(&config));
    let (flush_stop_tx, flush_stop_rx) = watch::channel(false);
    let flush_loop = sink.spawn_flush_loop(flush_stop_rx);

    // worker 池
    let (tx, rx) = mpsc::channel(config.queue_capacity);
    let normalizer = Normalizer::new(config.measurement.clone(), config.tags.clone());
    let handler = Arc::new(MessageHandler::new(normalizer, sink.clone()));
    let workers = spawn_workers(rx, handler, config.worker_count);

    // 订阅管理
    let connector = Arc::new(MqttConnector::new(mqtt_config(&config)));
    info!(target: "bridge.mqtt", client_id = %connector.client_id(), "mqtt_client_ready");
    let manager = SubscriptionManager::new(connector, subscription_config(&config), tx);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut manager_task = tokio::spawn(manager.run(shutdown_rx));

    let finished = tokio::select! {
        _ = shutdown_signal() => {
            info!(target: "bridge", "shutdown_requested");
            None
        }
        joined = &mut manager_task => Some(joined),
    };

    // 1. 停止订阅（管理器退出时释放通道发送端）
    let _ = shutdown_tx.send(true);
    let manager_result = match finished {
        Some(joined) => joined,
        None => manager_task.await,
    };
    // 2~4. worker 取空通道、停止定时刷盘、最后一次刷盘，共用一个宽限期
    let report = drain_and_flush(
        &sink,
        workers,
        flush_stop_tx,
        flush_loop,
        Duration::from_millis(config.shutdown_grace_ms),
    )
    .await;
    let snapshot = metrics().snapshot();
    info!(
        target: "bridge",
        written_points = report.written_points,
        dropped_batches = report.dropped.len(),
        metrics = %serde_json::to_string(&snapshot).unwrap_or_default(),
        "bridge_stopped"
    );

    match manager_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            error!(target: "bridge.mqtt", error = %err, "subscription_failed");
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

/// Ctrl-C 或 SIGTERM。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target: "bridge", error = %err, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target: "bridge", error = %err, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn influx_config(config: &BridgeConfig) -> InfluxConfig {
    InfluxConfig {
        host: config.influx_host.clone(),
        port: config.influx_port,
        username: config.influx_username.clone(),
        password: config.influx_password.clone(),
        timeout: Duration::from_millis(config.influx_timeout_ms),
    }
}

fn sink_config(config: &BridgeConfig) -> SinkConfig {
    SinkConfig {
        database: config.influx_database.clone(),
        batch_size: config.batch_size,
        flush_interval: Duration::from_millis(config.flush_interval_ms),
        max_retries: config.max_retries,
        retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        retry_backoff_max: Duration::from_millis(config.retry_backoff_max_ms),
        retry_queue_max_points: config.retry_queue_max_points,
        write_timeout: Duration::from_millis(config.influx_timeout_ms),
    }
}

fn mqtt_config(config: &BridgeConfig) -> MqttConfig {
    MqttConfig {
        host: config.mqtt_host.clone(),
        port: config.mqtt_port,
        client_id: config.mqtt_client_id.clone(),
        username: config.mqtt_username.clone(),
        password: config.mqtt_password.clone(),
        keep_alive: Duration::from_secs(config.mqtt_keep_alive_seconds),
        connect_timeout: Duration::from_secs(config.mqtt_connect_timeout_seconds),
        receive_timeout: Duration::from_secs(config.mqtt_receive_timeout_seconds),
    }
}

fn subscription_config(config: &BridgeConfig) -> SubscriptionConfig {
    SubscriptionConfig {
        topic: config.mqtt_topic.clone(),
        qos: config.mqtt_qos,
        reconnect_backoff: Duration::from_millis(config.reconnect_backoff_ms),
        reconnect_backoff_max: Duration::from_millis(config.reconnect_backoff_max_ms),
    }
}
