//! 日志初始化与桥接链路计数器。

use serde::Serialize;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 解码失败原因（与日志中的 `cause` 字段一致）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFailureCause {
    Malformed,
    MissingField,
    InvalidType,
}

impl DecodeFailureCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeFailureCause::Malformed => "malformed_payload",
            DecodeFailureCause::MissingField => "missing_field",
            DecodeFailureCause::InvalidType => "invalid_type",
        }
    }
}

/// 指标快照。
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub decode_malformed: u64,
    pub decode_missing_field: u64,
    pub decode_invalid_type: u64,
    pub points_normalized: u64,
    pub points_written: u64,
    pub batches_written: u64,
    pub write_failures: u64,
    pub batches_dropped: u64,
    pub points_dropped: u64,
    pub points_evicted: u64,
    pub reconnects: u64,
    pub connection_errors: u64,
    pub write_latency_ms_total: u64,
    pub write_latency_ms_count: u64,
}

impl MetricsSnapshot {
    /// 解码失败总数。
    pub fn decode_failures(&self) -> u64 {
        self.decode_malformed + self.decode_missing_field + self.decode_invalid_type
    }
}

/// 进程内计数器。
pub struct TelemetryMetrics {
    messages_received: AtomicU64,
    decode_malformed: AtomicU64,
    decode_missing_field: AtomicU64,
    decode_invalid_type: AtomicU64,
    points_normalized: AtomicU64,
    points_written: AtomicU64,
    batches_written: AtomicU64,
    write_failures: AtomicU64,
    batches_dropped: AtomicU64,
    points_dropped: AtomicU64,
    points_evicted: AtomicU64,
    reconnects: AtomicU64,
    connection_errors: AtomicU64,
    write_latency_ms_total: AtomicU64,
    write_latency_ms_count: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            decode_malformed: AtomicU64::new(0),
            decode_missing_field: AtomicU64::new(0),
            decode_invalid_type: AtomicU64::new(0),
            points_normalized: AtomicU64::new(0),
            points_written: AtomicU64::new(0),
            batches_written: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            batches_dropped: AtomicU64::new(0),
            points_dropped: AtomicU64::new(0),
            points_evicted: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            write_latency_ms_total: AtomicU64::new(0),
            write_latency_ms_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            decode_malformed: self.decode_malformed.load(Ordering::Relaxed),
            decode_missing_field: self.decode_missing_field.load(Ordering::Relaxed),
            decode_invalid_type: self.decode_invalid_type.load(Ordering::Relaxed),
            points_normalized: self.points_normalized.load(Ordering::Relaxed),
            points_written: self.points_written.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            points_dropped: self.points_dropped.load(Ordering::Relaxed),
            points_evicted: self.points_evicted.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            write_latency_ms_total: self.write_latency_ms_total.load(Ordering::Relaxed),
            write_latency_ms_count: self.write_latency_ms_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成消息级追踪 ID（写入 worker 的 span）。
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录收到的 MQTT 消息数。
pub fn record_message_received() {
    metrics().messages_received.fetch_add(1, Ordering::Relaxed);
}

/// 按原因记录解码失败。
pub fn record_decode_failure(cause: DecodeFailureCause) {
    let counter = match cause {
        DecodeFailureCause::Malformed => &metrics().decode_malformed,
        DecodeFailureCause::MissingField => &metrics().decode_missing_field,
        DecodeFailureCause::InvalidType => &metrics().decode_invalid_type,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

/// 记录规范化输出的点数。
pub fn record_point_normalized() {
    metrics().points_normalized.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次成功的批量写入。
pub fn record_batch_written(points: usize, latency_ms: u64) {
    let metrics = metrics();
    metrics.batches_written.fetch_add(1, Ordering::Relaxed);
    metrics
        .points_written
        .fetch_add(points as u64, Ordering::Relaxed);
    metrics
        .write_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .write_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录写入失败次数（每次尝试计一次）。
pub fn record_write_failure() {
    metrics().write_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录被丢弃的批次。
pub fn record_batch_dropped(points: usize) {
    let metrics = metrics();
    metrics.batches_dropped.fetch_add(1, Ordering::Relaxed);
    metrics
        .points_dropped
        .fetch_add(points as u64, Ordering::Relaxed);
}

/// 记录因重试队列超限而被淘汰的点数。
pub fn record_points_evicted(points: usize) {
    metrics()
        .points_evicted
        .fetch_add(points as u64, Ordering::Relaxed);
}

/// 记录重连次数。
pub fn record_reconnect() {
    metrics().reconnects.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接错误次数。
pub fn record_connection_error() {
    metrics().connection_errors.fetch_add(1, Ordering::Relaxed);
}
