//! 写入适配器：批量、重试与背压。
//!
//! 点先进入 [`WriteBatch`]，达到 `batch_size` 或超过 `flush_interval` 后整批写入后端。
//! 可重试的失败进入 [`RetryQueue`]，按指数退避重试；重试用尽、后端拒绝、
//! 超出队列预算被淘汰或停机时仍未写出的批次，都会以一次 `Dropped` 事件上报。

pub mod batch;
pub mod retry;

use batch::WriteBatch;
use bridge_storage::{BackendError, PointWriter};
use bridge_telemetry::{
    record_batch_dropped, record_batch_written, record_points_evicted, record_write_failure,
};
use domain::MeasurementPoint;
use retry::{PendingBatch, RetryQueue};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// 批次被丢弃的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    RetriesExhausted,
    Rejected,
    Evicted,
    Shutdown,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::RetriesExhausted => "retries_exhausted",
            DropReason::Rejected => "rejected",
            DropReason::Evicted => "evicted",
            DropReason::Shutdown => "shutdown",
        }
    }
}

/// `Dropped` 事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedBatch {
    pub points: usize,
    pub attempts: u32,
    pub reason: DropReason,
    pub last_error: Option<String>,
}

impl fmt::Display for DroppedBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} points dropped ({}) after {} attempts",
            self.points,
            self.reason.as_str(),
            self.attempts
        )?;
        if let Some(last_error) = &self.last_error {
            write!(f, ": {}", last_error)?;
        }
        Ok(())
    }
}

/// 写入错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// 本次写入失败，批次已进入重试队列
    #[error("transient write failure: {0}")]
    Transient(String),
    #[error("batch dropped: {0}")]
    Dropped(DroppedBatch),
}

/// 丢弃事件观察者。
pub trait SinkObserver: Send + Sync {
    fn on_dropped(&self, event: &DroppedBatch);
}

/// 默认观察者：输出结构化告警日志。
#[derive(Debug, Default)]
pub struct LogObserver;

impl SinkObserver for LogObserver {
    fn on_dropped(&self, event: &DroppedBatch) {
        warn!(
            target: "bridge.sink",
            cause = event.reason.as_str(),
            points = event.points,
            attempts = event.attempts,
            last_error = ?event.last_error,
            "batch_dropped"
        );
    }
}

/// 写入适配器参数。
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub database: String,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub retry_backoff_max: Duration,
    pub retry_queue_max_points: usize,
    pub write_timeout: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            database: "sensor_data".to_string(),
            batch_size: 1,
            flush_interval: Duration::from_secs(1),
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
            retry_backoff_max: Duration::from_secs(10),
            retry_queue_max_points: 1000,
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl SinkConfig {
    fn sanitized(mut self) -> Self {
        if self.batch_size == 0 {
            self.batch_size = 1;
        }
        if self.retry_backoff_max < self.retry_backoff {
            self.retry_backoff_max = self.retry_backoff;
        }
        self
    }

    /// 第 `failures` 次失败后的等待时长：`retry_backoff * 2^(failures-1)`，封顶 `retry_backoff_max`。
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1u32 << shift)
            .min(self.retry_backoff_max)
    }

    /// 刷盘循环的节拍。
    pub fn tick_interval(&self) -> Duration {
        self.flush_interval
            .min(self.retry_backoff)
            .clamp(Duration::from_millis(10), Duration::from_secs(1))
    }
}

/// 一轮刷盘的结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written_batches: usize,
    pub written_points: usize,
    pub failed_batches: usize,
    pub dropped: Vec<DroppedBatch>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.written_batches == 0 && self.failed_batches == 0 && self.dropped.is_empty()
    }

    fn record(&mut self, points: usize, result: Result<(), WriteError>) {
        match result {
            Ok(()) => {
                self.written_batches += 1;
                self.written_points += points;
            }
            Err(WriteError::Transient(_)) => self.failed_batches += 1,
            Err(WriteError::Dropped(event)) => self.dropped.push(event),
        }
    }
}

struct SinkState {
    batch: WriteBatch,
    retry: RetryQueue,
    next_seq: u64,
}

impl SinkState {
    fn take_batch(&mut self) -> (u64, Vec<MeasurementPoint>) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        (seq, self.batch.take())
    }
}

struct SinkInner {
    writer: Arc<dyn PointWriter>,
    observer: Arc<dyn SinkObserver>,
    config: SinkConfig,
    state: Mutex<SinkState>,
    // 停机排空阶段：只缓冲，不写后端
    draining: AtomicBool,
}

/// 写入适配器入口。
///
/// 批次与重试队列放在同一把异步锁下；写后端时不持锁，追加与刷盘不会交错。
#[derive(Clone)]
pub struct WriteSink {
    inner: Arc<SinkInner>,
}

impl WriteSink {
    pub fn new(writer: Arc<dyn PointWriter>) -> Self {
        Self::with_config(writer, SinkConfig::default())
    }

    pub fn with_config(writer: Arc<dyn PointWriter>, config: SinkConfig) -> Self {
        Self::with_observer(writer, config, Arc::new(LogObserver))
    }

    pub fn with_observer(
        writer: Arc<dyn PointWriter>,
        config: SinkConfig,
        observer: Arc<dyn SinkObserver>,
    ) -> Self {
        let config = config.sanitized();
        let inner = SinkInner {
            writer,
            observer,
            state: Mutex::new(SinkState {
                batch: WriteBatch::with_capacity(config.batch_size),
                retry: RetryQueue::new(config.retry_queue_max_points),
                next_seq: 0,
            }),
            draining: AtomicBool::new(false),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &SinkConfig {
        &self.inner.config
    }

    /// 提交一个点；批次满时立即整批写入。
    ///
    /// 返回 `Transient` 表示该批已进入重试队列，`Dropped` 表示该批已被丢弃。
    pub async fn submit(&self, point: MeasurementPoint) -> Result<(), WriteError> {
        let mut state = self.inner.state.lock().await;
        if state.batch.push(point) < self.inner.config.batch_size || self.is_draining() {
            return Ok(());
        }
        let (seq, points) = state.take_batch();
        drop(state);

        self.flush_points(seq, points).await
    }

    /// 刷盘周期：写出到期的批次，并重试到期的失败批次。
    pub async fn tick(&self) -> FlushReport {
        self.run_cycle(false).await
    }

    /// 立即写出当前批次（不论是否到期），并重试到期的失败批次。
    pub async fn flush(&self) -> FlushReport {
        self.run_cycle(true).await
    }

    /// 进入停机排空阶段：此后 `submit` 只缓冲，`tick`/`flush` 不再写后端，
    /// 剩余数据统一由 [`WriteSink::shutdown`] 在宽限期内写出。
    pub fn begin_shutdown(&self) {
        if !self.inner.draining.swap(true, Ordering::SeqCst) {
            info!(target: "bridge.sink", "sink_draining");
        }
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// 缓冲中与重试队列中的点数之和。
    pub async fn pending_points(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.batch.len() + state.retry.total_points()
    }

    /// 重试队列中的点数。
    pub async fn retry_queue_points(&self) -> usize {
        self.inner.state.lock().await.retry.total_points()
    }

    /// 启动定时刷盘任务，收到停机信号后退出。
    pub fn spawn_flush_loop(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let sink = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sink.config().tick_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = sink.tick().await;
                        if !report.is_empty() {
                            debug!(
                                target: "bridge.sink",
                                written_batches = report.written_batches,
                                written_points = report.written_points,
                                failed_batches = report.failed_batches,
                                dropped_batches = report.dropped.len(),
                                "flush_cycle"
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// 停机：当前批次与重试队列中的批次各做最后一次写入，受 `grace` 限制。
    /// 未能写出的批次以 `Shutdown` 原因丢弃。
    pub async fn shutdown(&self, grace: Duration) -> FlushReport {
        self.begin_shutdown();
        let mut pending = {
            let mut state = self.inner.state.lock().await;
            let mut pending = state.retry.drain_all();
            if !state.batch.is_empty() {
                let (seq, points) = state.take_batch();
                pending.push(PendingBatch {
                    seq,
                    points,
                    failures: 0,
                    next_attempt_at: Instant::now(),
                    last_error: String::new(),
                });
            }
            pending
        };
        pending.sort_by_key(|batch| batch.seq);

        let deadline = Instant::now() + grace;
        let mut report = FlushReport::default();
        for mut batch in pending {
            let points = batch.points.len();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                batch.last_error = "shutdown grace period elapsed".to_string();
                report
                    .dropped
                    .push(self.drop_batch(batch, DropReason::Shutdown));
                continue;
            }
            match tokio::time::timeout(remaining, self.write_once(&batch.points)).await {
                Ok(Ok(())) => report.record(points, Ok(())),
                Ok(Err(err)) => {
                    batch.failures += 1;
                    batch.last_error = err.to_string();
                    report
                        .dropped
                        .push(self.drop_batch(batch, DropReason::Shutdown));
                }
                Err(_) => {
                    batch.failures += 1;
                    batch.last_error = "shutdown grace period elapsed".to_string();
                    report
                        .dropped
                        .push(self.drop_batch(batch, DropReason::Shutdown));
                }
            }
        }
        info!(
            target: "bridge.sink",
            written_points = report.written_points,
            dropped_batches = report.dropped.len(),
            "sink_shutdown"
        );
        report
    }

    async fn run_cycle(&self, force: bool) -> FlushReport {
        let mut report = FlushReport::default();
        if self.is_draining() {
            return report;
        }

        let open = {
            let mut state = self.inner.state.lock().await;
            let due = if force {
                !state.batch.is_empty()
            } else {
                state.batch.is_due(self.inner.config.flush_interval)
            };
            due.then(|| state.take_batch())
        };
        if let Some((seq, points)) = open {
            let count = points.len();
            let result = self.flush_points(seq, points).await;
            report.record(count, result);
        }

        let due = self
            .inner
            .state
            .lock()
            .await
            .retry
            .take_due(Instant::now());
        for batch in due {
            let count = batch.points.len();
            let result = match self.write_once(&batch.points).await {
                Ok(()) => Ok(()),
                Err(err) => Err(self.handle_failure(batch, err).await),
            };
            report.record(count, result);
        }
        report
    }

    async fn flush_points(
        &self,
        seq: u64,
        points: Vec<MeasurementPoint>,
    ) -> Result<(), WriteError> {
        match self.write_once(&points).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let batch = PendingBatch {
                    seq,
                    points,
                    failures: 0,
                    next_attempt_at: Instant::now(),
                    last_error: String::new(),
                };
                Err(self.handle_failure(batch, err).await)
            }
        }
    }

    /// 单次写入，受 `write_timeout` 限制。
    async fn write_once(&self, points: &[MeasurementPoint]) -> Result<(), BackendError> {
        let config = &self.inner.config;
        let started_at = Instant::now();
        let result = match tokio::time::timeout(
            config.write_timeout,
            self.inner.writer.write(&config.database, points),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(config.write_timeout.as_millis() as u64)),
        };
        match &result {
            Ok(()) => {
                let latency_ms = started_at.elapsed().as_millis() as u64;
                record_batch_written(points.len(), latency_ms);
                debug!(
                    target: "bridge.sink",
                    database = %config.database,
                    points = points.len(),
                    latency_ms = latency_ms,
                    "batch_written"
                );
            }
            Err(err) => {
                record_write_failure();
                warn!(
                    target: "bridge.sink",
                    database = %config.database,
                    points = points.len(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "batch_write_failed"
                );
            }
        }
        result
    }

    /// 写入失败后的去向：拒绝或重试用尽即丢弃，否则按退避进入重试队列。
    async fn handle_failure(&self, mut batch: PendingBatch, err: BackendError) -> WriteError {
        let config = &self.inner.config;
        batch.failures += 1;
        batch.last_error = err.to_string();

        if !err.is_retryable() {
            return WriteError::Dropped(self.drop_batch(batch, DropReason::Rejected));
        }
        if batch.failures > config.max_retries {
            return WriteError::Dropped(self.drop_batch(batch, DropReason::RetriesExhausted));
        }

        let seq = batch.seq;
        batch.next_attempt_at = Instant::now() + config.backoff_for(batch.failures);
        let evicted = self.inner.state.lock().await.retry.push(batch);

        let mut own = None;
        for old in evicted {
            let old_seq = old.seq;
            let event = self.drop_batch(old, DropReason::Evicted);
            record_points_evicted(event.points);
            if old_seq == seq {
                own = Some(event);
            }
        }
        match own {
            Some(event) => WriteError::Dropped(event),
            None => WriteError::Transient(err.to_string()),
        }
    }

    fn drop_batch(&self, batch: PendingBatch, reason: DropReason) -> DroppedBatch {
        let event = DroppedBatch {
            points: batch.points.len(),
            attempts: batch.failures,
            reason,
            last_error: (!batch.last_error.is_empty()).then_some(batch.last_error),
        };
        record_batch_dropped(event.points);
        self.inner.observer.on_dropped(&event);
        event
    }
}
