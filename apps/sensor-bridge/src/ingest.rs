//! 采集链路装配模块
//!
//! worker 从有界通道取出 `RawMessage`，依次经过解码、规范化，再提交给写入适配器。
//! 解码失败只影响当前消息：记录日志与计数后丢弃，继续处理下一条。

use bridge_normalize::{DecodeError, Normalizer, decode};
use bridge_pipeline::{FlushReport, WriteError, WriteSink};
use bridge_telemetry::{
    DecodeFailureCause, new_message_id, record_decode_failure, record_point_normalized,
};
use domain::RawMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, warn};

/// 单条消息的处理错误。
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// 消息处理器
///
/// 持有规范化器与写入适配器，多个 worker 共享同一个实例。
pub struct MessageHandler {
    normalizer: Normalizer,
    sink: WriteSink,
}

impl MessageHandler {
    pub fn new(normalizer: Normalizer, sink: WriteSink) -> Self {
        Self { normalizer, sink }
    }

    /// 处理一条消息：decode → normalize → submit。
    pub async fn handle(&self, message: RawMessage) -> Result<(), HandleError> {
        let record = match decode(&message.payload) {
            Ok(record) => record,
            Err(err) => {
                let cause = failure_cause(&err);
                record_decode_failure(cause);
                warn!(
                    target: "bridge.ingest",
                    cause = cause.as_str(),
                    topic = %message.topic,
                    payload_size = message.payload.len(),
                    error = %err,
                    "decode_failed"
                );
                return Err(err.into());
            }
        };

        let point = self.normalizer.normalize(&record, message.received_at_ms);
        record_point_normalized();
        debug!(
            target: "bridge.ingest",
            measurement = %point.measurement,
            ts_ms = point.ts_ms,
            fields = point.fields.len(),
            "point_normalized"
        );

        // 写入失败已由写入适配器记录
        self.sink.submit(point).await?;
        Ok(())
    }
}

fn failure_cause(err: &DecodeError) -> DecodeFailureCause {
    match err {
        DecodeError::MalformedPayload(_) => DecodeFailureCause::Malformed,
        DecodeError::MissingField(_) => DecodeFailureCause::MissingField,
        DecodeError::InvalidType(_) => DecodeFailureCause::InvalidType,
    }
}

/// 启动 worker 池；通道关闭且取空后各 worker 自行退出。
pub fn spawn_workers(
    receiver: mpsc::Receiver<RawMessage>,
    handler: Arc<MessageHandler>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));
    (0..count.max(1))
        .map(|worker| {
            let receiver = receiver.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                loop {
                    let message = receiver.lock().await.recv().await;
                    let Some(message) = message else {
                        break;
                    };
                    let span = tracing::info_span!(
                        "message",
                        message_id = %new_message_id(),
                        worker = worker
                    );
                    if let Err(err) = handler.handle(message).instrument(span).await {
                        debug!(target: "bridge.ingest", worker = worker, error = %err, "message_not_stored");
                    }
                }
                debug!(target: "bridge.ingest", worker = worker, "worker_stopped");
            })
        })
        .collect()
}

/// 停机排空：worker 取空通道、停止定时刷盘、最后一次刷盘，三步共用一个 `grace` 截止时间。
///
/// 写入适配器先切到只缓冲模式，worker 取消息不再等待后端；
/// 截止时仍未退出的任务被中止。
pub async fn drain_and_flush(
    sink: &WriteSink,
    workers: Vec<JoinHandle<()>>,
    flush_stop: watch::Sender<bool>,
    flush_loop: JoinHandle<()>,
    grace: Duration,
) -> FlushReport {
    let deadline = Instant::now() + grace;
    sink.begin_shutdown();

    for worker in workers {
        join_until(worker, deadline, "worker").await;
    }
    let _ = flush_stop.send(true);
    join_until(flush_loop, deadline, "flush_loop").await;

    sink.shutdown(deadline.saturating_duration_since(Instant::now()))
        .await
}

async fn join_until(mut task: JoinHandle<()>, deadline: Instant, name: &'static str) {
    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(target: "bridge.ingest", task = name, error = %err, "task_join_failed"),
        Err(_) => {
            task.abort();
            warn!(target: "bridge.ingest", task = name, cause = "grace_elapsed", "task_aborted");
        }
    }
}
