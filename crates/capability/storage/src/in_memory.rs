//! 内存写入实现
//!
//! 仅用于测试：记录每次写入，并可按需注入失败。

use crate::error::BackendError;
use crate::traits::PointWriter;
use async_trait::async_trait;
use domain::MeasurementPoint;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 已写入的一批。
#[derive(Debug, Clone)]
pub struct WrittenBatch {
    pub database: String,
    pub points: Vec<MeasurementPoint>,
}

#[derive(Default)]
pub struct InMemoryPointWriter {
    batches: Mutex<Vec<WrittenBatch>>,
    attempts: AtomicUsize,
    // (剩余失败次数, 失败错误)；usize::MAX 表示一直失败
    failure: Mutex<Option<(usize, BackendError)>>,
}

impl InMemoryPointWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次写入都失败。
    pub fn failing(error: BackendError) -> Self {
        Self::failing_times(usize::MAX, error)
    }

    /// 前 `times` 次写入失败，之后成功。
    pub fn failing_times(times: usize, error: BackendError) -> Self {
        Self {
            failure: Mutex::new(Some((times, error))),
            ..Self::default()
        }
    }

    /// 恢复正常写入。
    pub fn heal(&self) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = None;
        }
    }

    /// 写入调用次数（含失败）。
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    /// 成功写入的批次。
    pub fn batches(&self) -> Vec<WrittenBatch> {
        self.batches
            .lock()
            .map(|batches| batches.clone())
            .unwrap_or_default()
    }

    /// 成功写入的点（按写入顺序展开）。
    pub fn points(&self) -> Vec<MeasurementPoint> {
        self.batches()
            .into_iter()
            .flat_map(|batch| batch.points)
            .collect()
    }

    fn take_failure(&self) -> Result<Option<BackendError>, BackendError> {
        let mut failure = self
            .failure
            .lock()
            .map_err(|_| BackendError::Transient("lock failed".to_string()))?;
        let Some((remaining, error)) = failure.as_mut() else {
            return Ok(None);
        };
        if *remaining == 0 {
            *failure = None;
            return Ok(None);
        }
        if *remaining != usize::MAX {
            *remaining -= 1;
        }
        Ok(Some(error.clone()))
    }
}

#[async_trait]
impl PointWriter for InMemoryPointWriter {
    async fn write(&self, database: &str, points: &[MeasurementPoint]) -> Result<(), BackendError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = self.take_failure()? {
            return Err(error);
        }
        let mut batches = self
            .batches
            .lock()
            .map_err(|_| BackendError::Transient("lock failed".to_string()))?;
        batches.push(WrittenBatch {
            database: database.to_string(),
            points: points.to_vec(),
        });
        Ok(())
    }
}
