//! 待写入批次。
//!
//! 点数达到阈值或自第一个点进入后超过刷盘间隔时应当刷出。

use domain::MeasurementPoint;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct WriteBatch {
    points: Vec<MeasurementPoint>,
    opened_at: Option<Instant>,
}

impl WriteBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
            opened_at: None,
        }
    }

    /// 追加一个点，返回当前点数。
    pub fn push(&mut self, point: MeasurementPoint) -> usize {
        if self.points.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.points.push(point);
        self.points.len()
    }

    /// 非空且已超过刷盘间隔。
    pub fn is_due(&self, interval: Duration) -> bool {
        match self.opened_at {
            Some(opened_at) => !self.points.is_empty() && opened_at.elapsed() >= interval,
            None => false,
        }
    }

    /// 取走全部点并重置计时。
    pub fn take(&mut self) -> Vec<MeasurementPoint> {
        self.opened_at = None;
        std::mem::take(&mut self.points)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(ts_ms: i64) -> MeasurementPoint {
        MeasurementPoint::new("environment", ts_ms).with_field("temperature", 1.0)
    }

    #[test]
    fn empty_batch_is_never_due() {
        let batch = WriteBatch::with_capacity(4);
        assert!(!batch.is_due(Duration::ZERO));
        assert!(batch.is_empty());
    }

    #[test]
    fn batch_due_after_interval() {
        let mut batch = WriteBatch::with_capacity(4);
        assert_eq!(batch.push(point(1)), 1);
        assert!(batch.is_due(Duration::ZERO));
        assert!(!batch.is_due(Duration::from_secs(3600)));
    }

    #[test]
    fn take_resets_batch() {
        let mut batch = WriteBatch::with_capacity(4);
        batch.push(point(1));
        batch.push(point(2));
        let points = batch.take();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].ts_ms, 1);
        assert!(batch.is_empty());
        assert!(!batch.is_due(Duration::ZERO));
    }
}
