//! 重试队列。
//!
//! 按批次创建顺序（seq）排列；总点数超过预算时从最老的批次开始淘汰。

use domain::MeasurementPoint;
use std::collections::VecDeque;
use tokio::time::Instant;

/// 写入失败、等待重试的批次。
#[derive(Debug)]
pub struct PendingBatch {
    pub seq: u64,
    pub points: Vec<MeasurementPoint>,
    /// 已失败的写入次数
    pub failures: u32,
    pub next_attempt_at: Instant,
    pub last_error: String,
}

#[derive(Debug)]
pub struct RetryQueue {
    batches: VecDeque<PendingBatch>,
    total_points: usize,
    max_points: usize,
}

impl RetryQueue {
    pub fn new(max_points: usize) -> Self {
        Self {
            batches: VecDeque::new(),
            total_points: 0,
            max_points,
        }
    }

    /// 入队，返回因超出预算被淘汰的批次（可能包含刚入队的这一批）。
    pub fn push(&mut self, batch: PendingBatch) -> Vec<PendingBatch> {
        let index = self.batches.partition_point(|queued| queued.seq < batch.seq);
        self.total_points += batch.points.len();
        self.batches.insert(index, batch);

        let mut evicted = Vec::new();
        while self.total_points > self.max_points {
            let Some(oldest) = self.batches.pop_front() else {
                break;
            };
            self.total_points -= oldest.points.len();
            evicted.push(oldest);
        }
        evicted
    }

    /// 取出所有到期的批次（保持 seq 顺序）。
    pub fn take_due(&mut self, now: Instant) -> Vec<PendingBatch> {
        let mut due = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.batches.len());
        for batch in self.batches.drain(..) {
            if batch.next_attempt_at <= now {
                self.total_points -= batch.points.len();
                due.push(batch);
            } else {
                remaining.push_back(batch);
            }
        }
        self.batches = remaining;
        due
    }

    pub fn drain_all(&mut self) -> Vec<PendingBatch> {
        self.total_points = 0;
        self.batches.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn total_points(&self) -> usize {
        self.total_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pending(seq: u64, points: usize, next_attempt_at: Instant) -> PendingBatch {
        PendingBatch {
            seq,
            points: (0..points)
                .map(|i| MeasurementPoint::new("environment", i as i64).with_field("v", 1.0))
                .collect(),
            failures: 1,
            next_attempt_at,
            last_error: "down".to_string(),
        }
    }

    #[test]
    fn evicts_oldest_first_when_over_budget() {
        let now = Instant::now();
        let mut queue = RetryQueue::new(4);
        assert!(queue.push(pending(1, 2, now)).is_empty());
        assert!(queue.push(pending(2, 2, now)).is_empty());

        let evicted = queue.push(pending(3, 2, now));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].seq, 1);
        assert_eq!(queue.total_points(), 4);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn requeued_batch_keeps_its_age() {
        let now = Instant::now();
        let mut queue = RetryQueue::new(2);
        queue.push(pending(5, 1, now));
        queue.push(pending(7, 1, now));

        // seq 3 比队列里的都老，超预算时先淘汰它
        let evicted = queue.push(pending(3, 1, now));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].seq, 3);
    }

    #[test]
    fn oversized_batch_evicts_itself() {
        let mut queue = RetryQueue::new(2);
        let evicted = queue.push(pending(1, 3, Instant::now()));
        assert_eq!(evicted.len(), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.total_points(), 0);
    }

    #[test]
    fn take_due_leaves_future_batches() {
        let now = Instant::now();
        let mut queue = RetryQueue::new(10);
        queue.push(pending(1, 1, now));
        queue.push(pending(2, 2, now + Duration::from_secs(60)));
        queue.push(pending(3, 1, now));

        let due = queue.take_due(now);
        assert_eq!(due.iter().map(|b| b.seq).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.total_points(), 2);

        let all = queue.drain_all();
        assert_eq!(all.len(), 1);
        assert_eq!(queue.total_points(), 0);
    }
}
