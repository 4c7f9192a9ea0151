//! 时序写入接口

use crate::error::BackendError;
use async_trait::async_trait;
use domain::MeasurementPoint;

/// 时序存储写入接口
///
/// 一次调用即一批写入：要么全部成功，要么整体失败。
#[async_trait]
pub trait PointWriter: Send + Sync {
    async fn write(&self, database: &str, points: &[MeasurementPoint]) -> Result<(), BackendError>;
}
