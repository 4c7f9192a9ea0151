//! 桥接服务共享的数据模型。

pub mod data;

pub use data::{DEFAULT_MEASUREMENT, MeasurementPoint, RawMessage, now_epoch_ms};
