//! 传感器报文解码与规范化。
//!
//! `decode` 负责把原始字节解析为 [`SensorRecord`] 并校验必填字段，
//! [`Normalizer`] 再把记录转换为写入时序库的 [`domain::MeasurementPoint`]。

pub mod decoder;
pub mod normalizer;

pub use decoder::{DecodeError, REQUIRED_FIELDS, SensorRecord, decode};
pub use normalizer::Normalizer;
