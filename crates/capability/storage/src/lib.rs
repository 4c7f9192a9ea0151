//! # Bridge Storage 模块
//!
//! 时序存储后端抽象与实现。
//!
//! - [`traits`]：`PointWriter` 写入接口（一次调用一批，全有或全无）
//! - [`error`]：`BackendError`，区分可重试与拒绝
//! - [`line_protocol`]：InfluxDB line protocol 编码
//! - [`influx`]：基于 reqwest 的 InfluxDB 1.x HTTP 写入
//! - [`in_memory`]：测试用内存写入，支持注入失败

pub mod error;
pub mod in_memory;
pub mod influx;
pub mod line_protocol;
pub mod traits;

pub use error::*;
pub use in_memory::{InMemoryPointWriter, WrittenBatch};
pub use influx::{InfluxConfig, InfluxWriter};
pub use line_protocol::{encode_batch, encode_point};
pub use traits::*;
