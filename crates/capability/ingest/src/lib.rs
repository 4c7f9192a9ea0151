//! # Bridge Ingest 模块
//!
//! MQTT 订阅管理：连接生命周期、断线重连与消息投递。
//!
//! - [`session`]：`BrokerConnector` / `BrokerSession` 接口与连接错误
//! - [`mqtt`]：基于 rumqttc 的实现，每次连接都新建客户端与事件循环
//! - [`subscription`]：`SubscriptionManager` 状态机，把消息送入有界通道

pub mod mqtt;
pub mod session;
pub mod subscription;

pub use mqtt::{MqttConfig, MqttConnector};
pub use session::{BrokerConnector, BrokerSession, ConnectionError, ConnectionState};
pub use subscription::{SubscriptionConfig, SubscriptionManager};
