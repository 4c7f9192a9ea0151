use async_trait::async_trait;
use domain::RawMessage;

/// 连接状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

/// 连接错误。
///
/// `Fatal` 表示重连也无法恢复（认证失败、客户端 ID 被拒等），进程应退出。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("transient connection error: {0}")]
    Transient(String),
    #[error("fatal connection error: {0}")]
    Fatal(String),
}

impl ConnectionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectionError::Fatal(_))
    }
}

/// 建立 broker 会话。
///
/// 每次调用都必须返回全新的会话，旧会话的未决请求不得带入。
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BrokerSession>, ConnectionError>;
}

/// 一次已建立的 broker 会话；drop 即释放底层连接。
#[async_trait]
pub trait BrokerSession: Send {
    async fn subscribe(&mut self, topic: &str, qos: u8) -> Result<(), ConnectionError>;

    /// 等待下一条消息；连接丢失时返回错误。
    async fn recv(&mut self) -> Result<RawMessage, ConnectionError>;

    async fn disconnect(&mut self);
}
