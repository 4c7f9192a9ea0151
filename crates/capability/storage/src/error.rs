//! 存储后端错误类型
//!
//! 区分可重试（网络、超时、5xx）与不可重试（4xx 拒绝）两类，
//! 写入适配器据此决定重试还是直接丢弃。

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Transient(String),
    #[error("backend timeout after {0}ms")]
    Timeout(u64),
    #[error("backend rejected write ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("backend client error: {0}")]
    Client(String),
}

impl BackendError {
    /// 是否值得重试。
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transient(_) | BackendError::Timeout(_))
    }
}
