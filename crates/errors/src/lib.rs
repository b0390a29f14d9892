use thiserror::Error;

/// 协调层错误类型
///
/// 锁竞争、心跳过期、主节点亲和性不满足等属于正常分支，不在此枚举中，
/// 由各组件的结果枚举表达。
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("协调存储不可用: {0}")]
    StoreUnavailable(String),
    #[error("协调存储命令失败: {0}")]
    Store(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("任务处理失败(可重试): {0}")]
    RetryableHandlerFailure(String),
    #[error("任务处理失败(已达重试上限 {retry_count}): {message}")]
    TerminalHandlerFailure { retry_count: u32, message: String },
    #[error("无效的节点ID: {0}")]
    InvalidNodeId(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type FleetResult<T> = Result<T, FleetError>;

impl FleetError {
    pub fn store_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StoreUnavailable(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn handler_failure<S: Into<String>>(msg: S) -> Self {
        Self::RetryableHandlerFailure(msg.into())
    }
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, FleetError::StoreUnavailable(_))
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FleetError::StoreUnavailable(_) | FleetError::RetryableHandlerFailure(_)
        )
    }
}

impl From<redis::RedisError> for FleetError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_io_error()
            || err.is_timeout()
        {
            FleetError::StoreUnavailable(err.to_string())
        } else {
            FleetError::Store(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for FleetError {
    fn from(err: anyhow::Error) -> Self {
        FleetError::Internal(err.to_string())
    }
}
