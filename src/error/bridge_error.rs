//! 桥接层统一错误类型

use super::backend_error::BackendError;
use super::code::ErrorCode;
use thiserror::Error;

/// 桥接层统一错误类型
#[derive(Error, Debug)]
pub enum BridgeError {
    /// 调用方传入空值或格式错误的参数，不重试
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 上游调用失败或未返回可用结果
    #[error("upstream unavailable: {context}")]
    UpstreamUnavailable {
        context: String,
        #[source]
        source: BackendError,
    },

    /// Watcher 已停止，终态
    #[error("watcher cancelled")]
    Cancelled,

    /// 尽力而为的扇出操作中至少有一个子操作失败
    #[error("{operation}: {failed} of {attempted} calls failed")]
    PartialFailure {
        operation: String,
        failed: usize,
        attempted: usize,
        #[source]
        last: BackendError,
    },

    /// 本地配置加载/校验错误
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BridgeError {
    /// 创建输入错误
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        BridgeError::InvalidInput(reason.into())
    }

    /// 创建上游不可用错误
    pub fn upstream(context: impl Into<String>, source: BackendError) -> Self {
        BridgeError::UpstreamUnavailable {
            context: context.into(),
            source,
        }
    }

    /// 创建配置错误
    pub fn configuration(reason: impl Into<String>) -> Self {
        BridgeError::Configuration(reason.into())
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::InvalidInput(_) => ErrorCode::InvalidInput,
            BridgeError::UpstreamUnavailable { .. } => ErrorCode::UpstreamUnavailable,
            BridgeError::Cancelled => ErrorCode::Cancelled,
            BridgeError::PartialFailure { .. } => ErrorCode::PartialFailure,
            BridgeError::Configuration(_) => ErrorCode::ConfigurationError,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BridgeError::Cancelled)
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, BridgeError>;
