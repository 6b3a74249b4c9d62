//! 注册/配置中心客户端错误

use thiserror::Error;

/// 后端客户端错误
#[derive(Error, Debug)]
pub enum BackendError {
    /// HTTP 传输错误（连接失败、超时等）
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// 后端返回非成功状态码
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// 响应解码失败
    #[error("failed to decode backend response: {0}")]
    Decode(#[from] serde_json::Error),

    /// 后端拒绝请求
    #[error("backend rejected request: {0}")]
    Rejected(String),

    /// 资源不存在（订阅句柄、监听句柄等）
    #[error("not found: {0}")]
    NotFound(String),

    /// 后端不可用
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// 后端结果类型别名
pub type BackendResult<T> = std::result::Result<T, BackendError>;
