//! 错误代码定义
//!
//! 错误代码按类别分组，每个类别占用1000个代码范围：
//! - 1000-1999: 调用方输入错误
//! - 2000-2999: 上游（注册/配置中心）错误
//! - 3000-3999: 生命周期错误（Watcher 已停止）
//! - 4000-4999: 尽力而为操作的部分失败
//! - 5000-5999: 本地配置错误

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 调用方输入错误 (1000-1999)
    // ============================================================
    InvalidInput = 1000,

    // ============================================================
    // 上游错误 (2000-2999)
    // ============================================================
    UpstreamUnavailable = 2000,

    // ============================================================
    // 生命周期错误 (3000-3999)
    // ============================================================
    Cancelled = 3000,

    // ============================================================
    // 部分失败 (4000-4999)
    // ============================================================
    PartialFailure = 4000,

    // ============================================================
    // 本地配置错误 (5000-5999)
    // ============================================================
    ConfigurationError = 5000,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Input,
    Upstream,
    Lifecycle,
    Partial,
    Configuration,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 5] = [
        ErrorCode::InvalidInput,
        ErrorCode::UpstreamUnavailable,
        ErrorCode::Cancelled,
        ErrorCode::PartialFailure,
        ErrorCode::ConfigurationError,
    ];

    /// 数值代码
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// 稳定的字符串形式（用于日志字段）
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::PartialFailure => "PARTIAL_FAILURE",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Input,
            2000..=2999 => ErrorCategory::Upstream,
            3000..=3999 => ErrorCategory::Lifecycle,
            4000..=4999 => ErrorCategory::Partial,
            _ => ErrorCategory::Configuration,
        }
    }

    /// 是否值得由宿主框架重试
    ///
    /// 本库内部从不重试，重试策略属于宿主框架。
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::UpstreamUnavailable)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.as_str(), self.as_u32())
    }
}
