//! 错误处理模块
//!
//! 提供统一的错误分类：输入错误、上游不可用、已取消、部分失败，
//! 以及后端客户端自身的错误类型。

pub mod backend_error;
pub mod bridge_error;
pub mod code;

pub use backend_error::{BackendError, BackendResult};
pub use bridge_error::{BridgeError, Result};
pub use code::{ErrorCategory, ErrorCode};
