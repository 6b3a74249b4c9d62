//! 服务注册发现模块
//!
//! 宿主框架面向的 trait 定义，以及基于 [`BridgeClient`](crate::client::BridgeClient)
//! 的服务注册实现。

mod registrar;
pub mod service_registration;
pub mod trait_def;

pub use service_registration::ServiceRegistration;
pub use trait_def::{Discovery, Registrar, Watcher, watch_stream};
