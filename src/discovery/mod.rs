//! 服务发现模块
//!
//! 逻辑服务名按协议扇出为多个带后缀的注册名（`svc.http`、`svc.grpc`），
//! 查询与订阅结果再合并回逻辑服务名。

pub mod instance;
pub mod protocol;
mod reader;
pub mod watcher;

pub use instance::{
    Endpoint, METADATA_CLUSTER, METADATA_PROTOCOL, METADATA_SERVICE_NAME,
    METADATA_SERVICE_VERSION, ServiceInstance, from_backend,
};
pub use protocol::{Protocol, QualifiedName, protocol_of, qualify};
pub use watcher::{ServiceWatcher, WatcherState};
