//! 注册/配置中心客户端抽象和实现
//!
//! 桥接层只依赖 [`NamingClient`] 与 [`ConfigClient`] 两个 trait：
//! - [`memory::MemoryBackend`]：进程内实现，回调同步触发，支持故障注入（测试与本地开发）
//! - [`nacos::NacosBackend`]：基于 Nacos v1 Open API 的 HTTP 实现

pub mod memory;
pub mod nacos;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{BackendError, BackendResult};

pub use memory::{MemoryBackend, Operation};
pub use nacos::NacosBackend;

/// 注册中心中的实例（后端视角，服务名带协议后缀）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendInstance {
    #[serde(default)]
    pub instance_id: String,
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub healthy: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub ephemeral: bool,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// 注册实例参数
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterParam {
    pub ip: String,
    pub port: u16,
    pub service_name: String,
    pub group_name: String,
    pub cluster_name: String,
    pub weight: f64,
    pub enabled: bool,
    pub healthy: bool,
    pub ephemeral: bool,
    pub metadata: HashMap<String, String>,
}

/// 注销实例参数
#[derive(Debug, Clone, PartialEq)]
pub struct DeregisterParam {
    pub ip: String,
    pub port: u16,
    pub service_name: String,
    pub group_name: String,
    pub cluster_name: String,
    pub ephemeral: bool,
}

/// 查询实例参数
#[derive(Debug, Clone, PartialEq)]
pub struct SelectParam {
    pub service_name: String,
    pub group_name: String,
    pub clusters: Vec<String>,
    pub healthy_only: bool,
}

/// 订阅参数
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeParam {
    pub service_name: String,
    pub group_name: String,
    pub clusters: Vec<String>,
}

/// 配置文档定位参数
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigParam {
    pub data_id: String,
    pub group: String,
}

/// 配置变更通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub namespace: String,
    pub group: String,
    pub data_id: String,
    pub content: String,
}

/// 订阅/监听句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// 实例列表推送回调
///
/// 在后端自己的通知上下文中调用，实现方不得阻塞。
pub type InstanceCallback = Arc<dyn Fn(BackendResult<Vec<BackendInstance>>) + Send + Sync>;

/// 配置变更回调
///
/// 在后端自己的通知上下文中调用，实现方不得阻塞。
pub type ConfigCallback = Arc<dyn Fn(ConfigChange) + Send + Sync>;

/// 服务注册客户端
///
/// 注意：由于需要动态分发（dyn），使用 async-trait
#[async_trait]
pub trait NamingClient: Send + Sync {
    /// 注册实例
    async fn register_instance(&self, param: RegisterParam) -> BackendResult<()>;

    /// 注销实例
    async fn deregister_instance(&self, param: DeregisterParam) -> BackendResult<()>;

    /// 时间点查询
    async fn select_instances(&self, param: SelectParam) -> BackendResult<Vec<BackendInstance>>;

    /// 订阅实例变化
    ///
    /// 返回的句柄用于 [`NamingClient::unsubscribe`]。
    async fn subscribe(
        &self,
        param: SubscribeParam,
        callback: InstanceCallback,
    ) -> BackendResult<SubscriptionId>;

    /// 取消订阅
    async fn unsubscribe(&self, param: SubscribeParam, id: SubscriptionId) -> BackendResult<()>;
}

/// 配置中心客户端
#[async_trait]
pub trait ConfigClient: Send + Sync {
    /// 获取配置内容，配置不存在时返回空字符串
    async fn get_config(&self, param: ConfigParam) -> BackendResult<String>;

    /// 监听配置变化
    async fn listen_config(
        &self,
        param: ConfigParam,
        callback: ConfigCallback,
    ) -> BackendResult<SubscriptionId>;

    /// 取消监听
    async fn cancel_listen_config(&self, param: ConfigParam, id: SubscriptionId)
    -> BackendResult<()>;
}

/// 注册中心通用的 "group@@service" 形式
pub(crate) fn grouped_service_name(group: &str, service_name: &str) -> String {
    format!("{}@@{}", group, service_name)
}

pub(crate) fn not_found(what: impl Into<String>) -> BackendError {
    BackendError::NotFound(what.into())
}
