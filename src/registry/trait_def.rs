//! 服务注册 / 服务发现 / Watcher Trait 定义
//!
//! 宿主框架在服务生命周期事件上调用这些接口。

use async_trait::async_trait;
use futures::Stream;
use std::sync::Arc;

use crate::discovery::ServiceInstance;
use crate::error::Result;

/// 服务注册 Trait
#[async_trait]
pub trait Registrar: Send + Sync {
    /// 注册实例的全部端点
    async fn register(&self, instance: &ServiceInstance) -> Result<()>;

    /// 注销实例的全部端点（尽力而为）
    async fn deregister(&self, instance: &ServiceInstance) -> Result<()>;
}

/// 服务发现 Trait
#[async_trait]
pub trait Discovery: Send + Sync {
    /// 一次性查询逻辑服务的健康实例
    async fn get_service(&self, service_name: &str) -> Result<Vec<ServiceInstance>>;

    /// 创建服务 Watcher
    async fn watch(&self, service_name: &str) -> Result<Box<dyn Watcher<Item = Vec<ServiceInstance>>>>;
}

/// 阻塞式迭代器：推送式后端到拉取式消费者的桥
#[async_trait]
pub trait Watcher: Send + Sync {
    type Item: Send;

    /// 等待下一次变化；Watcher 停止后返回 `BridgeError::Cancelled`
    async fn next(&self) -> Result<Self::Item>;

    /// 停止 Watcher，之后不可复用
    async fn stop(&self) -> Result<()>;
}

/// 将 Watcher 包装为 Stream，遇到 `Cancelled` 时结束，其他错误作为元素产出
pub fn watch_stream<W>(watcher: Arc<W>) -> impl Stream<Item = Result<W::Item>>
where
    W: Watcher + ?Sized + 'static,
{
    futures::stream::unfold(watcher, |watcher| async move {
        let item = watcher.next().await;
        match item {
            Err(e) if e.is_cancelled() => None,
            item => Some((item, watcher)),
        }
    })
}
