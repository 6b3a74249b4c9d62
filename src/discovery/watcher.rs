//! 服务 Watcher
//!
//! 后端在自己的通知上下文中推送各带后缀服务名的实例列表，这里把它们合并成一个
//! 逻辑视图，经有界通道交给调用 [`Watcher::next`] 的消费者。
//!
//! - 每个带后缀服务名一个槽位，后写覆盖
//! - 合并只在锁内做 map 更新和快照拷贝，发送在锁外
//! - 通道满时丢弃最新快照，不阻塞后端
//! - 所有等待都与取消令牌竞争

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::instance::{ServiceInstance, from_backend};
use super::protocol::{Protocol, QualifiedName, qualify};
use crate::backend::{
    BackendInstance, InstanceCallback, NamingClient, SubscribeParam, SubscriptionId,
};
use crate::config::RegistryOptions;
use crate::error::{BackendError, BackendResult, BridgeError, Result};
use crate::registry::Watcher;

/// Watcher 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Starting,
    Active,
    /// 终态
    Stopped,
}

/// 合并存储：带后缀服务名 -> 最近一次推送的实例列表
#[derive(Debug)]
struct MergeStore {
    order: Vec<QualifiedName>,
    slots: HashMap<QualifiedName, Vec<ServiceInstance>>,
}

impl MergeStore {
    fn new(order: Vec<QualifiedName>) -> Self {
        Self {
            order,
            slots: HashMap::new(),
        }
    }

    /// 替换槽位并返回按扇出顺序拼接的并集
    fn update(&mut self, name: QualifiedName, instances: Vec<ServiceInstance>) -> Vec<ServiceInstance> {
        self.slots.insert(name, instances);
        self.order
            .iter()
            .filter_map(|name| self.slots.get(name))
            .flatten()
            .cloned()
            .collect()
    }
}

/// 后端回调与 Watcher 共享的状态
struct WatchShared {
    service_name: String,
    default_protocol: Protocol,
    // None 表示已停止
    store: Mutex<Option<MergeStore>>,
    tx: mpsc::Sender<Vec<ServiceInstance>>,
}

impl WatchShared {
    fn on_push(&self, qualified: &QualifiedName, result: BackendResult<Vec<BackendInstance>>) {
        let instances = match result {
            Ok(instances) => instances,
            Err(e) => {
                warn!(qualified_name = %qualified, error = %e, "Subscription callback error ignored");
                return;
            }
        };
        let converted = from_backend(&instances, &self.service_name, self.default_protocol);

        let snapshot = {
            let mut store = self.store.lock();
            match store.as_mut() {
                Some(store) => store.update(qualified.clone(), converted),
                None => return,
            }
        };

        match self.tx.try_send(snapshot) {
            Ok(()) => debug!(qualified_name = %qualified, "Snapshot enqueued"),
            Err(TrySendError::Full(_)) => warn!(
                service = %self.service_name,
                qualified_name = %qualified,
                "Watcher channel full, dropping snapshot"
            ),
            Err(TrySendError::Closed(_)) => {
                debug!(qualified_name = %qualified, "Watcher channel closed")
            }
        }
    }
}

/// 逻辑服务的 Watcher
pub struct ServiceWatcher {
    service_name: String,
    naming: Arc<dyn NamingClient>,
    subscriptions: Mutex<Vec<(SubscribeParam, SubscriptionId)>>,
    shared: Arc<WatchShared>,
    rx: tokio::sync::Mutex<Option<mpsc::Receiver<Vec<ServiceInstance>>>>,
    cancel: CancellationToken,
    state: Mutex<WatcherState>,
}

impl ServiceWatcher {
    /// 订阅所有带后缀服务名并返回 Watcher
    pub async fn start(
        naming: Arc<dyn NamingClient>,
        service_name: &str,
        options: &RegistryOptions,
    ) -> Result<Self> {
        Self::start_with_token(naming, service_name, options, CancellationToken::new()).await
    }

    /// 同 [`ServiceWatcher::start`]，`cancel` 被取消时阻塞的 `next()` 立即返回
    /// `Cancelled`；订阅仍需通过 `stop()` 或 drop 释放
    pub async fn start_with_token(
        naming: Arc<dyn NamingClient>,
        service_name: &str,
        options: &RegistryOptions,
        cancel: CancellationToken,
    ) -> Result<Self> {
        if service_name.is_empty() {
            return Err(BridgeError::invalid_input("service name cannot be empty"));
        }
        if options.watcher_buffer == 0 {
            return Err(BridgeError::configuration("watcher buffer must be greater than zero"));
        }

        let qualified_names = qualify(service_name);
        let (tx, rx) = mpsc::channel(options.watcher_buffer);
        let shared = Arc::new(WatchShared {
            service_name: service_name.to_string(),
            default_protocol: options.default_protocol,
            store: Mutex::new(Some(MergeStore::new(qualified_names.clone()))),
            tx,
        });

        let watcher = Self {
            service_name: service_name.to_string(),
            naming,
            subscriptions: Mutex::new(Vec::with_capacity(qualified_names.len())),
            shared,
            rx: tokio::sync::Mutex::new(Some(rx)),
            cancel,
            state: Mutex::new(WatcherState::Starting),
        };

        for qualified in qualified_names {
            let param = SubscribeParam {
                service_name: qualified.to_string(),
                group_name: options.group.clone(),
                clusters: options.clusters.clone(),
            };
            let shared = watcher.shared.clone();
            let name = qualified.clone();
            let callback: InstanceCallback = Arc::new(move |result| shared.on_push(&name, result));

            match watcher.naming.subscribe(param.clone(), callback).await {
                Ok(id) => {
                    debug!(qualified_name = %qualified, subscription = %id, "Subscribed");
                    watcher.subscriptions.lock().push((param, id));
                }
                // 单个订阅失败不影响其余；全部失败时 Watcher 保持空闲
                Err(e) => {
                    error!(qualified_name = %qualified, error = %e, "Failed to subscribe")
                }
            }
        }

        *watcher.state.lock() = WatcherState::Active;
        info!(
            service = %watcher.service_name,
            subscriptions = watcher.subscriptions.lock().len(),
            "👀 Service watcher started"
        );
        Ok(watcher)
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn state(&self) -> WatcherState {
        *self.state.lock()
    }

    /// 当前持有的订阅数
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

#[async_trait]
impl Watcher for ServiceWatcher {
    type Item = Vec<ServiceInstance>;

    async fn next(&self) -> Result<Vec<ServiceInstance>> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        let mut guard = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(BridgeError::Cancelled),
            guard = self.rx.lock() => guard,
        };
        let Some(rx) = guard.as_mut() else {
            return Err(BridgeError::Cancelled);
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BridgeError::Cancelled),
            snapshot = rx.recv() => snapshot.ok_or(BridgeError::Cancelled),
        }
    }

    async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == WatcherState::Stopped {
                return Ok(());
            }
            *state = WatcherState::Stopped;
        }

        // 先取消，唤醒阻塞中的 next()
        self.cancel.cancel();

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        let attempted = subscriptions.len();
        let mut failed = 0;
        let mut last_err: Option<BackendError> = None;
        for (param, id) in subscriptions {
            if let Err(e) = self.naming.unsubscribe(param.clone(), id).await {
                error!(
                    qualified_name = %param.service_name,
                    subscription = %id,
                    error = %e,
                    "Failed to unsubscribe"
                );
                failed += 1;
                last_err = Some(e);
            }
        }

        self.shared.store.lock().take();
        // 接收端可能被挂起未再轮询的 next() 占用，此时不关闭；取消已先于接收生效
        if let Ok(mut guard) = self.rx.try_lock() {
            if let Some(mut rx) = guard.take() {
                rx.close();
            }
        }

        info!(service = %self.service_name, "🛑 Service watcher stopped");

        match last_err {
            Some(last) => Err(BridgeError::PartialFailure {
                operation: format!("unsubscribe {}", self.service_name),
                failed,
                attempted,
                last,
            }),
            None => Ok(()),
        }
    }
}

impl Drop for ServiceWatcher {
    fn drop(&mut self) {
        if *self.state.lock() == WatcherState::Stopped {
            return;
        }
        self.cancel.cancel();
        self.shared.store.lock().take();

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        if subscriptions.is_empty() {
            return;
        }
        let naming = self.naming.clone();
        let service_name = self.service_name.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for (param, id) in subscriptions {
                        if let Err(e) = naming.unsubscribe(param.clone(), id).await {
                            warn!(
                                qualified_name = %param.service_name,
                                error = %e,
                                "Failed to unsubscribe dropped watcher"
                            );
                        }
                    }
                    debug!(service = %service_name, "Dropped watcher unsubscribed");
                });
            }
            Err(_) => warn!(
                service = %service_name,
                "No tokio runtime available, subscriptions of dropped watcher leaked"
            ),
        }
    }
}
