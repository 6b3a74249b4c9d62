//! 进程内注册/配置中心
//!
//! 语义尽量贴近真实注册中心：实例以 "group@@service" 为键存储，注册/注销/推送后
//! 在调用方上下文中同步回调所有订阅者。额外提供调用记录与故障注入，便于测试
//! 扇出与部分失败路径。

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use super::{
    BackendInstance, ConfigCallback, ConfigChange, ConfigClient, ConfigParam, DeregisterParam,
    InstanceCallback, NamingClient, RegisterParam, SelectParam, SubscribeParam, SubscriptionId,
    grouped_service_name, not_found,
};
use crate::error::{BackendError, BackendResult};

/// 后端操作类型（用于调用记录与故障注入）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Register,
    Deregister,
    Select,
    Subscribe,
    Unsubscribe,
    GetConfig,
    ListenConfig,
    CancelListenConfig,
}

type ServiceKey = (String, String);

struct Subscriber {
    key: ServiceKey,
    clusters: Vec<String>,
    callback: InstanceCallback,
}

#[derive(Default)]
struct MemoryState {
    services: HashMap<ServiceKey, Vec<BackendInstance>>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    configs: HashMap<ConfigParam, String>,
    listeners: HashMap<SubscriptionId, (ConfigParam, ConfigCallback)>,
    // target 为 None 表示对该操作的所有目标生效
    faults: HashSet<(Operation, Option<String>)>,
    calls: Vec<(Operation, String)>,
    next_id: u64,
}

impl MemoryState {
    fn next_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }

    /// 记录调用并检查注入的故障
    fn record(&mut self, op: Operation, target: &str) -> BackendResult<()> {
        self.calls.push((op, target.to_string()));
        let hit = self.faults.contains(&(op, None))
            || self.faults.contains(&(op, Some(target.to_string())));
        if hit {
            return Err(BackendError::Unavailable(format!(
                "injected {:?} failure for {}",
                op, target
            )));
        }
        Ok(())
    }

    fn pending_notifications(&self, key: &ServiceKey) -> Vec<(InstanceCallback, Vec<BackendInstance>)> {
        let instances = self.services.get(key).cloned().unwrap_or_default();
        self.subscribers
            .values()
            .filter(|sub| &sub.key == key)
            .map(|sub| (sub.callback.clone(), filter_clusters(&instances, &sub.clusters)))
            .collect()
    }
}

fn filter_clusters(instances: &[BackendInstance], clusters: &[String]) -> Vec<BackendInstance> {
    instances
        .iter()
        .filter(|inst| clusters.is_empty() || clusters.contains(&inst.cluster_name))
        .cloned()
        .collect()
}

/// 进程内后端
pub struct MemoryBackend {
    namespace: String,
    state: Mutex<MemoryState>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            namespace: "public".to_string(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// 让某个操作在指定目标（服务名或 data id）上持续失败
    pub fn inject_fault(&self, op: Operation, target: impl Into<String>) {
        self.state.lock().faults.insert((op, Some(target.into())));
    }

    /// 让某个操作对所有目标持续失败
    pub fn inject_fault_all(&self, op: Operation) {
        self.state.lock().faults.insert((op, None));
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// 某个操作的调用目标记录（含失败的调用）
    pub fn calls(&self, op: Operation) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(recorded, _)| *recorded == op)
            .map(|(_, target)| target.clone())
            .collect()
    }

    pub fn call_count(&self, op: Operation) -> usize {
        self.calls(op).len()
    }

    /// 当前存储的实例
    pub fn instances(&self, group: &str, service_name: &str) -> Vec<BackendInstance> {
        let key = (group.to_string(), service_name.to_string());
        self.state.lock().services.get(&key).cloned().unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// 模拟注册中心推送：整体替换实例列表并通知订阅者
    pub fn push(&self, group: &str, service_name: &str, instances: Vec<BackendInstance>) {
        let key = (group.to_string(), service_name.to_string());
        let pending = {
            let mut state = self.state.lock();
            state.services.insert(key.clone(), instances);
            state.pending_notifications(&key)
        };
        for (callback, instances) in pending {
            callback(Ok(instances));
        }
    }

    /// 模拟注册中心推送错误
    pub fn push_error(&self, group: &str, service_name: &str, reason: &str) {
        let key = (group.to_string(), service_name.to_string());
        let callbacks: Vec<InstanceCallback> = {
            let state = self.state.lock();
            state
                .subscribers
                .values()
                .filter(|sub| sub.key == key)
                .map(|sub| sub.callback.clone())
                .collect()
        };
        for callback in callbacks {
            callback(Err(BackendError::Unavailable(reason.to_string())));
        }
    }

    /// 发布配置并通知监听者
    pub fn publish_config(&self, data_id: &str, group: &str, content: &str) {
        let param = ConfigParam {
            data_id: data_id.to_string(),
            group: group.to_string(),
        };
        let callbacks: Vec<ConfigCallback> = {
            let mut state = self.state.lock();
            state.configs.insert(param.clone(), content.to_string());
            state
                .listeners
                .values()
                .filter(|(p, _)| *p == param)
                .map(|(_, cb)| cb.clone())
                .collect()
        };
        for callback in callbacks {
            callback(ConfigChange {
                namespace: self.namespace.clone(),
                group: group.to_string(),
                data_id: data_id.to_string(),
                content: content.to_string(),
            });
        }
    }
}

#[async_trait]
impl NamingClient for MemoryBackend {
    async fn register_instance(&self, param: RegisterParam) -> BackendResult<()> {
        let key = (param.group_name.clone(), param.service_name.clone());
        let pending = {
            let mut state = self.state.lock();
            state.record(Operation::Register, &param.service_name)?;

            let grouped = grouped_service_name(&param.group_name, &param.service_name);
            let instance = BackendInstance {
                instance_id: format!(
                    "{}#{}#{}#{}",
                    param.ip, param.port, param.cluster_name, grouped
                ),
                ip: param.ip,
                port: param.port,
                weight: param.weight,
                healthy: param.healthy,
                enabled: param.enabled,
                ephemeral: param.ephemeral,
                cluster_name: param.cluster_name,
                service_name: grouped,
                metadata: param.metadata,
            };

            let list = state.services.entry(key.clone()).or_default();
            list.retain(|existing| {
                !(existing.ip == instance.ip
                    && existing.port == instance.port
                    && existing.cluster_name == instance.cluster_name)
            });
            list.push(instance);
            state.pending_notifications(&key)
        };
        for (callback, instances) in pending {
            callback(Ok(instances));
        }
        Ok(())
    }

    async fn deregister_instance(&self, param: DeregisterParam) -> BackendResult<()> {
        let key = (param.group_name.clone(), param.service_name.clone());
        let pending = {
            let mut state = self.state.lock();
            state.record(Operation::Deregister, &param.service_name)?;

            let removed = match state.services.get_mut(&key) {
                Some(list) => {
                    let before = list.len();
                    list.retain(|existing| {
                        !(existing.ip == param.ip
                            && existing.port == param.port
                            && existing.cluster_name == param.cluster_name)
                    });
                    before != list.len()
                }
                None => false,
            };
            if removed {
                state.pending_notifications(&key)
            } else {
                Vec::new()
            }
        };
        for (callback, instances) in pending {
            callback(Ok(instances));
        }
        Ok(())
    }

    async fn select_instances(&self, param: SelectParam) -> BackendResult<Vec<BackendInstance>> {
        let mut state = self.state.lock();
        state.record(Operation::Select, &param.service_name)?;
        let key = (param.group_name, param.service_name);
        let instances = state.services.get(&key).cloned().unwrap_or_default();
        Ok(filter_clusters(&instances, &param.clusters)
            .into_iter()
            .filter(|inst| !param.healthy_only || inst.healthy)
            .collect())
    }

    /// 订阅；若该服务已有数据，立即推送一次当前列表
    async fn subscribe(
        &self,
        param: SubscribeParam,
        callback: InstanceCallback,
    ) -> BackendResult<SubscriptionId> {
        let key = (param.group_name.clone(), param.service_name.clone());
        let (id, initial) = {
            let mut state = self.state.lock();
            state.record(Operation::Subscribe, &param.service_name)?;
            let id = state.next_id();
            let initial = state
                .services
                .get(&key)
                .map(|instances| filter_clusters(instances, &param.clusters));
            state.subscribers.insert(
                id,
                Subscriber {
                    key,
                    clusters: param.clusters,
                    callback: callback.clone(),
                },
            );
            (id, initial)
        };
        if let Some(instances) = initial {
            callback(Ok(instances));
        }
        Ok(id)
    }

    async fn unsubscribe(&self, param: SubscribeParam, id: SubscriptionId) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.record(Operation::Unsubscribe, &param.service_name)?;
        state
            .subscribers
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found(format!("subscription {} of {}", id, param.service_name)))
    }
}

#[async_trait]
impl ConfigClient for MemoryBackend {
    async fn get_config(&self, param: ConfigParam) -> BackendResult<String> {
        let mut state = self.state.lock();
        state.record(Operation::GetConfig, &param.data_id)?;
        Ok(state.configs.get(&param).cloned().unwrap_or_default())
    }

    async fn listen_config(
        &self,
        param: ConfigParam,
        callback: ConfigCallback,
    ) -> BackendResult<SubscriptionId> {
        let mut state = self.state.lock();
        state.record(Operation::ListenConfig, &param.data_id)?;
        let id = state.next_id();
        state.listeners.insert(id, (param, callback));
        Ok(id)
    }

    async fn cancel_listen_config(
        &self,
        param: ConfigParam,
        id: SubscriptionId,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.record(Operation::CancelListenConfig, &param.data_id)?;
        state
            .listeners
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found(format!("config listener {} of {}", id, param.data_id)))
    }
}
