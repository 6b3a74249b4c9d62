//! Nacos 服务注册：注册/注销/查询、临时实例心跳、订阅轮询

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Call, NacosBackend, NacosInner};
use crate::backend::{
    BackendInstance, DeregisterParam, InstanceCallback, NamingClient, RegisterParam, SelectParam,
    SubscribeParam, SubscriptionId, grouped_service_name, not_found,
};
use crate::error::{BackendError, BackendResult};

const INSTANCE_PATH: &str = "/v1/ns/instance";
const INSTANCE_LIST_PATH: &str = "/v1/ns/instance/list";
const BEAT_PATH: &str = "/v1/ns/instance/beat";

/// 心跳返回的 "实例不存在"
const RESOURCE_NOT_FOUND: i32 = 20404;

/// `/instance/list` 响应
#[derive(Debug, Default, Deserialize)]
struct ServiceInfo {
    #[serde(default)]
    hosts: Vec<BackendInstance>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BeatInfo<'a> {
    ip: &'a str,
    port: u16,
    service_name: String,
    cluster: &'a str,
    weight: f64,
    metadata: &'a HashMap<String, String>,
    scheduled: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BeatResponse {
    #[serde(default)]
    code: i32,
}

/// 无法识别的心跳响应按成功处理，仅记录日志
fn decode_beat_response(body: &str) -> BeatResponse {
    match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => {
            debug!(body = %body, error = %e, "Unrecognized beat response, treating as ok");
            BeatResponse::default()
        }
    }
}

fn beat_key(param: &RegisterParam) -> String {
    format!(
        "{}#{}#{}#{}",
        grouped_service_name(&param.group_name, &param.service_name),
        param.ip,
        param.port,
        param.cluster_name
    )
}

/// 订阅任务看到的上一次结果
enum LastSeen {
    Nothing,
    Instances(Vec<BackendInstance>),
    Failed,
}

fn sort_instances(instances: &mut [BackendInstance]) {
    instances.sort_by(|a, b| {
        (a.ip.as_str(), a.port, a.cluster_name.as_str())
            .cmp(&(b.ip.as_str(), b.port, b.cluster_name.as_str()))
    });
}

fn decode_instances(body: &str) -> BackendResult<Vec<BackendInstance>> {
    let info: ServiceInfo = serde_json::from_str(body)?;
    Ok(info.hosts)
}

impl NacosInner {
    async fn send_register(&self, param: &RegisterParam) -> BackendResult<()> {
        let metadata = serde_json::to_string(&param.metadata)?;
        let call = Call::new(Method::POST, INSTANCE_PATH, self.timeout)
            .query("namespaceId", self.namespace.clone())
            .query("serviceName", param.service_name.clone())
            .query("groupName", param.group_name.clone())
            .query("clusterName", param.cluster_name.clone())
            .query("ip", param.ip.clone())
            .query("port", param.port.to_string())
            .query("weight", param.weight.to_string())
            .query("enabled", param.enabled.to_string())
            .query("healthy", param.healthy.to_string())
            .query("ephemeral", param.ephemeral.to_string())
            .query("metadata", metadata);

        let body = self.execute(&call).await?;
        if body.trim() != "ok" {
            return Err(BackendError::Rejected(format!(
                "register {} returned {}",
                param.service_name, body
            )));
        }
        Ok(())
    }

    async fn send_beat(&self, param: &RegisterParam) -> BackendResult<BeatResponse> {
        let grouped = grouped_service_name(&param.group_name, &param.service_name);
        let beat = serde_json::to_string(&BeatInfo {
            ip: &param.ip,
            port: param.port,
            service_name: grouped.clone(),
            cluster: &param.cluster_name,
            weight: param.weight,
            metadata: &param.metadata,
            scheduled: false,
        })?;
        let call = Call::new(Method::PUT, BEAT_PATH, self.timeout)
            .query("namespaceId", self.namespace.clone())
            .query("serviceName", grouped)
            .query("groupName", param.group_name.clone())
            .query("ephemeral", "true")
            .query("beat", beat);

        let body = self.execute(&call).await?;
        Ok(decode_beat_response(&body))
    }

    async fn query_instances(&self, param: &SelectParam) -> BackendResult<Vec<BackendInstance>> {
        let call = Call::new(Method::GET, INSTANCE_LIST_PATH, self.timeout)
            .query("namespaceId", self.namespace.clone())
            .query("serviceName", param.service_name.clone())
            .query("groupName", param.group_name.clone())
            .query("clusters", param.clusters.join(","))
            .query("healthyOnly", param.healthy_only.to_string());

        match self.execute(&call).await {
            Ok(body) => decode_instances(&body),
            // 服务尚未创建
            Err(BackendError::Status { status: 404, .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// 为临时实例启动心跳任务；同一实例重复注册时替换旧任务
    fn start_beat(self: &Arc<Self>, param: RegisterParam) {
        let key = beat_key(&param);
        let token = self.shutdown.child_token();
        if let Some(previous) = self.beats.lock().insert(key.clone(), token.clone()) {
            previous.cancel();
        }

        let inner = self.clone();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 注册本身就是第一次心跳
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(instance = %key, "🛑 Heartbeat task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match inner.send_beat(&param).await {
                            Ok(resp) if resp.code == RESOURCE_NOT_FOUND => {
                                warn!(instance = %key, "Instance missing on server, registering again");
                                if let Err(e) = inner.send_register(&param).await {
                                    error!(instance = %key, error = %e, "❌ Failed to re-register instance");
                                }
                            }
                            Ok(_) => debug!(instance = %key, "💓 Heartbeat sent"),
                            Err(e) => error!(instance = %key, error = %e, "❌ Failed to send heartbeat"),
                        }
                    }
                }
            }
        });
    }

    fn stop_beat(&self, key: &str) {
        if let Some(token) = self.beats.lock().remove(key) {
            token.cancel();
        }
    }

    /// 订阅轮询任务：首次结果总是回调，之后仅在列表变化或由成功转为失败时回调
    fn spawn_subscription(
        self: &Arc<Self>,
        param: SubscribeParam,
        callback: InstanceCallback,
        token: CancellationToken,
        interval: Duration,
    ) {
        let inner = self.clone();
        tokio::spawn(async move {
            let select = SelectParam {
                service_name: param.service_name.clone(),
                group_name: param.group_name.clone(),
                clusters: param.clusters.clone(),
                healthy_only: false,
            };
            let mut ticker = tokio::time::interval(interval);
            let mut last = LastSeen::Nothing;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match inner.query_instances(&select).await {
                    Ok(mut instances) => {
                        sort_instances(&mut instances);
                        let changed = match &last {
                            LastSeen::Instances(previous) => *previous != instances,
                            LastSeen::Nothing | LastSeen::Failed => true,
                        };
                        if changed && !token.is_cancelled() {
                            debug!(service = %param.service_name, count = instances.len(), "Instance list changed");
                            callback(Ok(instances.clone()));
                        }
                        last = LastSeen::Instances(instances);
                    }
                    Err(e) => {
                        warn!(service = %param.service_name, error = %e, "Failed to poll instances");
                        if !matches!(last, LastSeen::Failed) && !token.is_cancelled() {
                            callback(Err(e));
                        }
                        last = LastSeen::Failed;
                    }
                }
            }
            debug!(service = %param.service_name, "Subscription task stopped");
        });
    }
}

#[async_trait]
impl NamingClient for NacosBackend {
    async fn register_instance(&self, param: RegisterParam) -> BackendResult<()> {
        self.inner.send_register(&param).await?;
        info!(
            service = %param.service_name,
            group = %param.group_name,
            ip = %param.ip,
            port = param.port,
            "Instance registered to nacos"
        );
        if param.ephemeral {
            self.inner.start_beat(param);
        }
        Ok(())
    }

    async fn deregister_instance(&self, param: DeregisterParam) -> BackendResult<()> {
        let key = format!(
            "{}#{}#{}#{}",
            grouped_service_name(&param.group_name, &param.service_name),
            param.ip,
            param.port,
            param.cluster_name
        );
        self.inner.stop_beat(&key);

        let call = Call::new(Method::DELETE, INSTANCE_PATH, self.inner.timeout)
            .query("namespaceId", self.inner.namespace.clone())
            .query("serviceName", param.service_name.clone())
            .query("groupName", param.group_name.clone())
            .query("clusterName", param.cluster_name.clone())
            .query("ip", param.ip.clone())
            .query("port", param.port.to_string())
            .query("ephemeral", param.ephemeral.to_string());
        let body = self.inner.execute(&call).await?;
        if body.trim() != "ok" {
            return Err(BackendError::Rejected(format!(
                "deregister {} returned {}",
                param.service_name, body
            )));
        }
        Ok(())
    }

    async fn select_instances(&self, param: SelectParam) -> BackendResult<Vec<BackendInstance>> {
        let instances = self.inner.query_instances(&param).await?;
        Ok(instances
            .into_iter()
            .filter(|inst| !param.healthy_only || inst.healthy)
            .collect())
    }

    async fn subscribe(
        &self,
        param: SubscribeParam,
        callback: InstanceCallback,
    ) -> BackendResult<SubscriptionId> {
        let id = self.inner.next_id();
        let token = self.inner.shutdown.child_token();
        self.inner.subscriptions.lock().insert(id, token.clone());
        debug!(service = %param.service_name, subscription = %id, "Subscribing");
        self.inner
            .spawn_subscription(param, callback, token, self.inner.poll_interval);
        Ok(id)
    }

    async fn unsubscribe(&self, param: SubscribeParam, id: SubscriptionId) -> BackendResult<()> {
        let token = self
            .inner
            .subscriptions
            .lock()
            .remove(&id)
            .ok_or_else(|| not_found(format!("subscription {} of {}", id, param.service_name)))?;
        token.cancel();
        Ok(())
    }
}
