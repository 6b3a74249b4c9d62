//! 一次性服务查询
//!
//! 按协议扇出查询，合并各带后缀服务名的健康实例。

use async_trait::async_trait;
use tracing::{debug, warn};

use super::instance::{ServiceInstance, from_backend};
use super::protocol::qualify;
use super::watcher::ServiceWatcher;
use crate::backend::SelectParam;
use crate::client::BridgeClient;
use crate::error::{BackendError, BridgeError, Result};
use crate::registry::{Discovery, Watcher};

#[async_trait]
impl Discovery for BridgeClient {
    async fn get_service(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        if service_name.is_empty() {
            return Err(BridgeError::invalid_input("service name cannot be empty"));
        }

        let options = &self.config.registry;
        let mut all_instances = Vec::new();
        let mut last_err: Option<BackendError> = None;

        for qualified in qualify(service_name) {
            let param = SelectParam {
                service_name: qualified.to_string(),
                group_name: options.group.clone(),
                clusters: options.clusters.clone(),
                healthy_only: true,
            };

            match self.naming.select_instances(param).await {
                Ok(instances) => {
                    let healthy: Vec<_> = instances
                        .into_iter()
                        .filter(|inst| inst.healthy && inst.enabled)
                        .collect();
                    debug!(
                        qualified_name = %qualified,
                        count = healthy.len(),
                        "Resolved healthy instances"
                    );
                    all_instances.extend(from_backend(
                        &healthy,
                        service_name,
                        options.default_protocol,
                    ));
                }
                // 记录最后一个错误，但不中断查询
                Err(e) => {
                    warn!(qualified_name = %qualified, error = %e, "Failed to query service");
                    last_err = Some(e);
                }
            }
        }

        if all_instances.is_empty() {
            warn!(service = %service_name, "No healthy instances found");
            if let Some(e) = last_err {
                return Err(BridgeError::upstream(
                    format!("failed to discover service {}", service_name),
                    e,
                ));
            }
        }

        Ok(all_instances)
    }

    async fn watch(&self, service_name: &str) -> Result<Box<dyn Watcher<Item = Vec<ServiceInstance>>>> {
        let watcher = self.watch_service(service_name).await?;
        Ok(Box::new(watcher))
    }
}

impl BridgeClient {
    /// 创建服务 Watcher（具体类型）
    pub async fn watch_service(&self, service_name: &str) -> Result<ServiceWatcher> {
        ServiceWatcher::start(self.naming.clone(), service_name, &self.config.registry).await
    }
}
