//! 服务注册实现
//!
//! 一个逻辑实例的每个端点对应一次后端调用，注册名为 `<name>.<scheme>`。

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{error, info, warn};

use super::trait_def::Registrar;
use crate::backend::{DeregisterParam, RegisterParam};
use crate::client::BridgeClient;
use crate::config::DEFAULT_CLUSTER;
use crate::discovery::{
    Endpoint, METADATA_CLUSTER, METADATA_PROTOCOL, METADATA_SERVICE_NAME,
    METADATA_SERVICE_VERSION, Protocol, QualifiedName, ServiceInstance,
};
use crate::error::{BridgeError, Result};

/// 可注册的端点
struct Target {
    endpoint: Endpoint,
    protocol: Protocol,
    qualified: QualifiedName,
}

/// 解析端点；无效端点记录日志后跳过
fn registrable_targets(instance: &ServiceInstance) -> Vec<Target> {
    instance
        .endpoints
        .iter()
        .filter_map(|raw| {
            let endpoint = match Endpoint::parse(raw) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    warn!(service = %instance.name, endpoint = %raw, error = %e, "Skipping invalid endpoint");
                    return None;
                }
            };
            let Some(protocol) = endpoint.protocol() else {
                warn!(
                    service = %instance.name,
                    endpoint = %raw,
                    "Skipping endpoint with unsupported scheme"
                );
                return None;
            };
            Some(Target {
                qualified: QualifiedName::new(&instance.name, protocol),
                endpoint,
                protocol,
            })
        })
        .collect()
}

fn validate(instance: &ServiceInstance) -> Result<()> {
    if instance.name.is_empty() {
        return Err(BridgeError::invalid_input("service name cannot be empty"));
    }
    if instance.endpoints.is_empty() {
        return Err(BridgeError::invalid_input("service instance endpoints are required"));
    }
    Ok(())
}

/// 调用方元数据 ∪ {protocol（不覆盖已有值）, 原始服务名, 原始版本}
fn backend_metadata(instance: &ServiceInstance, protocol: Protocol) -> HashMap<String, String> {
    let mut metadata = HashMap::with_capacity(instance.metadata.len() + 3);
    metadata.extend(instance.metadata.clone());
    metadata
        .entry(METADATA_PROTOCOL.to_string())
        .or_insert_with(|| protocol.to_string());
    metadata.insert(METADATA_SERVICE_NAME.to_string(), instance.name.clone());
    metadata.insert(METADATA_SERVICE_VERSION.to_string(), instance.version.clone());
    metadata
}

/// 集群名：元数据覆盖 > 配置的第一个集群 > DEFAULT
fn cluster_name(metadata: &HashMap<String, String>, clusters: &[String]) -> String {
    metadata
        .get(METADATA_CLUSTER)
        .or_else(|| clusters.first())
        .cloned()
        .unwrap_or_else(|| DEFAULT_CLUSTER.to_string())
}

#[async_trait]
impl Registrar for BridgeClient {
    async fn register(&self, instance: &ServiceInstance) -> Result<()> {
        validate(instance)?;

        let targets = registrable_targets(instance);
        if targets.is_empty() {
            return Err(BridgeError::invalid_input(format!(
                "service {} has no registrable endpoint",
                instance.name
            )));
        }

        let options = &self.config.registry;
        for target in targets {
            let metadata = backend_metadata(instance, target.protocol);
            let param = RegisterParam {
                ip: target.endpoint.host.clone(),
                port: target.endpoint.port,
                service_name: target.qualified.to_string(),
                group_name: options.group.clone(),
                cluster_name: cluster_name(&metadata, &options.clusters),
                weight: options.weight,
                enabled: true,
                healthy: true,
                ephemeral: options.ephemeral,
                metadata,
            };

            // 已注册的端点不回滚
            if let Err(e) = self.naming.register_instance(param).await {
                error!(
                    qualified_name = %target.qualified,
                    endpoint = %target.endpoint,
                    error = %e,
                    "❌ Failed to register instance"
                );
                return Err(BridgeError::upstream(
                    format!("failed to register {} ({})", target.qualified, target.endpoint),
                    e,
                ));
            }
            info!(
                qualified_name = %target.qualified,
                endpoint = %target.endpoint,
                "✅ Service registered"
            );
        }

        Ok(())
    }

    async fn deregister(&self, instance: &ServiceInstance) -> Result<()> {
        validate(instance)?;

        let options = &self.config.registry;
        for target in registrable_targets(instance) {
            let param = DeregisterParam {
                ip: target.endpoint.host.clone(),
                port: target.endpoint.port,
                service_name: target.qualified.to_string(),
                group_name: options.group.clone(),
                cluster_name: cluster_name(&instance.metadata, &options.clusters),
                ephemeral: options.ephemeral,
            };

            match self.naming.deregister_instance(param).await {
                Ok(()) => info!(
                    qualified_name = %target.qualified,
                    endpoint = %target.endpoint,
                    "✅ Service deregistered"
                ),
                // 继续注销其余端点
                Err(e) => error!(
                    qualified_name = %target.qualified,
                    endpoint = %target.endpoint,
                    error = %e,
                    "⚠️ Failed to deregister instance"
                ),
            }
        }

        Ok(())
    }
}
