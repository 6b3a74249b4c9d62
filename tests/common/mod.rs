//! 集成测试公共工具

#![allow(dead_code)]

use flare_nacos_bridge::backend::BackendInstance;
use flare_nacos_bridge::{BridgeClient, BridgeConfig, MemoryBackend};
use std::collections::HashMap;
use std::sync::Arc;

pub const GROUP: &str = "DEFAULT_GROUP";

/// 基于内存后端的客户端
pub fn memory_client(config: BridgeConfig) -> (BridgeClient, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let client = BridgeClient::with_backend(config, backend.clone(), backend.clone());
    (client, backend)
}

pub fn default_client() -> (BridgeClient, Arc<MemoryBackend>) {
    memory_client(BridgeConfig::new())
}

/// 注册中心中的实例
pub fn backend_instance(ip: &str, port: u16, protocol: &str, qualified: &str) -> BackendInstance {
    BackendInstance {
        instance_id: format!("{}#{}#DEFAULT#{}@@{}", ip, port, GROUP, qualified),
        ip: ip.to_string(),
        port,
        weight: 10.0,
        healthy: true,
        enabled: true,
        ephemeral: true,
        cluster_name: "DEFAULT".to_string(),
        service_name: format!("{}@@{}", GROUP, qualified),
        metadata: HashMap::from([
            ("protocol".to_string(), protocol.to_string()),
            ("service_version".to_string(), "v1".to_string()),
        ]),
    }
}

pub fn sorted_endpoints<'a>(instances: impl IntoIterator<Item = &'a flare_nacos_bridge::ServiceInstance>) -> Vec<String> {
    let mut endpoints: Vec<String> = instances
        .into_iter()
        .flat_map(|inst| inst.endpoints.clone())
        .collect();
    endpoints.sort();
    endpoints
}
