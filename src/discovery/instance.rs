//! 服务实例定义

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::protocol::{Protocol, protocol_of};
use crate::backend::BackendInstance;
use crate::error::{BridgeError, Result};

/// 元数据中的协议键
pub const METADATA_PROTOCOL: &str = "protocol";
/// 元数据中保存的原始逻辑服务名（注册中心会改写服务名）
pub const METADATA_SERVICE_NAME: &str = "service_name";
/// 元数据中保存的原始版本
pub const METADATA_SERVICE_VERSION: &str = "service_version";
/// 元数据中的集群覆盖
pub const METADATA_CLUSTER: &str = "cluster";

/// 服务实例（调用方视角，名字是逻辑服务名）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceInstance {
    /// 实例 ID
    pub id: String,

    /// 逻辑服务名（不带协议后缀）
    pub name: String,

    /// 版本
    pub version: String,

    /// 端点，形如 `grpc://10.0.0.1:9090`，每个端点恰好一个 scheme
    pub endpoints: Vec<String>,

    /// 元数据
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    /// 创建新的服务实例
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            endpoints: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// 添加端点
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// 添加元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 查找指定协议的端点
    pub fn endpoint_for(&self, protocol: Protocol) -> Option<&str> {
        self.endpoints
            .iter()
            .find(|endpoint| {
                Endpoint::parse(endpoint)
                    .map(|parsed| parsed.scheme == protocol.as_str())
                    .unwrap_or(false)
            })
            .map(String::as_str)
    }
}

/// 解析后的端点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// 小写 scheme
    pub scheme: String,
    /// 主机（IPv6 不带方括号）
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// 解析端点 URI；缺少 scheme、主机或端口都视为无效输入
    pub fn parse(raw: &str) -> Result<Self> {
        let uri: http::Uri = raw
            .parse()
            .map_err(|e| BridgeError::invalid_input(format!("unparsable endpoint {}: {}", raw, e)))?;

        let scheme = uri
            .scheme_str()
            .ok_or_else(|| BridgeError::invalid_input(format!("endpoint missing scheme: {}", raw)))?
            .to_lowercase();
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| BridgeError::invalid_input(format!("endpoint missing host: {}", raw)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri
            .port_u16()
            .filter(|p| *p != 0)
            .ok_or_else(|| BridgeError::invalid_input(format!("endpoint missing port: {}", raw)))?;

        Ok(Self { scheme, host, port })
    }

    /// 端点对应的协议（不支持的 scheme 返回 None）
    pub fn protocol(&self) -> Option<Protocol> {
        self.scheme.parse().ok()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, host_port(&self.host, self.port))
    }
}

fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// 将注册中心实例转换为调用方实例
///
/// 注册中心里存的是带后缀的服务名，这里统一还原为逻辑服务名 `logical_name`。
/// 协议优先取元数据，缺失时按服务名后缀推断，再不行用 `default_protocol`。
pub fn from_backend(
    instances: &[BackendInstance],
    logical_name: &str,
    default_protocol: Protocol,
) -> Vec<ServiceInstance> {
    instances
        .iter()
        .map(|bi| {
            let scheme = bi
                .metadata
                .get(METADATA_PROTOCOL)
                .cloned()
                .unwrap_or_else(|| protocol_of(&bi.service_name, default_protocol).to_string());
            let version = bi
                .metadata
                .get(METADATA_SERVICE_VERSION)
                .cloned()
                .unwrap_or_default();

            ServiceInstance {
                id: bi.instance_id.clone(),
                name: logical_name.to_string(),
                version,
                endpoints: vec![format!("{}://{}", scheme, host_port(&bi.ip, bi.port))],
                metadata: bi.metadata.clone(),
            }
        })
        .collect()
}
