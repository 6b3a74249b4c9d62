//! 桥接层配置
//!
//! 支持从 TOML 文件加载，也支持链式 `with_*` 方法构建；
//! `NACOS_*` 环境变量可覆盖连接相关字段。

use serde::{Deserialize, Serialize};

use crate::discovery::Protocol;
use crate::error::{BridgeError, Result};
use crate::logging::LoggingConfig;

/// 注册中心默认分组
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";
/// 注册中心默认集群
pub const DEFAULT_CLUSTER: &str = "DEFAULT";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// 服务端地址，"ip:port" 格式
    #[serde(default)]
    pub server_addrs: Vec<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_context_path")]
    pub context_path: String,
    #[serde(default)]
    pub registry: RegistryOptions,
    #[serde(default)]
    pub config: ConfigOptions,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 服务注册相关配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryOptions {
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default)]
    pub clusters: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub ephemeral: bool,
    /// 无法从元数据或服务名推断协议时使用的协议
    #[serde(default)]
    pub default_protocol: Protocol,
    /// 服务 Watcher 的事件缓冲区大小
    #[serde(default = "default_watcher_buffer")]
    pub watcher_buffer: usize,
    /// 临时实例心跳 / 订阅轮询间隔（秒）
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

/// 配置中心相关配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfigOptions {
    #[serde(default)]
    pub data_id: String,
    #[serde(default = "default_group")]
    pub group: String,
    /// 配置内容格式标签，原样透传给宿主框架
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_config_buffer")]
    pub watcher_buffer: usize,
    #[serde(default = "default_long_poll_timeout")]
    pub long_poll_timeout_ms: u64,
}

fn default_namespace() -> String {
    "public".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_context_path() -> String {
    "/nacos".to_string()
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

fn default_weight() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

fn default_watcher_buffer() -> usize {
    10
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_format() -> String {
    "yaml".to_string()
}

fn default_config_buffer() -> usize {
    1
}

fn default_long_poll_timeout() -> u64 {
    30_000
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            group: default_group(),
            clusters: Vec::new(),
            weight: default_weight(),
            ephemeral: true,
            default_protocol: Protocol::default(),
            watcher_buffer: default_watcher_buffer(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            data_id: String::new(),
            group: default_group(),
            format: default_format(),
            watcher_buffer: default_config_buffer(),
            long_poll_timeout_ms: default_long_poll_timeout(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_addrs: Vec::new(),
            namespace: default_namespace(),
            username: None,
            password: None,
            timeout_ms: default_timeout_ms(),
            context_path: default_context_path(),
            registry: RegistryOptions::default(),
            config: ConfigOptions::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::configuration(format!("failed to read {}: {}", path, e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| BridgeError::configuration(format!("invalid bridge config: {}", e)))
    }

    /// 用进程环境变量覆盖连接相关字段
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// 用给定的查找函数覆盖连接相关字段
    ///
    /// 识别 `NACOS_SERVER_ADDRS`（逗号分隔）、`NACOS_NAMESPACE`、
    /// `NACOS_USERNAME`、`NACOS_PASSWORD`。
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addrs) = lookup("NACOS_SERVER_ADDRS") {
            self.server_addrs = addrs
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(namespace) = lookup("NACOS_NAMESPACE") {
            self.namespace = namespace;
        }
        if let Some(username) = lookup("NACOS_USERNAME") {
            self.username = Some(username);
        }
        if let Some(password) = lookup("NACOS_PASSWORD") {
            self.password = Some(password);
        }
    }

    /// 校验远端连接所需字段
    pub fn validate(&self) -> Result<()> {
        if self.server_addrs.is_empty() {
            return Err(BridgeError::configuration("nacos server address is required"));
        }
        for addr in &self.server_addrs {
            split_host_port(addr)?;
        }
        if self.registry.watcher_buffer == 0 || self.config.watcher_buffer == 0 {
            return Err(BridgeError::configuration("watcher buffer must be greater than zero"));
        }
        Ok(())
    }

    /// 设置服务端地址（一个或多个 "ip:port"）
    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.server_addrs = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_registry_group(mut self, group: impl Into<String>) -> Self {
        self.registry.group = group.into();
        self
    }

    pub fn with_registry_clusters<I, S>(mut self, clusters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registry.clusters = clusters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.registry.weight = weight;
        self
    }

    pub fn with_default_protocol(mut self, protocol: Protocol) -> Self {
        self.registry.default_protocol = protocol;
        self
    }

    pub fn with_watcher_buffer(mut self, size: usize) -> Self {
        self.registry.watcher_buffer = size;
        self
    }

    pub fn with_config_data_id(mut self, data_id: impl Into<String>) -> Self {
        self.config.data_id = data_id.into();
        self
    }

    pub fn with_config_group(mut self, group: impl Into<String>) -> Self {
        self.config.group = group.into();
        self
    }

    pub fn with_config_buffer(mut self, size: usize) -> Self {
        self.config.watcher_buffer = size;
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// 解析 "ip:port"
pub fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| BridgeError::configuration(format!("invalid host format: {}", addr)))?;
    if host.is_empty() {
        return Err(BridgeError::configuration(format!("invalid host format: {}", addr)));
    }
    let port = port
        .parse::<u16>()
        .map_err(|e| BridgeError::configuration(format!("invalid port in {}: {}", addr, e)))?;
    Ok((host.to_string(), port))
}
