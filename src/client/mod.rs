//! 桥接客户端
//!
//! 持有配置和后端句柄，实现 [`Registrar`](crate::registry::Registrar) 与
//! [`Discovery`](crate::registry::Discovery)，并派生配置源。

use std::sync::Arc;

use crate::backend::{ConfigClient, NacosBackend, NamingClient};
use crate::config::BridgeConfig;
use crate::config_source::NacosConfigSource;
use crate::error::{BridgeError, Result};

/// 桥接客户端构建器
pub struct BridgeClientBuilder {
    config: BridgeConfig,
    naming: Option<Arc<dyn NamingClient>>,
    config_client: Option<Arc<dyn ConfigClient>>,
}

impl BridgeClientBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            naming: None,
            config_client: None,
        }
    }

    /// 使用自定义服务注册后端
    pub fn naming(mut self, naming: Arc<dyn NamingClient>) -> Self {
        self.naming = Some(naming);
        self
    }

    /// 使用自定义配置中心后端
    pub fn config_client(mut self, config_client: Arc<dyn ConfigClient>) -> Self {
        self.config_client = Some(config_client);
        self
    }

    /// 构建客户端；未指定的后端由 [`NacosBackend`] 补齐
    pub async fn build(self) -> Result<BridgeClient> {
        let (naming, config_client) = match (self.naming, self.config_client) {
            (Some(naming), Some(config_client)) => (naming, config_client),
            (naming, config_client) => {
                self.config.validate()?;
                let nacos = Arc::new(NacosBackend::connect(&self.config).await.map_err(|e| {
                    BridgeError::upstream("failed to create nacos client", e)
                })?);
                let nacos_naming: Arc<dyn NamingClient> = nacos.clone();
                let nacos_config: Arc<dyn ConfigClient> = nacos;
                (
                    naming.unwrap_or(nacos_naming),
                    config_client.unwrap_or(nacos_config),
                )
            }
        };

        Ok(BridgeClient {
            config: Arc::new(self.config),
            naming,
            config_client,
        })
    }
}

/// 桥接客户端
#[derive(Clone)]
pub struct BridgeClient {
    pub(crate) config: Arc<BridgeConfig>,
    pub(crate) naming: Arc<dyn NamingClient>,
    pub(crate) config_client: Arc<dyn ConfigClient>,
}

impl BridgeClient {
    /// 连接 Nacos 并创建客户端
    pub async fn connect(config: BridgeConfig) -> Result<Self> {
        BridgeClientBuilder::new(config).build().await
    }

    /// 使用给定后端创建客户端（不做远端校验）
    pub fn with_backend(
        config: BridgeConfig,
        naming: Arc<dyn NamingClient>,
        config_client: Arc<dyn ConfigClient>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            naming,
            config_client,
        }
    }

    pub fn builder(config: BridgeConfig) -> BridgeClientBuilder {
        BridgeClientBuilder::new(config)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn naming(&self) -> Arc<dyn NamingClient> {
        self.naming.clone()
    }

    /// 基于客户端配置创建配置源
    pub fn config_source(&self) -> NacosConfigSource {
        NacosConfigSource::new(self.config_client.clone(), &self.config.config)
    }
}
