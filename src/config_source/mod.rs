//! 配置源
//!
//! 把配置中心的一个配置文档（data id + group）暴露为键值对，
//! 并提供基于推送的变更 Watcher。

pub mod watcher;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

use crate::backend::{ConfigClient, ConfigParam};
use crate::config::ConfigOptions;
use crate::error::{BridgeError, Result};
use crate::types::KeyValue;

pub use watcher::ConfigWatcher;

/// 配置源 Trait
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// 读取当前配置
    async fn load(&self) -> Result<Vec<KeyValue>>;

    /// 监听配置变化
    async fn watch(&self) -> Result<ConfigWatcher>;
}

/// 基于配置中心的配置源
#[derive(Clone)]
pub struct NacosConfigSource {
    client: Arc<dyn ConfigClient>,
    options: ConfigOptions,
}

impl NacosConfigSource {
    pub fn new(client: Arc<dyn ConfigClient>, options: &ConfigOptions) -> Self {
        Self {
            client,
            options: options.clone(),
        }
    }

    pub fn data_id(&self) -> &str {
        &self.options.data_id
    }

    pub fn group(&self) -> &str {
        &self.options.group
    }

    fn param(&self) -> Result<ConfigParam> {
        if self.options.data_id.is_empty() {
            return Err(BridgeError::invalid_input("config data id cannot be empty"));
        }
        Ok(ConfigParam {
            data_id: self.options.data_id.clone(),
            group: self.options.group.clone(),
        })
    }
}

#[async_trait]
impl ConfigSource for NacosConfigSource {
    async fn load(&self) -> Result<Vec<KeyValue>> {
        let param = self.param()?;
        let content = self.client.get_config(param).await.map_err(|e| {
            error!(data_id = %self.options.data_id, group = %self.options.group, error = %e, "Failed to load config");
            BridgeError::upstream(format!("failed to load config {}", self.options.data_id), e)
        })?;
        debug!(data_id = %self.options.data_id, bytes = content.len(), "Config loaded");

        Ok(vec![KeyValue::new(
            self.options.data_id.clone(),
            content,
            self.options.format.clone(),
        )])
    }

    async fn watch(&self) -> Result<ConfigWatcher> {
        let param = self.param()?;
        ConfigWatcher::start(self.client.clone(), param, &self.options).await
    }
}
