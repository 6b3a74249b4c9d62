//! Nacos 配置中心：读取配置与长轮询监听

use async_trait::async_trait;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Call, NacosBackend, NacosInner};
use crate::backend::{
    ConfigCallback, ConfigChange, ConfigClient, ConfigParam, SubscriptionId, not_found,
};
use crate::error::{BackendError, BackendResult};

const CONFIGS_PATH: &str = "/v1/cs/configs";
const LISTENER_PATH: &str = "/v1/cs/configs/listener";

/// 长轮询出错后的重试间隔
const LISTEN_RETRY_DELAY: Duration = Duration::from_secs(2);

const WORD_SEPARATOR: char = '\u{2}';
const LINE_SEPARATOR: char = '\u{1}';

/// 配置中心的默认命名空间用空 tenant 表示
fn tenant_of(namespace: &str) -> &str {
    if namespace == "public" { "" } else { namespace }
}

fn content_md5(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}

/// 长轮询请求体中的 `Listening-Configs` 字段
fn listening_configs(param: &ConfigParam, md5: &str, tenant: &str) -> String {
    let mut line = format!(
        "{}{sep}{}{sep}{}",
        param.data_id,
        param.group,
        md5,
        sep = WORD_SEPARATOR
    );
    if !tenant.is_empty() {
        line.push(WORD_SEPARATOR);
        line.push_str(tenant);
    }
    line.push(LINE_SEPARATOR);
    line
}

impl NacosInner {
    async fn fetch_config(&self, param: &ConfigParam) -> BackendResult<String> {
        let call = Call::new(Method::GET, CONFIGS_PATH, self.timeout)
            .query("dataId", param.data_id.clone())
            .query("group", param.group.clone())
            .query("tenant", tenant_of(&self.namespace));

        match self.execute(&call).await {
            Ok(content) => Ok(content),
            Err(BackendError::Status { status: 404, .. }) => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    /// 一次长轮询；返回 true 表示服务端报告有变化
    async fn poll_change(&self, param: &ConfigParam, md5: &str) -> BackendResult<bool> {
        let tenant = tenant_of(&self.namespace);
        let call = Call::new(
            Method::POST,
            LISTENER_PATH,
            self.long_poll_timeout + self.timeout,
        )
        .header("Long-Pulling-Timeout", self.long_poll_timeout.as_millis().to_string())
        .form("Listening-Configs", listening_configs(param, md5, tenant));

        let body = self.execute(&call).await?;
        Ok(!body.trim().is_empty())
    }

    fn spawn_listener(
        self: &Arc<Self>,
        param: ConfigParam,
        callback: ConfigCallback,
        token: CancellationToken,
        initial_md5: String,
    ) {
        let inner = self.clone();
        tokio::spawn(async move {
            let mut md5 = initial_md5;
            loop {
                let changed = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    result = inner.poll_change(&param, &md5) => result,
                };

                let result = match changed {
                    Ok(false) => continue,
                    Ok(true) => inner.fetch_config(&param).await,
                    Err(e) => Err(e),
                };

                match result {
                    Ok(content) => {
                        let latest = content_md5(&content);
                        if latest == md5 || token.is_cancelled() {
                            continue;
                        }
                        md5 = latest;
                        debug!(data_id = %param.data_id, group = %param.group, "Config changed");
                        callback(ConfigChange {
                            namespace: inner.namespace.clone(),
                            group: param.group.clone(),
                            data_id: param.data_id.clone(),
                            content,
                        });
                    }
                    Err(e) => {
                        warn!(data_id = %param.data_id, error = %e, "Config long polling failed");
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(LISTEN_RETRY_DELAY) => {}
                        }
                    }
                }
            }
            debug!(data_id = %param.data_id, "Config listener stopped");
        });
    }
}

#[async_trait]
impl ConfigClient for NacosBackend {
    async fn get_config(&self, param: ConfigParam) -> BackendResult<String> {
        self.inner.fetch_config(&param).await
    }

    /// 以当前内容为基线开始监听，之后每次内容变化回调一次
    async fn listen_config(
        &self,
        param: ConfigParam,
        callback: ConfigCallback,
    ) -> BackendResult<SubscriptionId> {
        let current = self.inner.fetch_config(&param).await?;
        let id = self.inner.next_id();
        let token = self.inner.shutdown.child_token();
        self.inner.listeners.lock().insert(id, token.clone());
        info!(data_id = %param.data_id, group = %param.group, listener = %id, "Listening config");
        self.inner
            .spawn_listener(param, callback, token, content_md5(&current));
        Ok(id)
    }

    async fn cancel_listen_config(
        &self,
        param: ConfigParam,
        id: SubscriptionId,
    ) -> BackendResult<()> {
        let token = self
            .inner
            .listeners
            .lock()
            .remove(&id)
            .ok_or_else(|| not_found(format!("config listener {} of {}", id, param.data_id)))?;
        token.cancel();
        Ok(())
    }
}
