//! 配置 Watcher
//!
//! 与服务 Watcher 同样的推拉桥接，只监听一个配置文档，载荷是最新的完整内容。

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{ConfigCallback, ConfigClient, ConfigParam, SubscriptionId};
use crate::config::ConfigOptions;
use crate::discovery::WatcherState;
use crate::error::{BridgeError, Result};
use crate::registry::Watcher;
use crate::types::KeyValue;

pub struct ConfigWatcher {
    client: Arc<dyn ConfigClient>,
    param: ConfigParam,
    listener: Mutex<Option<SubscriptionId>>,
    rx: tokio::sync::Mutex<Option<mpsc::Receiver<Vec<KeyValue>>>>,
    cancel: CancellationToken,
    state: Mutex<WatcherState>,
}

impl ConfigWatcher {
    /// 注册监听；监听失败时直接返回 `UpstreamUnavailable`
    pub async fn start(
        client: Arc<dyn ConfigClient>,
        param: ConfigParam,
        options: &ConfigOptions,
    ) -> Result<Self> {
        if options.watcher_buffer == 0 {
            return Err(BridgeError::configuration("watcher buffer must be greater than zero"));
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(options.watcher_buffer);
        let format = options.format.clone();
        let callback: ConfigCallback = Arc::new(move |change| {
            let key = change.data_id.clone();
            let kv = KeyValue::new(change.data_id, change.content, format.clone());
            match tx.try_send(vec![kv]) {
                Ok(()) => debug!(data_id = %key, "Config change enqueued"),
                Err(TrySendError::Full(_)) => {
                    warn!(data_id = %key, "Config watcher channel full, dropping change")
                }
                Err(TrySendError::Closed(_)) => debug!(data_id = %key, "Config watcher channel closed"),
            }
        });

        let id = match client.listen_config(param.clone(), callback).await {
            Ok(id) => id,
            Err(e) => {
                cancel.cancel();
                error!(data_id = %param.data_id, group = %param.group, error = %e, "Failed to listen config");
                return Err(BridgeError::upstream(
                    format!("failed to watch config {}", param.data_id),
                    e,
                ));
            }
        };

        info!(data_id = %param.data_id, group = %param.group, "👀 Config watcher started");
        Ok(Self {
            client,
            param,
            listener: Mutex::new(Some(id)),
            rx: tokio::sync::Mutex::new(Some(rx)),
            cancel,
            state: Mutex::new(WatcherState::Active),
        })
    }

    pub fn state(&self) -> WatcherState {
        *self.state.lock()
    }

    pub fn data_id(&self) -> &str {
        &self.param.data_id
    }
}

#[async_trait]
impl Watcher for ConfigWatcher {
    type Item = Vec<KeyValue>;

    async fn next(&self) -> Result<Vec<KeyValue>> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        let mut guard = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(BridgeError::Cancelled),
            guard = self.rx.lock() => guard,
        };
        let Some(rx) = guard.as_mut() else {
            return Err(BridgeError::Cancelled);
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BridgeError::Cancelled),
            change = rx.recv() => change.ok_or(BridgeError::Cancelled),
        }
    }

    async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == WatcherState::Stopped {
                return Ok(());
            }
            *state = WatcherState::Stopped;
        }

        self.cancel.cancel();

        let listener = self.listener.lock().take();
        let result = match listener {
            Some(id) => self
                .client
                .cancel_listen_config(self.param.clone(), id)
                .await
                .map_err(|e| {
                    error!(data_id = %self.param.data_id, error = %e, "Failed to cancel config listener");
                    BridgeError::upstream(
                        format!("failed to cancel config listener {}", self.param.data_id),
                        e,
                    )
                }),
            None => Ok(()),
        };

        // 接收端可能被挂起未再轮询的 next() 占用，此时不关闭；取消已先于接收生效
        if let Ok(mut guard) = self.rx.try_lock() {
            if let Some(mut rx) = guard.take() {
                rx.close();
            }
        }

        info!(data_id = %self.param.data_id, "🛑 Config watcher stopped");
        result
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
        let Some(id) = self.listener.lock().take() else {
            return;
        };
        let client = self.client.clone();
        let param = self.param.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = client.cancel_listen_config(param.clone(), id).await {
                    warn!(data_id = %param.data_id, error = %e, "Failed to cancel listener of dropped config watcher");
                }
            });
        } else {
            warn!(data_id = %param.data_id, "No tokio runtime available, config listener leaked");
        }
    }
}
